use crate::column::ColumnType;
use byteorder::{LittleEndian, ReadBytesExt};
use common::err::decode_error::ReError;
use std::io::{Cursor, Read};

const OPT_META_COLUMN_NAME: u8 = 4;

/// Schema snapshot for one table, as announced by the TABLE_MAP event that
/// precedes every run of ROWS events against it. Binlogs from MySQL 8.0.1+
/// carry an optional-metadata tail with real column names; older servers
/// don't, so we fall back to positional names (`col_0`, `col_1`, ...).
#[derive(Debug, Clone)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub flags: u16,
    pub database_name: String,
    pub table_name: String,
    pub column_types: Vec<ColumnType>,
    pub column_metadata: Vec<u16>,
    pub null_bitmap: Vec<u8>,
    pub column_names: Vec<String>,
}

impl TableMapEvent {
    pub fn parse(cursor: &mut Cursor<&[u8]>, body_len: usize) -> Result<Self, ReError> {
        let start = cursor.position() as usize;
        let mut table_id_buf = [0u8; 6];
        cursor.read_exact(&mut table_id_buf)?;
        let table_id = u64::from_le_bytes([
            table_id_buf[0],
            table_id_buf[1],
            table_id_buf[2],
            table_id_buf[3],
            table_id_buf[4],
            table_id_buf[5],
            0,
            0,
        ]);
        let flags = cursor.read_u16::<LittleEndian>()?;

        let schema_len = cursor.read_u8()? as usize;
        let mut schema_buf = vec![0u8; schema_len];
        cursor.read_exact(&mut schema_buf)?;
        cursor.read_u8()?; // null terminator
        let database_name = String::from_utf8_lossy(&schema_buf).into_owned();

        let table_len = cursor.read_u8()? as usize;
        let mut table_buf = vec![0u8; table_len];
        cursor.read_exact(&mut table_buf)?;
        cursor.read_u8()?; // null terminator
        let table_name = String::from_utf8_lossy(&table_buf).into_owned();

        let column_count = read_len_enc_int(cursor)? as usize;
        let mut type_codes = vec![0u8; column_count];
        cursor.read_exact(&mut type_codes)?;
        let column_types = type_codes
            .iter()
            .map(|c| ColumnType::from_code(*c))
            .collect::<Result<Vec<_>, _>>()?;

        let metadata_len = read_len_enc_int(cursor)? as usize;
        let mut metadata_buf = vec![0u8; metadata_len];
        cursor.read_exact(&mut metadata_buf)?;
        let column_metadata = read_column_metadata(&metadata_buf, &column_types)?;

        let bitmap_len = (column_count + 7) / 8;
        let mut null_bitmap = vec![0u8; bitmap_len];
        cursor.read_exact(&mut null_bitmap)?;

        let consumed = cursor.position() as usize - start;
        let mut column_names: Vec<String> = (0..column_count).map(|i| format!("col_{i}")).collect();
        if consumed < body_len {
            let mut optional = vec![0u8; body_len - consumed];
            cursor.read_exact(&mut optional)?;
            if let Some(names) = read_optional_column_names(&optional, column_count) {
                column_names = names;
            }
        }

        Ok(Self {
            table_id,
            flags,
            database_name,
            table_name,
            column_types,
            column_metadata,
            null_bitmap,
            column_names,
        })
    }

    pub fn is_null(&self, column_index: usize) -> bool {
        let byte = self.null_bitmap.get(column_index / 8).copied().unwrap_or(0);
        (byte >> (column_index % 8)) & 1 == 1
    }
}

fn read_len_enc_int(cursor: &mut Cursor<&[u8]>) -> Result<u64, ReError> {
    let first = cursor.read_u8()?;
    match first {
        0..=250 => Ok(first as u64),
        0xfc => Ok(cursor.read_u16::<LittleEndian>()? as u64),
        0xfd => {
            let mut buf = [0u8; 3];
            cursor.read_exact(&mut buf)?;
            Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], 0]) as u64)
        }
        0xfe => Ok(cursor.read_u64::<LittleEndian>()?),
        other => Err(ReError::Error(format!("invalid length-encoded int prefix {other}"))),
    }
}

/// Each type's metadata occupies 0, 1 or 2 bytes depending on `ColumnType::metadata_width`.
fn read_column_metadata(buf: &[u8], column_types: &[ColumnType]) -> Result<Vec<u16>, ReError> {
    let mut cursor = Cursor::new(buf);
    let mut result = Vec::with_capacity(column_types.len());
    for column_type in column_types {
        let value = match column_type.metadata_width() {
            0 => 0u16,
            1 => cursor.read_u8()? as u16,
            2 => cursor.read_u16::<LittleEndian>()?,
            other => return Err(ReError::Error(format!("unexpected metadata width {other}"))),
        };
        result.push(value);
    }
    Ok(result)
}

fn read_optional_column_names(buf: &[u8], column_count: usize) -> Option<Vec<String>> {
    let mut cursor = Cursor::new(buf);
    while (cursor.position() as usize) < buf.len() {
        let field_type = cursor.read_u8().ok()?;
        let field_len = read_len_enc_int(&mut cursor).ok()? as usize;
        if field_type == OPT_META_COLUMN_NAME {
            let mut field_buf = vec![0u8; field_len];
            cursor.read_exact(&mut field_buf).ok()?;
            let mut names = Vec::with_capacity(column_count);
            let mut name_cursor = Cursor::new(field_buf.as_slice());
            for _ in 0..column_count {
                let len = read_len_enc_int(&mut name_cursor).ok()? as usize;
                let mut name_buf = vec![0u8; len];
                name_cursor.read_exact(&mut name_buf).ok()?;
                names.push(String::from_utf8_lossy(&name_buf).into_owned());
            }
            return Some(names);
        } else {
            let mut skip = vec![0u8; field_len];
            cursor.read_exact(&mut skip).ok()?;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schema_and_table_name() {
        let mut body = vec![];
        body.extend_from_slice(&[1, 0, 0, 0, 0, 0]); // table_id = 1
        body.extend_from_slice(&0u16.to_le_bytes()); // flags
        body.push(4);
        body.extend_from_slice(b"shop");
        body.push(0);
        body.push(5);
        body.extend_from_slice(b"order");
        body.push(0);
        body.push(2); // column count
        body.push(3); // Long
        body.push(1); // Tiny
        body.push(0); // metadata length = 0 (neither type carries metadata)
        body.push(0); // null bitmap, 1 byte for 2 columns

        let mut cursor = Cursor::new(body.as_slice());
        let event = TableMapEvent::parse(&mut cursor, body.len()).unwrap();
        assert_eq!(event.database_name, "shop");
        assert_eq!(event.table_name, "order");
        assert_eq!(event.column_types, vec![ColumnType::Long, ColumnType::Tiny]);
        assert_eq!(event.column_names, vec!["col_0", "col_1"]);
    }
}
