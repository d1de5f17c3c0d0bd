use crate::column::decode_value;
use crate::table_map::TableMapEvent;
use byteorder::{LittleEndian, ReadBytesExt};
use common::err::decode_error::ReError;
use common::model::change_record::Row;
use indexmap::IndexMap;
use std::io::{Cursor, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsEventKind {
    Write,
    Update,
    Delete,
}

/// One row mutation decoded off a ROWS event. `before` is populated for
/// `Update`/`Delete`, `after` for `Write`/`Update`.
#[derive(Debug, Clone)]
pub struct RowImage {
    pub before: Option<Row>,
    pub after: Option<Row>,
}

#[derive(Debug, Clone)]
pub struct RowsEvent {
    pub table_id: u64,
    pub kind: RowsEventKind,
    pub rows: Vec<RowImage>,
}

impl RowsEvent {
    /// `version` is 1 for the pre-5.6.4 wire layout (no extra-data block) or
    /// 2 for the modern one. `body` must already have the trailing checksum
    /// stripped.
    pub fn parse(body: &[u8], kind: RowsEventKind, version: u8, table_map: &TableMapEvent) -> Result<Self, ReError> {
        let mut cursor = Cursor::new(body);
        let mut table_id_buf = [0u8; 6];
        cursor.read_exact(&mut table_id_buf)?;
        let table_id = u64::from_le_bytes([
            table_id_buf[0], table_id_buf[1], table_id_buf[2], table_id_buf[3], table_id_buf[4], table_id_buf[5], 0, 0,
        ]);
        let _flags = cursor.read_u16::<LittleEndian>()?;

        if version >= 2 {
            let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
            let mut extra = vec![0u8; extra_len.saturating_sub(2)];
            cursor.read_exact(&mut extra)?;
        }

        let column_count = read_len_enc_int(&mut cursor)? as usize;
        let bitmap_len = (column_count + 7) / 8;

        let mut present_before = vec![0u8; bitmap_len];
        cursor.read_exact(&mut present_before)?;
        let present_after = if kind == RowsEventKind::Update {
            let mut buf = vec![0u8; bitmap_len];
            cursor.read_exact(&mut buf)?;
            buf
        } else {
            vec![]
        };

        let mut rows = Vec::new();
        while (cursor.position() as usize) < body.len() {
            let before = match kind {
                RowsEventKind::Update | RowsEventKind::Delete => {
                    Some(decode_row_image(&mut cursor, table_map, &present_before, column_count)?)
                }
                RowsEventKind::Write => None,
            };
            let after = match kind {
                RowsEventKind::Write => Some(decode_row_image(&mut cursor, table_map, &present_before, column_count)?),
                RowsEventKind::Update => Some(decode_row_image(&mut cursor, table_map, &present_after, column_count)?),
                RowsEventKind::Delete => None,
            };
            rows.push(RowImage { before, after });
        }

        Ok(Self { table_id, kind, rows })
    }
}

fn decode_row_image(
    cursor: &mut Cursor<&[u8]>,
    table_map: &TableMapEvent,
    present: &[u8],
    column_count: usize,
) -> Result<Row, ReError> {
    let present_count = present.iter().map(|b| b.count_ones() as usize).sum::<usize>();
    let null_bitmap_len = (present_count + 7) / 8;
    let mut null_bitmap = vec![0u8; null_bitmap_len];
    cursor.read_exact(&mut null_bitmap)?;

    let mut row: Row = IndexMap::new();
    let mut present_index = 0usize;
    for column_index in 0..column_count {
        let is_present = (present[column_index / 8] >> (column_index % 8)) & 1 == 1;
        if !is_present {
            continue;
        }
        let name = table_map
            .column_names
            .get(column_index)
            .cloned()
            .unwrap_or_else(|| format!("col_{column_index}"));
        let is_null = (null_bitmap[present_index / 8] >> (present_index % 8)) & 1 == 1;
        present_index += 1;
        if is_null {
            row.insert(name, common::model::value::Value::Null);
            continue;
        }
        let column_type = table_map.column_types[column_index];
        let metadata = table_map.column_metadata[column_index];
        let value = decode_value(cursor, column_type, metadata)?;
        row.insert(name, value);
    }
    Ok(row)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    fn single_int_column_table() -> TableMapEvent {
        TableMapEvent {
            table_id: 1,
            flags: 0,
            database_name: "shop".into(),
            table_name: "order".into(),
            column_types: vec![ColumnType::Long],
            column_metadata: vec![0],
            null_bitmap: vec![0],
            column_names: vec!["id".into()],
        }
    }

    #[test]
    fn parses_single_insert_row() {
        let table_map = single_int_column_table();
        let mut body = vec![];
        body.extend_from_slice(&[1, 0, 0, 0, 0, 0]); // table_id
        body.extend_from_slice(&0u16.to_le_bytes()); // flags
        body.extend_from_slice(&2u16.to_le_bytes()); // v2 extra-data block length (2 = no extra data), includes itself
        body.push(1); // column_count (length-encoded int, <=250 fits in one byte)
        body.push(0b0000_0001); // columns-present bitmap: column 0 present
        body.push(0b0000_0000); // row null bitmap: not null
        body.extend_from_slice(&42i32.to_le_bytes());

        let event = RowsEvent::parse(&body, RowsEventKind::Write, 2, &table_map).unwrap();
        assert_eq!(event.rows.len(), 1);
        let after = event.rows[0].after.as_ref().unwrap();
        assert_eq!(after.get("id"), Some(&common::model::value::Value::Int(42)));
        assert!(event.rows[0].before.is_none());
    }
}
