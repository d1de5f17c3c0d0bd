use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use chrono::DateTime;
use common::err::decode_error::ReError;
use common::model::value::Value;
use std::io::{Cursor, Read};

/// `Cursor<&[u8]>` lacks a handful of the odd-width reads the binlog wire
/// format needs (3-byte ints, arbitrary-width unsigned ints up to 8 bytes).
pub trait ByteReaderExt {
    fn read_u24<T: byteorder::ByteOrder>(&mut self) -> Result<u32, ReError>;
    fn read_i24<T: byteorder::ByteOrder>(&mut self) -> Result<i32, ReError>;
    fn read_uint<T: byteorder::ByteOrder>(&mut self, nbytes: usize) -> Result<u64, ReError>;
}

impl ByteReaderExt for Cursor<&[u8]> {
    fn read_u24<T: byteorder::ByteOrder>(&mut self) -> Result<u32, ReError> {
        let mut buf = [0u8; 3];
        self.read_exact(&mut buf)?;
        let little = std::any::TypeId::of::<T>() == std::any::TypeId::of::<LittleEndian>();
        Ok(if little {
            u32::from_le_bytes([buf[0], buf[1], buf[2], 0])
        } else {
            u32::from_be_bytes([0, buf[0], buf[1], buf[2]])
        })
    }

    fn read_i24<T: byteorder::ByteOrder>(&mut self) -> Result<i32, ReError> {
        let unsigned = self.read_u24::<T>()?;
        Ok(if unsigned & 0x80_0000 != 0 {
            (unsigned | 0xFF00_0000) as i32
        } else {
            unsigned as i32
        })
    }

    fn read_uint<T: byteorder::ByteOrder>(&mut self, nbytes: usize) -> Result<u64, ReError> {
        if nbytes == 0 || nbytes > 8 {
            return Err(ReError::Error(format!("invalid byte width for uint: {nbytes}")));
        }
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf[..nbytes])?;
        let little = std::any::TypeId::of::<T>() == std::any::TypeId::of::<LittleEndian>();
        Ok(if little {
            u64::from_le_bytes(buf)
        } else {
            let mut be = [0u8; 8];
            be[8 - nbytes..].copy_from_slice(&buf[..nbytes]);
            u64::from_be_bytes(be)
        })
    }
}

/// MySQL's wire column type, paired with the per-column metadata bytes
/// carried in the TABLE_MAP event.
///
/// ref: <https://dev.mysql.com/doc/internals/en/table-map-event.html>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    NewDate,
    VarChar,
    Bit,
    Timestamp2,
    DateTime2,
    Time2,
    Json,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
}

impl ColumnType {
    pub fn from_code(code: u8) -> Result<Self, ReError> {
        use ColumnType::*;
        Ok(match code {
            0 => Decimal,
            1 => Tiny,
            2 => Short,
            3 => Long,
            4 => Float,
            5 => Double,
            6 => Null,
            7 => Timestamp,
            8 => LongLong,
            9 => Int24,
            10 => Date,
            11 => Time,
            12 => DateTime,
            13 => Year,
            14 => NewDate,
            15 => VarChar,
            16 => Bit,
            17 => Timestamp2,
            18 => DateTime2,
            19 => Time2,
            245 => Json,
            246 => NewDecimal,
            247 => Enum,
            248 => Set,
            249 => TinyBlob,
            250 => MediumBlob,
            251 => LongBlob,
            252 => Blob,
            253 => VarString,
            254 => String,
            255 => Geometry,
            other => return Err(ReError::UnsupportedFormatError(format!("unknown column type code {other}"))),
        })
    }

    /// Number of metadata bytes this type carries in TABLE_MAP's metadata block.
    pub fn metadata_width(&self) -> usize {
        use ColumnType::*;
        match self {
            Float | Double | Blob | Timestamp2 | DateTime2 | Time2 | Geometry => 1,
            VarChar | Bit | NewDecimal | Json | VarString | String => 2,
            _ => 0,
        }
    }
}

/// Reads one column value off `cursor` according to `column_type`/`metadata`.
/// `metadata` is whatever bytes TABLE_MAP recorded for this column (0 when
/// the type carries none).
pub fn decode_value(cursor: &mut Cursor<&[u8]>, column_type: ColumnType, metadata: u16) -> Result<Value, ReError> {
    use ColumnType::*;
    match column_type {
        Null => Ok(Value::Null),
        Tiny => Ok(Value::Int(cursor.read_i8()? as i64)),
        Short => Ok(Value::Int(cursor.read_i16::<LittleEndian>()? as i64)),
        Int24 => Ok(Value::Int(cursor.read_i24::<LittleEndian>()? as i64)),
        Long => Ok(Value::Int(cursor.read_i32::<LittleEndian>()? as i64)),
        LongLong => Ok(Value::Int(cursor.read_i64::<LittleEndian>()?)),
        Year => Ok(Value::Int(1900 + cursor.read_u8()? as i64)),
        Float => Ok(Value::Float(cursor.read_f32::<LittleEndian>()? as f64)),
        Double => Ok(Value::Float(cursor.read_f64::<LittleEndian>()?)),
        Timestamp => {
            let seconds = cursor.read_u32::<LittleEndian>()? as i64;
            Ok(Value::DateTime(format_unix_seconds(seconds)))
        }
        Timestamp2 => {
            let seconds = cursor.read_u32::<BigEndian>()? as i64;
            let _millis = parse_fractional_part(cursor, metadata)? / 1000;
            Ok(Value::DateTime(format_unix_seconds(seconds)))
        }
        Date => {
            let value = cursor.read_u24::<LittleEndian>()?;
            let day = value % (1 << 5);
            let month = (value >> 5) % (1 << 4);
            let year = value >> 9;
            Ok(Value::DateTime(format!("{year:04}-{month:02}-{day:02}")))
        }
        Time => {
            let mut value = cursor.read_i24::<LittleEndian>()?;
            if value < 0 {
                return Err(ReError::Error("negative TIME values are not supported".into()));
            }
            let second = value % 100;
            value /= 100;
            let minute = value % 100;
            value /= 100;
            let hour = value;
            Ok(Value::DateTime(format!("{hour:02}:{minute:02}:{second:02}")))
        }
        Time2 => {
            let value = cursor.read_u24::<BigEndian>()?;
            let _millis = parse_fractional_part(cursor, metadata)? / 1000;
            let negative = ((value >> 23) & 1) == 0;
            if negative {
                return Err(ReError::Error("negative TIME values are not supported".into()));
            }
            let hour = (value >> 12) % (1 << 10);
            let minute = (value >> 6) % (1 << 6);
            let second = value % (1 << 6);
            Ok(Value::DateTime(format!("{hour:02}:{minute:02}:{second:02}")))
        }
        DateTime => {
            let mut value = cursor.read_u64::<LittleEndian>()?;
            let second = value % 100;
            value /= 100;
            let minute = value % 100;
            value /= 100;
            let hour = value % 100;
            value /= 100;
            let day = value % 100;
            value /= 100;
            let month = value % 100;
            value /= 100;
            let year = value;
            Ok(Value::DateTime(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            )))
        }
        DateTime2 => {
            let value = cursor.read_uint::<BigEndian>(5)?;
            let _millis = parse_fractional_part(cursor, metadata)? / 1000;
            // 1 sign bit (always set). 17 bits year*13+month. 5 bits day. 5 bits hour. 6 bits minute. 6 bits second.
            let year_month = (value >> 22) % (1 << 17);
            let year = year_month / 13;
            let month = year_month % 13;
            let day = (value >> 17) % (1 << 5);
            let hour = (value >> 12) % (1 << 5);
            let minute = (value >> 6) % (1 << 6);
            let second = value % (1 << 6);
            Ok(Value::DateTime(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            )))
        }
        NewDecimal => {
            let precision = (metadata & 0xFF) as u8;
            let scale = ((metadata >> 8) & 0xFF) as u8;
            Ok(Value::Decimal(decode_new_decimal(cursor, precision, scale)?))
        }
        VarChar | VarString => {
            let max_len = metadata;
            let len = if max_len > 255 {
                cursor.read_u16::<LittleEndian>()? as usize
            } else {
                cursor.read_u8()? as usize
            };
            let mut buf = vec![0u8; len];
            cursor.read_exact(&mut buf)?;
            Ok(Value::String(String::from_utf8_lossy(&buf).into_owned()))
        }
        String | Enum | Set => {
            // `metadata` packs (real_type << 8 | pack_len) for the STRING family;
            // treat it as an opaque length-prefixed blob, which covers ENUM/SET too.
            let len_bytes = ((metadata >> 8) & 0xFF) as u8;
            let len = if len_bytes > 1 || metadata >= 256 {
                cursor.read_u16::<LittleEndian>()? as usize
            } else {
                cursor.read_u8()? as usize
            };
            let mut buf = vec![0u8; len];
            cursor.read_exact(&mut buf)?;
            Ok(Value::String(String::from_utf8_lossy(&buf).into_owned()))
        }
        TinyBlob | MediumBlob | LongBlob | Blob | Geometry | Json => {
            let len_bytes = metadata.max(1) as usize;
            let mut raw_len = [0u8; 4];
            cursor.read_exact(&mut raw_len[..len_bytes])?;
            let len = u32::from_le_bytes(raw_len) as usize;
            let mut buf = vec![0u8; len];
            cursor.read_exact(&mut buf)?;
            Ok(Value::Bytes(buf))
        }
        Bit => {
            let bytes1 = (metadata & 0xFF) as u32;
            let bytes2 = ((metadata >> 8) & 0xFF) as u32;
            let len = ((bytes1 + 7) / 8 + (bytes2 + 7) / 8) as usize;
            let mut buf = vec![0u8; len];
            cursor.read_exact(&mut buf)?;
            Ok(Value::Bytes(buf))
        }
        Decimal | NewDate => Err(ReError::UnsupportedFormatError(format!("{column_type:?} is not produced by modern servers"))),
    }
}

fn format_unix_seconds(seconds: i64) -> String {
    DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| seconds.to_string())
}

/// fsp-aware fractional-seconds tail shared by TIMESTAMP2/DATETIME2/TIME2.
fn parse_fractional_part(cursor: &mut Cursor<&[u8]>, metadata: u16) -> Result<u64, ReError> {
    let length = (metadata + 1) / 2;
    if length == 0 {
        return Ok(0);
    }
    let fraction = cursor.read_uint::<BigEndian>(length as usize)?;
    Ok(fraction * u64::pow(100, 3 - length as u32))
}

const DIG_PER_DEC1: u8 = 9;
const DIG_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

fn digits_to_bytes(digits: u8) -> usize {
    DIG_TO_BYTES[digits.min(9) as usize]
}

/// Decodes MySQL's packed-BCD NEWDECIMAL wire format into a decimal literal string.
///
/// ref: `decimal2bin`/`bin2decimal` in `strings/decimal.c`.
fn decode_new_decimal(cursor: &mut Cursor<&[u8]>, precision: u8, scale: u8) -> Result<String, ReError> {
    if precision == 0 {
        return Ok("0".to_string());
    }

    let integral_digits = precision - scale;
    let integral_groups = (integral_digits + DIG_PER_DEC1 - 1) / DIG_PER_DEC1;
    let fractional_groups = (scale + DIG_PER_DEC1 - 1) / DIG_PER_DEC1;

    let mut size = 0usize;
    for i in 0..integral_groups {
        let digits = if i == 0 { ((integral_digits - 1) % DIG_PER_DEC1) + 1 } else { DIG_PER_DEC1 };
        size += digits_to_bytes(digits);
    }
    for i in 0..fractional_groups {
        let digits = if i == fractional_groups - 1 { ((scale - 1) % DIG_PER_DEC1) + 1 } else { DIG_PER_DEC1 };
        size += digits_to_bytes(digits);
    }

    let mut bytes = vec![0u8; size];
    cursor.read_exact(&mut bytes)?;

    let is_negative = (bytes[0] & 0x80) == 0;
    if is_negative {
        for byte in &mut bytes {
            *byte = !*byte;
        }
    } else {
        bytes[0] &= 0x7F;
    }

    let mut idx = 0usize;
    let mut integral_parts = Vec::new();
    for i in 0..integral_groups {
        let digits = if i == 0 { ((integral_digits - 1) % DIG_PER_DEC1) + 1 } else { DIG_PER_DEC1 };
        let width = digits_to_bytes(digits);
        let group = read_group(&bytes[idx..idx + width])?;
        integral_parts.push(if i == 0 { group.to_string() } else { format!("{group:0width$}", width = digits as usize) });
        idx += width;
    }
    if integral_digits == 0 {
        integral_parts.push("0".to_string());
    }

    let mut result = integral_parts.join("");
    if scale > 0 {
        result.push('.');
        let mut fractional_parts = Vec::new();
        for i in 0..fractional_groups {
            let digits = if i == fractional_groups - 1 { ((scale - 1) % DIG_PER_DEC1) + 1 } else { DIG_PER_DEC1 };
            let width = digits_to_bytes(digits);
            let group = read_group(&bytes[idx..idx + width])?;
            fractional_parts.push(format!("{group:0width$}", width = digits as usize));
            idx += width;
        }
        result.push_str(&fractional_parts.join(""));
    }

    if is_negative {
        result = format!("-{result}");
    }
    Ok(result)
}

fn read_group(bytes: &[u8]) -> Result<u32, ReError> {
    let mut cursor = Cursor::new(bytes);
    Ok(match bytes.len() {
        1 => bytes[0] as u32,
        2 => cursor.read_u16::<BigEndian>()? as u32,
        3 => cursor.read_u24::<BigEndian>()?,
        4 => cursor.read_u32::<BigEndian>()?,
        other => return Err(ReError::Error(format!("invalid decimal group width {other}"))),
    })
}
