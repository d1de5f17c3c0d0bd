use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::Cursor;

use crate::err::decode_error::Needed;
use crate::err::ReError;

/// Cursor into the binlog stream: `(file, offset, event_index)`.
///
/// `event_index` is a process-local counter, reset on restart. `(file,
/// offset)` is the authoritative MySQL coordinate and is what
/// ordering/monotonicity is defined over.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub file: String,
    pub offset: u64,
    pub event_index: u64,
}

impl Position {
    pub fn new(file: impl Into<String>, offset: u64, event_index: u64) -> Self {
        Self {
            file: file.into(),
            offset,
            event_index,
        }
    }

    pub fn zero() -> Self {
        Self {
            file: String::new(),
            offset: 0,
            event_index: 0,
        }
    }

    /// Stable idempotency key for a ChangeRecord, e.g. `mysql-bin.000001:4:0`.
    pub fn event_id(&self) -> String {
        format!("{}:{}:{}", self.file, self.offset, self.event_index)
    }

    /// `file_name_len:u16 | file_name | offset:u64 | event_index:u64`, little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let name = self.file.as_bytes();
        let mut buf = Vec::with_capacity(2 + name.len() + 16);
        buf.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        buf.extend_from_slice(name);
        buf.write_u64::<LittleEndian>(self.offset).unwrap();
        buf.write_u64::<LittleEndian>(self.event_index).unwrap();
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReError> {
        let mut cursor = Cursor::new(bytes);
        let name_len = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| ReError::Incomplete(Needed::NoEnoughData))? as usize;
        let start = cursor.position() as usize;
        let end = start + name_len;
        if end > bytes.len() {
            return Err(ReError::Incomplete(Needed::NoEnoughData));
        }
        let file = String::from_utf8(bytes[start..end].to_vec())?;
        let mut cursor = Cursor::new(&bytes[end..]);
        let offset = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| ReError::Incomplete(Needed::NoEnoughData))?;
        let event_index = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| ReError::Incomplete(Needed::NoEnoughData))?;
        Ok(Self {
            file,
            offset,
            event_index,
        })
    }

    /// `(file, offset)` ordering only — `event_index` does not participate,
    /// since it resets across restarts and is not part of the monotonicity
    /// invariant.
    pub fn mysql_coordinate_cmp(&self, other: &Position) -> Ordering {
        self.file
            .cmp(&other.file)
            .then_with(|| self.offset.cmp(&other.offset))
    }
}

/// What the Binlog Consumer reports upstream as its position advances.
/// `Rotated` distinguishes a ROTATE event from ordinary row-event
/// progress so the save-cadence policy can persist
/// immediately on rotation instead of waiting for the next threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionUpdate {
    Progress(Position),
    Rotated(Position),
}

impl PositionUpdate {
    pub fn position(&self) -> &Position {
        match self {
            PositionUpdate::Progress(p) | PositionUpdate::Rotated(p) => p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_is_byte_identical() {
        let pos = Position::new("mysql-bin.000001", 4, 0);
        let encoded = pos.encode();
        let decoded = Position::decode(&encoded).unwrap();
        assert_eq!(pos, decoded);
        assert_eq!(encoded, decoded.encode());
    }

    #[test]
    fn event_id_formats_as_file_offset_index() {
        let pos = Position::new("mysql-bin.000001", 4, 0);
        assert_eq!(pos.event_id(), "mysql-bin.000001:4:0");
    }

    #[test]
    fn coordinate_ordering_ignores_event_index() {
        let a = Position::new("mysql-bin.000001", 100, 5);
        let b = Position::new("mysql-bin.000001", 100, 0);
        assert_eq!(a.mysql_coordinate_cmp(&b), Ordering::Equal);

        let c = Position::new("mysql-bin.000002", 0, 0);
        assert_eq!(a.mysql_coordinate_cmp(&c), Ordering::Less);
    }
}
