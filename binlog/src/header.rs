use byteorder::{LittleEndian, ReadBytesExt};
use common::err::decode_error::ReError;
use std::io::Cursor;

/// Fixed 19-byte header in front of every binlog event.
///
/// ```text
/// timestamp   0:4
/// event_type  4:1
/// server_id   5:4
/// event_length 9:4
/// next_position 13:4
/// flags       17:2
/// ```
pub const EVENT_HEADER_LEN: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: u8,
    pub server_id: u32,
    pub event_length: u32,
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, ReError> {
        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let event_type = cursor.read_u8()?;
        let server_id = cursor.read_u32::<LittleEndian>()?;
        let event_length = cursor.read_u32::<LittleEndian>()?;
        let next_position = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        Ok(Self {
            timestamp,
            event_type,
            server_id,
            event_length,
            next_position,
            flags,
        })
    }

    pub fn event_type(&self) -> EventType {
        EventType::from(self.event_type)
    }
}

/// Subset of `enum_event_type` we actually act on; everything else is
/// forwarded to the consumer as `Unknown` and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    RotateEvent,
    FormatDescriptionEvent,
    QueryEvent,
    XidEvent,
    TableMapEvent,
    WriteRowsEventV1,
    UpdateRowsEventV1,
    DeleteRowsEventV1,
    WriteRowsEvent,
    UpdateRowsEvent,
    DeleteRowsEvent,
    GtidEvent,
    AnonymousGtidEvent,
    PreviousGtidsEvent,
    HeartbeatEvent,
    Unknown(u8),
}

impl From<u8> for EventType {
    fn from(code: u8) -> Self {
        match code {
            2 => EventType::QueryEvent,
            4 => EventType::RotateEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            19 => EventType::TableMapEvent,
            23 => EventType::WriteRowsEventV1,
            24 => EventType::UpdateRowsEventV1,
            25 => EventType::DeleteRowsEventV1,
            27 => EventType::HeartbeatEvent,
            30 => EventType::WriteRowsEvent,
            31 => EventType::UpdateRowsEvent,
            32 => EventType::DeleteRowsEvent,
            33 => EventType::GtidEvent,
            34 => EventType::AnonymousGtidEvent,
            35 => EventType::PreviousGtidsEvent,
            other => EventType::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_width_header() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&1700000000u32.to_le_bytes());
        bytes.push(19); // TABLE_MAP_EVENT
        bytes.extend_from_slice(&42u32.to_le_bytes());
        bytes.extend_from_slice(&123u32.to_le_bytes());
        bytes.extend_from_slice(&456u32.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let mut cursor = Cursor::new(bytes.as_slice());
        let header = EventHeader::parse(&mut cursor).unwrap();
        assert_eq!(header.server_id, 42);
        assert_eq!(header.event_type(), EventType::TableMapEvent);
    }
}
