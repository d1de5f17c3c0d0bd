use byteorder::{LittleEndian, ReadBytesExt};
use common::err::decode_error::ReError;
use std::io::{Cursor, Read};

/// First event in every binlog file (or synthesized at stream start);
/// tells us the per-event-type post-header width so we can skip over
/// fields we don't otherwise need to parse.
#[derive(Debug, Clone)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub event_header_length: u8,
    pub post_header_lengths: Vec<u8>,
}

impl FormatDescriptionEvent {
    pub fn parse(cursor: &mut Cursor<&[u8]>, body_len: usize) -> Result<Self, ReError> {
        let binlog_version = cursor.read_u16::<LittleEndian>()?;
        let mut version_buf = [0u8; 50];
        cursor.read_exact(&mut version_buf)?;
        let server_version = std::str::from_utf8(&version_buf)
            .unwrap_or("")
            .trim_end_matches('\0')
            .to_string();
        let create_timestamp = cursor.read_u32::<LittleEndian>()?;
        let event_header_length = cursor.read_u8()?;

        // Everything already consumed: 2 + 50 + 4 + 1 = 57 bytes.
        let remaining = body_len.saturating_sub(57);
        let mut post_header_lengths = vec![0u8; remaining];
        cursor.read_exact(&mut post_header_lengths)?;

        Ok(Self {
            binlog_version,
            server_version,
            create_timestamp,
            event_header_length,
            post_header_lengths,
        })
    }

    /// `event_type` is the 1-based wire code (e.g. 19 for TABLE_MAP_EVENT).
    pub fn post_header_len(&self, event_type: u8) -> usize {
        self.post_header_lengths
            .get(event_type as usize - 1)
            .copied()
            .unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_string() {
        let mut body = vec![];
        body.extend_from_slice(&4u16.to_le_bytes());
        let mut version = b"8.0.34-log".to_vec();
        version.resize(50, 0);
        body.extend_from_slice(&version);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(19); // event_header_length
        body.extend_from_slice(&[8, 0, 0, 0, 0, 0]); // a few post-header lengths

        let mut cursor = Cursor::new(body.as_slice());
        let fd = FormatDescriptionEvent::parse(&mut cursor, body.len()).unwrap();
        assert_eq!(fd.server_version, "8.0.34-log");
        assert_eq!(fd.binlog_version, 4);
    }
}
