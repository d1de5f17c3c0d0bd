use byteorder::{LittleEndian, ReadBytesExt};
use common::err::decode_error::ReError;
use std::io::{Cursor, Read};

/// Marks the boundary between two binlog files; the consumer resets its
/// streaming position to `(next_file, next_position)` on receipt.
#[derive(Debug, Clone)]
pub struct RotateEvent {
    pub next_position: u64,
    pub next_file: String,
}

impl RotateEvent {
    pub fn parse(cursor: &mut Cursor<&[u8]>, body_len: usize) -> Result<Self, ReError> {
        let next_position = cursor.read_u64::<LittleEndian>()?;
        let filename_len = body_len.saturating_sub(8);
        let mut buf = vec![0u8; filename_len];
        cursor.read_exact(&mut buf)?;
        Ok(Self {
            next_position,
            next_file: String::from_utf8_lossy(&buf).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_next_file_name() {
        let mut body = vec![];
        body.extend_from_slice(&4u64.to_le_bytes());
        body.extend_from_slice(b"mysql-bin.000002");
        let mut cursor = Cursor::new(body.as_slice());
        let rotate = RotateEvent::parse(&mut cursor, body.len()).unwrap();
        assert_eq!(rotate.next_position, 4);
        assert_eq!(rotate.next_file, "mysql-bin.000002");
    }
}
