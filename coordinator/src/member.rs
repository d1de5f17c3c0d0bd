use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use common::err::decode_error::Needed;
use common::err::ReError;
use std::io::Cursor;

/// `(session_id, service_ip, service_port, last_heartbeat_unix,
/// is_leader_flag)`. Only `last_heartbeat_unix` and `is_leader`
/// travel over the wire (the 9-byte heartbeat payload); the
/// rest identify which member the payload came from and are local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    pub session_id: String,
    pub service_ip: String,
    pub service_port: u16,
    pub last_heartbeat_unix: u64,
    pub is_leader: bool,
}

impl ClusterMember {
    pub fn new(session_id: impl Into<String>, service_ip: impl Into<String>, service_port: u16) -> Self {
        Self {
            session_id: session_id.into(),
            service_ip: service_ip.into(),
            service_port,
            last_heartbeat_unix: 0,
            is_leader: false,
        }
    }

    /// `8-byte little-endian unix seconds | 1-byte is-leader flag`. Bytes
    /// 4-7 of the timestamp would carry sub-second resolution if anything
    /// ever read it; nothing does, so this keeps 1-second resolution.
    pub fn encode_heartbeat(unix_seconds: u64, is_leader: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9);
        buf.write_u64::<LittleEndian>(unix_seconds).unwrap();
        buf.write_u8(is_leader as u8).unwrap();
        buf
    }

    pub fn decode_heartbeat(bytes: &[u8]) -> Result<(u64, bool), ReError> {
        if bytes.len() < 9 {
            return Err(ReError::Incomplete(Needed::NoEnoughData));
        }
        let mut cursor = Cursor::new(bytes);
        let unix_seconds = cursor.read_u64::<LittleEndian>()?;
        let is_leader = cursor.read_u8()? != 0;
        Ok((unix_seconds, is_leader))
    }
}
