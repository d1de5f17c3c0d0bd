use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use common::err::decode_error::Needed;
use common::err::ReError;
use std::io::{Cursor, Write};

/// Subscriber wire protocol shared by the TCP and WebSocket back-ends
///. All frames little-endian: 4-byte total-payload-length
/// (length of cmd+body) followed by 2-byte command, then the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetPro,
    Tick,
    Event,
    Ok,
    Error,
}

impl Command {
    fn code(self) -> u16 {
        match self {
            Command::SetPro => 1,
            Command::Tick => 2,
            Command::Event => 3,
            Command::Ok => 4,
            Command::Error => 5,
        }
    }

    fn from_code(code: u16) -> Result<Self, ReError> {
        match code {
            1 => Ok(Command::SetPro),
            2 => Ok(Command::Tick),
            3 => Ok(Command::Event),
            4 => Ok(Command::Ok),
            5 => Ok(Command::Error),
            other => Err(ReError::Error(format!("unknown subscriber command code {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn set_pro(weight: u32, group: &str) -> Self {
        let mut body = Vec::with_capacity(4 + group.len());
        body.write_u32::<LittleEndian>(weight).unwrap();
        body.extend_from_slice(group.as_bytes());
        Self {
            command: Command::SetPro,
            body,
        }
    }

    pub fn tick() -> Self {
        Self {
            command: Command::Tick,
            body: vec![],
        }
    }

    pub fn event(json: &str) -> Self {
        Self {
            command: Command::Event,
            body: json.as_bytes().to_vec(),
        }
    }

    pub fn ok() -> Self {
        Self {
            command: Command::Ok,
            body: b"ok".to_vec(),
        }
    }

    pub fn error(reason: &str) -> Self {
        Self {
            command: Command::Error,
            body: reason.as_bytes().to_vec(),
        }
    }

    /// Parses the `(weight, group)` body of a SET_PRO frame. Weight must be
    /// 0..=100; out of range is the caller's job to reject with an ERROR
    /// frame and close the connection.
    pub fn parse_set_pro(&self) -> Result<(u32, String), ReError> {
        if self.command != Command::SetPro {
            return Err(ReError::Error("not a SET_PRO frame".into()));
        }
        if self.body.len() < 4 {
            return Err(ReError::Incomplete(Needed::NoEnoughData));
        }
        let mut cursor = Cursor::new(&self.body[..4]);
        let weight = cursor.read_u32::<LittleEndian>()?;
        let group = String::from_utf8(self.body[4..].to_vec())?;
        Ok((weight, group))
    }

    /// `cmd | body`, with no length prefix — used for WebSocket binary
    /// messages, where the WebSocket frame itself already carries the
    /// message boundary.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.body.len());
        out.write_u16::<LittleEndian>(self.command.code()).unwrap();
        out.write_all(&self.body).unwrap();
        out
    }

    /// `total_len(cmd+body) | cmd | body`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.body.len());
        let payload_len = (2 + self.body.len()) as u32;
        out.write_u32::<LittleEndian>(payload_len).unwrap();
        out.write_u16::<LittleEndian>(self.command.code()).unwrap();
        out.write_all(&self.body).unwrap();
        out
    }

    /// Decodes a single frame from an already length-delimited buffer
    /// (i.e. `buf` is exactly `payload_len` bytes: cmd+body, no header).
    pub fn decode_payload(buf: &[u8]) -> Result<Self, ReError> {
        if buf.len() < 2 {
            return Err(ReError::Incomplete(Needed::NoEnoughData));
        }
        let mut cursor = Cursor::new(&buf[..2]);
        let code = cursor.read_u16::<LittleEndian>()?;
        let command = Command::from_code(code)?;
        Ok(Self {
            command,
            body: buf[2..].to_vec(),
        })
    }
}
