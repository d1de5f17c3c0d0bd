use byteorder::{LittleEndian, WriteBytesExt};
use common::err::decode_error::ReError;
use std::io::{Cursor, Write};

use crate::auth::{AuthenticateCommand, HandshakePacket};
use crate::options::ConnectionOptions;
use crate::packet::PacketChannel;

const COM_QUERY: u8 = 0x03;
const COM_REGISTER_SLAVE: u8 = 0x15;
const COM_BINLOG_DUMP: u8 = 0x12;

const ERR_PACKET_HEADER: u8 = 0xFF;
const EOF_PACKET_HEADER: u8 = 0xFE;
const OK_PACKET_HEADER: u8 = 0x00;

/// A registered replica connection streaming binlog events from a primary.
///
/// Mirrors what a `mysqlbinlog --read-from-remote-server` session does:
/// handshake, authenticate, announce ourselves with `COM_REGISTER_SLAVE`,
/// then issue `COM_BINLOG_DUMP` and read events off the resulting stream
/// until the connection drops.
pub struct ReplicaConnection {
    channel: PacketChannel,
}

impl ReplicaConnection {
    pub async fn connect(options: &ConnectionOptions) -> Result<Self, ReError> {
        let mut channel = PacketChannel::connect(options).await?;
        let (packet, _seq) = channel.read_packet().await?;
        if packet.first() == Some(&ERR_PACKET_HEADER) {
            return Err(ReError::AuthenticationError(parse_err_message(&packet)));
        }
        let handshake = HandshakePacket::parse(&packet)?;

        let auth = AuthenticateCommand::new(options, &handshake);
        channel.write_packet(&auth.serialize()?).await?;

        let (response, _seq) = channel.read_packet().await?;
        match response.first() {
            Some(&OK_PACKET_HEADER) => {}
            Some(&ERR_PACKET_HEADER) => return Err(ReError::AuthenticationError(parse_err_message(&response))),
            _ => return Err(ReError::AuthenticationError("unexpected authentication response".to_string())),
        }

        let mut conn = Self { channel };
        // Without this the primary may send the legacy 1-byte (pre-5.6.1)
        // checksum-less event stream even though it computes CRC32 on disk.
        conn.query("SET @master_binlog_checksum = 'CRC32'").await?;
        Ok(conn)
    }

    async fn query(&mut self, sql: &str) -> Result<(), ReError> {
        self.channel.reset_sequence();
        let mut body = vec![COM_QUERY];
        body.extend_from_slice(sql.as_bytes());
        self.channel.write_packet(&body).await?;

        let (response, _seq) = self.channel.read_packet().await?;
        match response.first() {
            Some(&ERR_PACKET_HEADER) => Err(ReError::ConnectionError(parse_err_message(&response))),
            // OK packet, or the first packet of a result set we don't care about.
            Some(&OK_PACKET_HEADER) => Ok(()),
            _ => {
                // Column count packet: drain the column definitions, the EOF
                // that follows them, the row packets, and the closing EOF.
                loop {
                    let (packet, _) = self.channel.read_packet().await?;
                    if packet.first() == Some(&EOF_PACKET_HEADER) && packet.len() < 9 {
                        break;
                    }
                }
                loop {
                    let (packet, _) = self.channel.read_packet().await?;
                    if packet.first() == Some(&EOF_PACKET_HEADER) && packet.len() < 9 {
                        break;
                    }
                }
                Ok(())
            }
        }
    }

    /// Queries `SHOW MASTER STATUS` and returns `(file, position)`, the
    /// fallback starting point when neither the local Position Store nor
    /// the Coordinator's replicated `pos` key has anything yet.
    pub async fn show_master_status(&mut self) -> Result<(String, u64), ReError> {
        self.channel.reset_sequence();
        let mut body = vec![COM_QUERY];
        body.extend_from_slice(b"SHOW MASTER STATUS");
        self.channel.write_packet(&body).await?;

        let (first, _seq) = self.channel.read_packet().await?;
        if first.first() == Some(&ERR_PACKET_HEADER) {
            return Err(ReError::ConnectionError(parse_err_message(&first)));
        }
        let mut cursor = Cursor::new(first.as_slice());
        let column_count = read_lenenc_int(&mut cursor)?;

        for _ in 0..column_count {
            self.channel.read_packet().await?;
        }
        // Trailing EOF after the column definitions.
        loop {
            let (packet, _) = self.channel.read_packet().await?;
            if packet.first() == Some(&EOF_PACKET_HEADER) && packet.len() < 9 {
                break;
            }
        }

        let (row, _) = self.channel.read_packet().await?;
        if row.first() == Some(&EOF_PACKET_HEADER) && row.len() < 9 {
            return Err(ReError::ConnectionError("SHOW MASTER STATUS returned no rows; is binary logging enabled?".to_string()));
        }
        let mut cursor = Cursor::new(row.as_slice());
        let file = read_lenenc_string(&mut cursor)?;
        let position_text = read_lenenc_string(&mut cursor)?;
        let position = position_text
            .parse::<u64>()
            .map_err(|e| ReError::ConnectionError(format!("unparsable master status position {position_text:?}: {e}")))?;

        // Drain the remaining row(s) and trailing EOF.
        loop {
            let (packet, _) = self.channel.read_packet().await?;
            if packet.first() == Some(&EOF_PACKET_HEADER) && packet.len() < 9 {
                break;
            }
        }
        Ok((file, position))
    }

    pub async fn register_and_dump(&mut self, server_id: u32, file: &str, position: u64) -> Result<(), ReError> {
        self.register_slave(server_id).await?;
        self.request_binlog_dump(server_id, file, position).await
    }

    async fn register_slave(&mut self, server_id: u32) -> Result<(), ReError> {
        self.channel.reset_sequence();
        let mut body = vec![COM_REGISTER_SLAVE];
        body.write_u32::<LittleEndian>(server_id)?;
        body.write_u8(0)?; // hostname len
        body.write_u8(0)?; // username len
        body.write_u8(0)?; // password len
        body.write_u16::<LittleEndian>(0)?; // port
        body.write_u32::<LittleEndian>(0)?; // replication rank, unused
        body.write_u32::<LittleEndian>(0)?; // master id, unused
        self.channel.write_packet(&body).await?;

        let (response, _seq) = self.channel.read_packet().await?;
        if response.first() == Some(&ERR_PACKET_HEADER) {
            return Err(ReError::ConnectionError(parse_err_message(&response)));
        }
        Ok(())
    }

    async fn request_binlog_dump(&mut self, server_id: u32, file: &str, position: u64) -> Result<(), ReError> {
        self.channel.reset_sequence();
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);
        cursor.write_u8(COM_BINLOG_DUMP)?;
        cursor.write_u32::<LittleEndian>(position as u32)?;
        cursor.write_u16::<LittleEndian>(0)?; // flags
        cursor.write_u32::<LittleEndian>(server_id)?;
        cursor.write_all(file.as_bytes())?;
        self.channel.write_packet(&buf).await
    }

    /// Reads the next event off the stream. Returns the raw event bytes
    /// (header + body + checksum), with the protocol's leading `0x00`
    /// status byte already stripped.
    pub async fn next_event(&mut self) -> Result<Vec<u8>, ReError> {
        let (packet, _seq) = self.channel.read_packet().await?;
        match packet.first() {
            Some(&OK_PACKET_HEADER) => Ok(packet[1..].to_vec()),
            Some(&EOF_PACKET_HEADER) => Err(ReError::ConnectionError("primary closed the binlog stream".to_string())),
            Some(&ERR_PACKET_HEADER) => Err(ReError::ConnectionError(parse_err_message(&packet))),
            _ => Err(ReError::Error("unrecognized binlog network stream packet".to_string())),
        }
    }
}

/// Length-encoded integer, text protocol (MySQL internals manual §14.7.3).
fn read_lenenc_int(cursor: &mut Cursor<&[u8]>) -> Result<u64, ReError> {
    use std::io::Read;
    let mut first = [0u8; 1];
    cursor.read_exact(&mut first)?;
    match first[0] {
        0xfb => Ok(0), // NULL, treated as 0 for a column count this never applies to
        0xfc => {
            let mut buf = [0u8; 2];
            cursor.read_exact(&mut buf)?;
            Ok(u16::from_le_bytes(buf) as u64)
        }
        0xfd => {
            let mut buf = [0u8; 3];
            cursor.read_exact(&mut buf)?;
            Ok((buf[0] as u64) | (buf[1] as u64) << 8 | (buf[2] as u64) << 16)
        }
        0xfe => {
            let mut buf = [0u8; 8];
            cursor.read_exact(&mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }
        n => Ok(n as u64),
    }
}

/// Length-encoded string, text protocol.
fn read_lenenc_string(cursor: &mut Cursor<&[u8]>) -> Result<String, ReError> {
    use std::io::Read;
    let len = read_lenenc_int(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

fn parse_err_message(packet: &[u8]) -> String {
    // ERR packet: 0xFF, error_code:u16, ['#', sqlstate:5], message
    if packet.len() <= 3 {
        return "unknown MySQL error".to_string();
    }
    let rest = &packet[3..];
    let message = if rest.first() == Some(&b'#') && rest.len() > 6 { &rest[6..] } else { rest };
    String::from_utf8_lossy(message).into_owned()
}
