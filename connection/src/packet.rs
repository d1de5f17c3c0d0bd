use crate::options::ConnectionOptions;
use byteorder::{ByteOrder, LittleEndian};
use common::err::decode_error::ReError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const PACKET_HEADER_SIZE: usize = 4;

/// Length-prefixed packet framing used by the MySQL client/server protocol:
/// a 3-byte little-endian payload length followed by a 1-byte sequence
/// number. Every read here is a suspension point — the consumer can be
/// cancelled mid-packet without leaving the socket in an inconsistent state,
/// since the next read just picks up where the last one left off.
pub struct PacketChannel {
    stream: TcpStream,
    next_seq: u8,
}

impl PacketChannel {
    pub async fn connect(options: &ConnectionOptions) -> Result<Self, ReError> {
        let address = format!("{}:{}", options.hostname, options.port);
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| ReError::ConnectionError(format!("connect to {address}: {e}")))?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream, next_seq: 0 })
    }

    pub async fn read_packet(&mut self) -> Result<(Vec<u8>, u8), ReError> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        self.stream.read_exact(&mut header).await?;
        let packet_size = LittleEndian::read_u24(&header[0..3]) as usize;
        let seq_num = header[3];

        let mut packet = vec![0u8; packet_size];
        self.stream.read_exact(&mut packet).await?;
        self.next_seq = seq_num.wrapping_add(1);
        Ok((packet, seq_num))
    }

    pub async fn write_packet(&mut self, packet: &[u8]) -> Result<(), ReError> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        LittleEndian::write_u24(&mut header[0..3], packet.len() as u32);
        header[3] = self.next_seq;
        self.stream.write_all(&header).await?;
        self.stream.write_all(packet).await?;
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(())
    }

    pub fn reset_sequence(&mut self) {
        self.next_seq = 0;
    }
}
