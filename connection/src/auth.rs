use byteorder::{LittleEndian, WriteBytesExt};
use common::err::decode_error::ReError;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Write};

use crate::options::ConnectionOptions;

const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    MysqlNativePassword,
    CachingSha2Password,
}

impl AuthPlugin {
    fn from_name(name: &str) -> Self {
        match name {
            "caching_sha2_password" => AuthPlugin::CachingSha2Password,
            _ => AuthPlugin::MysqlNativePassword,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AuthPlugin::MysqlNativePassword => "mysql_native_password",
            AuthPlugin::CachingSha2Password => "caching_sha2_password",
        }
    }
}

/// The `Initial Handshake Packet` the server sends as soon as the TCP
/// connection is open.
#[derive(Debug, Clone)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub scramble: Vec<u8>,
    pub auth_plugin: AuthPlugin,
}

impl HandshakePacket {
    pub fn parse(packet: &[u8]) -> Result<Self, ReError> {
        let mut cursor = Cursor::new(packet);
        let mut u8_buf = [0u8; 1];
        cursor.read_exact(&mut u8_buf)?;
        let protocol_version = u8_buf[0];

        let server_version = read_null_term_string(&mut cursor)?;

        let mut u32_buf = [0u8; 4];
        cursor.read_exact(&mut u32_buf)?;
        let connection_id = u32::from_le_bytes(u32_buf);

        let mut scramble = vec![0u8; 8];
        cursor.read_exact(&mut scramble)?;
        cursor.read_exact(&mut [0u8; 1])?; // filler

        let mut capability_lower = [0u8; 2];
        cursor.read_exact(&mut capability_lower)?;
        cursor.read_exact(&mut [0u8; 1])?; // character set
        cursor.read_exact(&mut [0u8; 2])?; // status flags
        let mut capability_upper = [0u8; 2];
        cursor.read_exact(&mut capability_upper)?;

        let mut auth_data_len = [0u8; 1];
        cursor.read_exact(&mut auth_data_len)?;
        cursor.read_exact(&mut [0u8; 10])?; // reserved

        let scramble_len = (auth_data_len[0] as i32 - 8 - 1).max(13) as usize;
        let mut scramble_rest = vec![0u8; scramble_len];
        cursor.read_exact(&mut scramble_rest)?;
        scramble.extend_from_slice(&scramble_rest[..scramble_rest.len().saturating_sub(1)]);

        let auth_plugin_name = read_null_term_string(&mut cursor).unwrap_or_else(|_| "mysql_native_password".to_string());

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            scramble,
            auth_plugin: AuthPlugin::from_name(&auth_plugin_name),
        })
    }
}

fn read_null_term_string(cursor: &mut Cursor<&[u8]>) -> Result<String, ReError> {
    let data = cursor.get_ref();
    let start = cursor.position() as usize;
    let end = data[start..]
        .iter()
        .position(|b| *b == 0)
        .map(|p| start + p)
        .ok_or_else(|| ReError::Error("missing null terminator".to_string()))?;
    cursor.set_position(end as u64 + 1);
    Ok(String::from_utf8_lossy(&data[start..end]).into_owned())
}

/// Builds and serializes the `Handshake Response` packet authenticating
/// this connection.
pub struct AuthenticateCommand {
    client_capabilities: u32,
    username: String,
    password: String,
    database: Option<String>,
    scramble: Vec<u8>,
    auth_plugin: AuthPlugin,
}

impl AuthenticateCommand {
    pub fn new(options: &ConnectionOptions, handshake: &HandshakePacket) -> Self {
        let mut client_capabilities = CLIENT_LONG_FLAG | CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_PLUGIN_AUTH;
        if options.database.is_some() {
            client_capabilities |= CLIENT_CONNECT_WITH_DB;
        }
        Self {
            client_capabilities,
            username: options.username.clone(),
            password: options.password.clone(),
            database: options.database.clone(),
            scramble: handshake.scramble.clone(),
            auth_plugin: handshake.auth_plugin,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ReError> {
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);
        cursor.write_u32::<LittleEndian>(self.client_capabilities)?;
        cursor.write_u32::<LittleEndian>(0)?; // max packet size
        cursor.write_u8(33)?; // utf8mb4_general_ci
        for _ in 0..23 {
            cursor.write_u8(0)?;
        }
        write_null_term_string(&mut cursor, &self.username)?;

        let encrypted = encrypt_password(&self.password, &self.scramble, self.auth_plugin);
        cursor.write_u8(encrypted.len() as u8)?;
        cursor.write_all(&encrypted)?;

        if let Some(database) = &self.database {
            write_null_term_string(&mut cursor, database)?;
        }
        write_null_term_string(&mut cursor, self.auth_plugin.name())?;
        Ok(buf)
    }
}

fn write_null_term_string(cursor: &mut Cursor<&mut Vec<u8>>, s: &str) -> Result<(), ReError> {
    cursor.write_all(s.as_bytes())?;
    cursor.write_u8(0)?;
    Ok(())
}

fn encrypt_password(password: &str, scramble: &[u8], plugin: AuthPlugin) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }
    match plugin {
        AuthPlugin::MysqlNativePassword => {
            let stage1 = sha1(password.as_bytes());
            let stage2 = sha1(&stage1);
            let concat = [scramble, &stage2].concat();
            xor(&stage1, &sha1(&concat))
        }
        AuthPlugin::CachingSha2Password => {
            let stage1 = sha256(password.as_bytes());
            let stage2 = sha256(&stage1);
            let concat = [scramble, &stage2[..]].concat();
            xor(&stage1, &sha256(&concat))
        }
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().enumerate().map(|(i, byte)| byte ^ b[i % b.len()]).collect()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypts_password_deterministically() {
        let a = encrypt_password("secret", b"01234567890123456789", AuthPlugin::MysqlNativePassword);
        let b = encrypt_password("secret", b"01234567890123456789", AuthPlugin::MysqlNativePassword);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn empty_password_encrypts_to_empty() {
        assert!(encrypt_password("", b"01234567890123456789", AuthPlugin::MysqlNativePassword).is_empty());
    }
}
