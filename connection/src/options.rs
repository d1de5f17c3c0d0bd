use std::time::Duration;

/// Settings used to connect to a MySQL/MariaDB primary as a replica.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,

    /// The id this process presents to the primary when registering as a
    /// replica. Must be unique among the primary's connected replicas.
    pub server_id: u32,

    /// Read timeout; the primary is expected to send a heartbeat at least
    /// this often while idle.
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 3306,
            username: String::new(),
            password: String::new(),
            database: None,
            server_id: 65535,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
