use serde::{Deserialize, Serialize};

/// The four validated config blobs: cluster, mysql, services, kafka. Parsing YAML/TOML into
/// these structs is the job of the `cdc` binary crate; everything downstream
/// of here only ever sees validated values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub mysql: MysqlConfig,
    pub services: ServicesConfig,
    pub kafka: KafkaConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Address of the external KV store (etcd endpoints).
    pub endpoints: Vec<String>,
    pub service_ip: String,
    pub service_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_server_id")]
    pub server_id: u32,
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_server_id() -> u32 {
    65535
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            charset: default_charset(),
            server_id: default_server_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    Broadcast,
    Weighted,
}

impl Default for GroupMode {
    fn default() -> Self {
        GroupMode::Broadcast
    }
}

/// A named collection of subscribers/nodes sharing filters and a mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub mode: GroupMode,
    /// Regex patterns matched against `table`; empty = match all.
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpNodeConfig {
    pub url: String,
    #[serde(default)]
    pub weight: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpGroupConfig {
    #[serde(flatten)]
    pub group: GroupConfig,
    pub nodes: Vec<HttpNodeConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpServiceConfig {
    pub enable: bool,
    #[serde(default)]
    pub listen_addr: String,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSocketServiceConfig {
    pub enable: bool,
    #[serde(default)]
    pub listen_addr: String,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub http: Vec<HttpGroupConfig>,
    #[serde(default)]
    pub tcp: TcpServiceConfig,
    #[serde(default)]
    pub websocket: WebSocketServiceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub enable: bool,
    #[serde(default)]
    pub brokers: Vec<String>,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub filter: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
cluster:
  endpoints: ["http://127.0.0.1:2379"]
  service_ip: "10.0.0.1"
  service_port: 9000
mysql:
  host: "127.0.0.1"
  port: 3306
  user: "root"
  password: "secret"
services:
  http:
    - name: "default"
      filters: []
      nodes:
        - url: "http://r/"
kafka:
  enable: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cluster.service_port, 9000);
        assert_eq!(config.mysql.charset, "utf8mb4");
        assert_eq!(config.services.http.len(), 1);
        assert_eq!(config.services.http[0].nodes[0].url, "http://r/");
    }
}
