use std::path::Path;

use common::config::Config;
use common::err::ReError;

/// Loads the four validated config blobs out of a YAML or TOML
/// file, picked by extension — the business logic downstream of this never
/// sees the file format.
pub fn load(path: &Path) -> Result<Config, ReError> {
    let text = std::fs::read_to_string(path).map_err(|e| ReError::ConfigFileParseErr(format!("reading {}: {e}", path.display())))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text).map_err(|e| ReError::ConfigFileParseErr(format!("parsing {} as TOML: {e}", path.display()))),
        _ => serde_yaml::from_str(&text).map_err(|e| ReError::ConfigFileParseErr(format!("parsing {} as YAML: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_yaml_by_default_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdc.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
cluster:
  endpoints: ["http://127.0.0.1:2379"]
  service_ip: "10.0.0.1"
  service_port: 9000
mysql:
  host: "127.0.0.1"
  port: 3306
  user: "root"
  password: "secret"
services: {{}}
kafka:
  enable: false
"#
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.cluster.service_port, 9000);
    }

    #[test]
    fn loads_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdc.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[cluster]
endpoints = ["http://127.0.0.1:2379"]
service_ip = "10.0.0.1"
service_port = 9000

[mysql]
host = "127.0.0.1"
port = 3306
user = "root"
password = "secret"

[services]

[kafka]
enable = false
"#
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.cluster.service_port, 9000);
    }

    #[test]
    fn missing_file_is_a_config_error_not_a_panic() {
        let result = load(Path::new("/nonexistent/cdc.yaml"));
        assert!(result.is_err());
    }
}
