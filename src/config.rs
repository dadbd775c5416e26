//! Server configuration file.

use crate::db::Computer;
use serde::Deserialize;
use std::{net::Ipv4Addr, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of the TOML file handed to `-f`.
///
/// ```toml
/// rest_port = 8888
/// agent_port = 8889
/// keepalive_slots = 32
/// api_token = "secret"
///
/// [[database.computers]]
/// ip = "192.168.2.10"
/// id = 1
/// name = "lab-a-01"
/// center = 1
/// room = 2
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Port the administrative REST tooling connects to.
    pub rest_port: u16,
    /// Port the agent fleet connects to.
    pub agent_port: u16,
    /// Size of the keepalive slot table.
    #[serde(default = "default_keepalive_slots")]
    pub keepalive_slots: usize,
    /// Token REST clients must present in `Authorization`; unauthenticated
    /// operation when absent.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Static inventory loaded into the in-memory database.
    #[serde(default)]
    pub computers: Vec<InventoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryEntry {
    pub ip: Ipv4Addr,
    #[serde(flatten)]
    pub computer: Computer,
}

impl Config {
    /// Loads and parses the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

fn default_keepalive_slots() -> usize {
    32
}

#[cfg(test)]
mod loading {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn full_file() {
        let file = write_config(
            r#"
            rest_port = 8888
            agent_port = 8889
            keepalive_slots = 8
            api_token = "secret"

            [[database.computers]]
            ip = "192.168.2.10"
            id = 1
            name = "lab-a-01"
            center = 1
            room = 2
            "#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.rest_port, 8888);
        assert_eq!(config.agent_port, 8889);
        assert_eq!(config.keepalive_slots, 8);
        assert_eq!(config.api_token.as_deref(), Some("secret"));

        let entry = &config.database.computers[0];
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 2, 10));
        assert_eq!(entry.computer.name, "lab-a-01");
        assert_eq!(entry.computer.procedure, 0);
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let file = write_config("rest_port = 1000\nagent_port = 1001\n");

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.keepalive_slots, 32);
        assert_eq!(config.api_token, None);
        assert!(config.database.computers.is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = Config::load(Path::new("/nonexistent/fleetgate.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let file = write_config("rest_port = \"not a port\"");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
