use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BrokerError;

/// Top-level configuration file read by the broker binary on startup (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub broker: BrokerSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    pub logs_dir: PathBuf,
    #[serde(default)]
    pub gateway_socket: Option<PathBuf>,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub rpc: bool,
    #[serde(default)]
    pub restart: bool,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: i64,
}

fn default_max_restarts() -> i64 {
    0
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads and parses a config file, failing loudly: the caller is expected to log and exit
    /// non-zero on `Err` rather than attempt a partial startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BrokerError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| BrokerError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Resolves the gateway UDS path: the configured value, or a `broker.sock` sibling of
    /// `config_path` when unset (§6).
    pub fn gateway_socket_path(&self, config_path: &Path) -> PathBuf {
        self.broker.gateway_socket.clone().unwrap_or_else(|| {
            config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("broker.sock")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let json = r#"{
            "server": { "address": "0.0.0.0:8080" },
            "broker": { "logs_dir": "/tmp/logs", "processes": [] }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.address, "0.0.0.0:8080");
        assert_eq!(config.logging.level, "info");
        assert!(config.broker.gateway_socket.is_none());
    }

    #[test]
    fn parses_process_entry_with_restart_policy() {
        let json = r#"{
            "server": { "address": "0.0.0.0:8080" },
            "broker": {
                "logs_dir": "/tmp/logs",
                "gateway_socket": "/tmp/broker.sock",
                "processes": [
                    { "id": "cve-local", "command": "cve-local", "args": [], "rpc": true,
                      "restart": true, "max_restarts": -1 }
                ]
            },
            "logging": { "level": "debug" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let proc = &config.broker.processes[0];
        assert_eq!(proc.id, "cve-local");
        assert!(proc.rpc);
        assert_eq!(proc.max_restarts, -1);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.broker.gateway_socket,
            Some(PathBuf::from("/tmp/broker.sock"))
        );
    }

    #[test]
    fn gateway_socket_path_defaults_next_to_config_file() {
        let json = r#"{
            "server": { "address": "0.0.0.0:8080" },
            "broker": { "logs_dir": "/tmp/logs", "processes": [] }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let resolved = config.gateway_socket_path(Path::new("/etc/fabric/config.json"));
        assert_eq!(resolved, PathBuf::from("/etc/fabric/broker.sock"));
    }

    #[test]
    fn load_fails_loudly_on_missing_file() {
        let err = Config::load("/nonexistent/path/config.json").unwrap_err();
        assert!(matches!(err, BrokerError::ConfigRead { .. }));
    }

    #[test]
    fn load_fails_loudly_on_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, BrokerError::ConfigParse { .. }));
    }
}
