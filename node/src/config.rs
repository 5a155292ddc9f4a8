use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
/// Configuration parameters for the Stratum server.
pub struct StratumServerConfig {
    /// Hostname or IP address to bind the Stratum server.
    pub hostname: String,
    /// TCP port for incoming Stratum connections.
    pub port: u16,
    /// Connections beyond this many are closed as soon as they are accepted.
    pub max_connections: usize,
    /// Whether closing the server also disconnects live miners. When unset
    /// they are left to drain on their own.
    pub close_clients_on_shutdown: bool,
}

impl Default for StratumServerConfig {
    fn default() -> Self {
        Self {
            hostname: String::from("0.0.0.0"),
            port: 9985,
            max_connections: 1000,
            close_clients_on_shutdown: false,
        }
    }
}

impl StratumServerConfig {
    pub fn bind_address(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// Applies a `[host]:port` override; an empty host listens everywhere.
    pub fn set_bind_address(&mut self, address: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidBindAddress {
            address: address.to_string(),
        };
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        self.hostname = if host.is_empty() {
            String::from("0.0.0.0")
        } else {
            host.trim_start_matches('[').trim_end_matches(']').to_string()
        };
        self.port = port;
        Ok(())
    }
}

/// Everything read from the node's TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub stratum: StratumServerConfig,
}

impl NodeConfig {
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Loads the config file at `path`, expanding `~` and environment
    /// variables first.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw_path = path.to_string_lossy();
        let expanded = shellexpand::full(&raw_path).map_err(|_| ConfigError::PathExpansion {
            path: raw_path.to_string(),
        })?;
        let path = PathBuf::from(expanded.as_ref());
        let contents = std::fs::read_to_string(&path).map_err(|error| ConfigError::Io {
            path: path.clone(),
            error,
        })?;
        log::info!("Loaded config from {}", path.display());
        Self::from_toml_str(&contents, &path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = NodeConfig::from_toml_str(
            "[stratum]\nport = 3333\nmax_connections = 8\n",
            Path::new("node.toml"),
        )
        .unwrap();
        assert_eq!(config.stratum.port, 3333);
        assert_eq!(config.stratum.max_connections, 8);
        assert_eq!(config.stratum.hostname, "0.0.0.0");
        assert!(!config.stratum.close_clients_on_shutdown);
    }

    #[test]
    fn empty_file_is_default() {
        let config = NodeConfig::from_toml_str("", Path::new("node.toml")).unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.stratum.bind_address(), "0.0.0.0:9985");
    }

    #[test]
    fn bad_toml_is_reported() {
        let error = NodeConfig::from_toml_str("[stratum]\nport = \"x\"", Path::new("node.toml"))
            .unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn bind_overrides() {
        let mut config = StratumServerConfig::default();
        config.set_bind_address(":4444").unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:4444");
        config.set_bind_address("127.0.0.1:5555").unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:5555");
        config.set_bind_address("[::1]:6666").unwrap();
        assert_eq!(config.hostname, "::1");
        assert_eq!(config.bind_address(), "[::1]:6666");
        assert!(config.set_bind_address("no-port").is_err());
        assert!(config.set_bind_address("host:99999").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let error = NodeConfig::load(Path::new("/nonexistent/poolnode.toml")).unwrap_err();
        assert!(matches!(error, ConfigError::Io { .. }));
    }
}
