use clap::Parser;
use std::path::PathBuf;

use crate::config::NodeConfig;
use crate::error::ConfigError;

#[derive(Parser, Debug, Clone)]
#[command(name = "poolnode", about = "Decentralized mining pool node", version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// TOML config file, `~` and environment variables are expanded
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pool bind address for stratum miners, `[host]:port`
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Maximum number of concurrent miner connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Disconnect live miners when the node shuts down
    #[arg(long)]
    pub close_clients_on_shutdown: bool,
}

impl Cli {
    /// Reads the config file, if any, and layers the command line on top.
    pub fn node_config(&self) -> Result<NodeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.stratum.set_bind_address(bind)?;
        }
        if let Some(max_connections) = self.max_connections {
            config.stratum.max_connections = max_connections;
        }
        if self.close_clients_on_shutdown {
            config.stratum.close_clients_on_shutdown = true;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "poolnode",
            "-d",
            "--bind",
            ":3333",
            "--max-connections",
            "5",
            "--close-clients-on-shutdown",
        ]);
        assert!(cli.debug);
        let config = cli.node_config().unwrap();
        assert_eq!(config.stratum.bind_address(), "0.0.0.0:3333");
        assert_eq!(config.stratum.max_connections, 5);
        assert!(config.stratum.close_clients_on_shutdown);
    }

    #[test]
    fn no_flags_is_default_config() {
        let cli = Cli::parse_from(["poolnode"]);
        assert!(!cli.debug);
        assert_eq!(cli.node_config().unwrap(), NodeConfig::default());
    }
}
