//! Message passing runtime and process management code.
//!
//! The runtime record tells a process who it is (its rank), how many
//! processes were started with it, and where to reach each one of them. It is
//! handed over by the executor through the environment or a YAML file.
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use log::debug;
use serde::{Deserialize, Serialize};
use smpi_base::{Error, Rank, Result};

/// Environment variable holding the rank of this process.
pub const RANK_VAR: &str = "SMPI_RANK";

/// Environment variable holding the number of processes.
pub const SIZE_VAR: &str = "SMPI_SIZE";

/// Environment variable holding the comma separated `host:port` list.
pub const CONN_LIST_VAR: &str = "SMPI_CONN_LIST";

/// Environment variable pointing at a YAML configuration file.
pub const CONFIG_VAR: &str = "SMPI_CONFIG";

/// Bootstrap configuration as written by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Current rank
    pub rank: Rank,

    /// Number of processes; defaults to the length of `peers`
    #[serde(default)]
    pub size: Option<usize>,

    /// List of `host:port` addresses, one per rank
    #[serde(default)]
    pub peers: Vec<String>,
}

impl Config {
    /// Read the configuration from the environment.
    ///
    /// If `SMPI_CONFIG` is set the named YAML file is used, otherwise the
    /// `SMPI_RANK`, `SMPI_SIZE` and `SMPI_CONN_LIST` variables.
    pub fn from_env() -> Result<Config> {
        if let Ok(path) = env::var(CONFIG_VAR) {
            return Config::from_file(path);
        }
        let rank = env::var(RANK_VAR)
            .map_err(|_| Error::Config(format!("missing {RANK_VAR} in environment")))?
            .parse()
            .map_err(|_| Error::Config(format!("invalid {RANK_VAR}")))?;
        let size = match env::var(SIZE_VAR) {
            Ok(size) => Some(
                size.parse()
                    .map_err(|_| Error::Config(format!("invalid {SIZE_VAR}")))?,
            ),
            Err(_) => None,
        };
        let peers = env::var(CONN_LIST_VAR)
            .map(|list| parse_conn_list(&list))
            .unwrap_or_default();
        Ok(Config { rank, size, peers })
    }

    /// Parse a YAML configuration.
    pub fn from_yaml<R: Read>(reader: R) -> Result<Config> {
        serde_yaml::from_reader(reader).map_err(|err| Error::Config(err.to_string()))
    }

    /// Load a YAML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        debug!("loading configuration from {}", path.display());
        let f = File::open(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        Config::from_yaml(f)
    }
}

/// Split a comma separated connection list.
pub fn parse_conn_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validated bootstrap record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    rank: Rank,
    size: usize,
    peers: Vec<String>,
}

impl Runtime {
    /// Validate a configuration.
    pub fn new(config: Config) -> Result<Runtime> {
        let size = config.size.unwrap_or(config.peers.len());
        if size == 0 {
            return Err(Error::Config("process group is empty".to_string()));
        }
        if config.rank < 0 || config.rank as usize >= size {
            return Err(Error::Config(format!(
                "rank {} outside of a group of {size}",
                config.rank
            )));
        }
        if config.peers.len() != size {
            return Err(Error::Config(format!(
                "{} peer addresses given for {size} processes",
                config.peers.len()
            )));
        }
        Ok(Runtime {
            rank: config.rank,
            size,
            peers: config.peers,
        })
    }

    /// Read and validate the configuration from the environment.
    pub fn from_env() -> Result<Runtime> {
        Runtime::new(Config::from_env()?)
    }

    /// Return number of members in the process group.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Return the ID of this process.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Return the addresses of all processes, indexed by rank.
    pub fn peers(&self) -> &[String] {
        &self.peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_config_defaults_size_to_peer_count() {
        let yaml = "rank: 1\npeers:\n  - 127.0.0.1:7000\n  - 127.0.0.1:7001\n";
        let config = Config::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(config.size, None);
        let runtime = Runtime::new(config).unwrap();
        assert_eq!(runtime.size(), 2);
        assert_eq!(runtime.rank(), 1);
        assert_eq!(runtime.peers()[1], "127.0.0.1:7001");
    }

    #[test]
    fn rank_outside_group_is_rejected() {
        let config = Config {
            rank: 2,
            size: None,
            peers: parse_conn_list("a:1,b:2"),
        };
        assert!(matches!(Runtime::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn peer_count_must_match_size() {
        let config = Config {
            rank: 0,
            size: Some(3),
            peers: parse_conn_list("a:1, b:2,"),
        };
        assert!(matches!(Runtime::new(config), Err(Error::Config(_))));
    }
}
