//! YAML client configuration: log level/destination and the peer cap
//! the engine enforces. Missing or absent config file means defaults.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const DEFAULT_MAX_PEERS: usize = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            max_peers: default_max_peers(),
        }
    }
}

impl Config {
    /// Loads config from `path`, if given and present; otherwise returns
    /// the default configuration rather than erroring.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }
}
