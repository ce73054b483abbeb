//! Configuration management for catcoin
//!
//! Settings come from an optional TOML file. Every field has a default, so a
//! missing file or a partial one is fine.

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::io;
use std::path::Path;

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "CATCOIN_CONFIG";

/// Config file used when `CATCOIN_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "catcoin.toml";

/// Longest possible zero prefix of a hex SHA-256 digest
const MAX_DIFFICULTY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Parameters of the ledger itself
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ChainConfig {
    /// Leading zero hex digits required of a mined block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    /// Amount credited to the miner of each block
    #[serde(default = "default_mining_reward")]
    pub mining_reward: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "chain.difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.difficulty
            )));
        }

        if !(self.mining_reward.is_finite() && self.mining_reward > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "chain.mining_reward must be a positive number, got {}",
                self.mining_reward
            )));
        }

        Ok(())
    }
}

impl Config {
    /// Parses and validates a TOML document
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(source)?;
        config.chain.validate()?;
        Ok(config)
    }

    /// Loads the config at `path`, falling back to defaults when it does not exist
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(source) => Self::from_toml(&source),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Loads the config named by `CATCOIN_CONFIG`, or `catcoin.toml`
pub fn load_config() -> Result<Config, ConfigError> {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    Config::load_from(path)
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_difficulty() -> usize {
    2
}

fn default_mining_reward() -> f64 {
    100.0
}
