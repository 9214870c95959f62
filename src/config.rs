//! Configuration management for railchain

use crate::blockchain::{LedgerSettings, DEFAULT_INITIAL_BALANCE};
use crate::error::ChainError;
use crate::miner::{Difficulty, DEFAULT_DIFFICULTY_PREFIX, DEFAULT_REWARD_RATIO};
use crate::transaction::codec::{DEFAULT_RAIL_FENCE_KEY, MAX_RAIL_FENCE_KEY};
use crate::transaction::TransactionCodec;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// URL announced to peers after mining. Falls back to the request's Host header.
    #[serde(default)]
    pub advertise_url: Option<String>,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            advertise_url: None,
            bootstrap_peers: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_rail_fence_key")]
    pub rail_fence_key: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            rail_fence_key: default_rail_fence_key(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_difficulty_prefix")]
    pub difficulty_prefix: String,
    #[serde(default = "default_reward_ratio")]
    pub reward_ratio: f64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            difficulty_prefix: default_difficulty_prefix(),
            reward_ratio: default_reward_ratio(),
        }
    }
}

impl Config {
    /// Ledger tunables derived from this configuration.
    pub fn ledger_settings(&self) -> Result<LedgerSettings, ChainError> {
        Ok(LedgerSettings {
            initial_balance: self.ledger.initial_balance,
            codec: TransactionCodec::new(self.ledger.rail_fence_key),
            difficulty: Difficulty::new(self.miner.difficulty_prefix.clone())?,
        })
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if !(2..=MAX_RAIL_FENCE_KEY).contains(&self.ledger.rail_fence_key) {
            return Err(ChainError::ConfigError(format!(
                "ledger.rail_fence_key must be between 2 and {}",
                MAX_RAIL_FENCE_KEY
            )));
        }
        if !self.ledger.initial_balance.is_finite() || self.ledger.initial_balance < 0.0 {
            return Err(ChainError::ConfigError(
                "ledger.initial_balance must be a non-negative number".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.miner.reward_ratio) {
            return Err(ChainError::ConfigError(
                "miner.reward_ratio must be between 0 and 1".to_string(),
            ));
        }
        if self.network.request_timeout_secs == 0 {
            return Err(ChainError::ConfigError(
                "network.request_timeout_secs must be positive".to_string(),
            ));
        }
        Difficulty::new(self.miner.difficulty_prefix.clone())?;
        Ok(())
    }
}

pub fn parse_config(config_str: &str) -> Result<Config, ChainError> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

/// Loads `path`, or defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(path)?;
    parse_config(&config_str)
}

fn default_api_port() -> u16 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_initial_balance() -> f64 {
    DEFAULT_INITIAL_BALANCE
}

fn default_rail_fence_key() -> usize {
    DEFAULT_RAIL_FENCE_KEY
}

fn default_difficulty_prefix() -> String {
    DEFAULT_DIFFICULTY_PREFIX.to_string()
}

fn default_reward_ratio() -> f64 {
    DEFAULT_REWARD_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.network.api_port, 5000);
        assert_eq!(config.ledger.initial_balance, 100.0);
        assert_eq!(config.ledger.rail_fence_key, 2);
        assert_eq!(config.miner.difficulty_prefix, "0000");
        assert_eq!(config.miner.reward_ratio, 0.1);
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
            [network]
            bootstrap_peers = ["http://127.0.0.1:5001"]

            [miner]
            difficulty_prefix = "00"
            "#,
        )
        .unwrap();
        assert_eq!(config.network.bootstrap_peers.len(), 1);
        assert_eq!(config.network.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.ledger_settings().unwrap().difficulty.prefix(), "00");
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse_config("[ledger]\nrail_fence_key = 1").is_err());
        assert!(parse_config("[ledger]\nrail_fence_key = 65").is_err());
        assert!(parse_config("[ledger]\nrail_fence_key = 64").is_ok());
        assert!(parse_config("[ledger]\ninitial_balance = -1.0").is_err());
        assert!(parse_config("[miner]\nreward_ratio = 2.0").is_err());
        assert!(parse_config("[miner]\ndifficulty_prefix = \"zz\"").is_err());
        assert!(parse_config("[network]\napi_port = \"x\"").is_err());
    }
}
