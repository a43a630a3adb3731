//! Configuration management for ForgeLedger

use crate::error::ChainError;
use crate::miner::MAX_DIFFICULTY;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "forge.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_genesis_balance")]
    pub genesis_balance: u64,
    #[serde(default = "default_true")]
    pub faucet_enabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api_port: default_api_port(),
            data_dir: default_data_dir(),
            peers: Vec::new(),
            log_level: default_log_level(),
            genesis_balance: default_genesis_balance(),
            faucet_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NonceStrategy {
    #[default]
    Sequential,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_block_transaction_limit")]
    pub block_transaction_limit: usize,
    #[serde(default = "default_reward")]
    pub reward: u64,
    #[serde(default = "default_attempt_budget")]
    pub attempt_budget: u64,
    /// Pause between mining cycles, e.g. "100ms" or "2s".
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub nonce_strategy: NonceStrategy,
    #[serde(default)]
    pub beneficiary_address: Option<String>,
}

impl MiningConfig {
    pub fn interval(&self) -> Result<Duration, ChainError> {
        humantime::parse_duration(&self.interval).map_err(|e| {
            ChainError::ConfigError(format!("mining.interval '{}': {}", self.interval, e))
        })
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            difficulty: default_difficulty(),
            block_transaction_limit: default_block_transaction_limit(),
            reward: default_reward(),
            attempt_budget: default_attempt_budget(),
            interval: default_interval(),
            nonce_strategy: NonceStrategy::default(),
            beneficiary_address: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConsensusConfig {
    #[serde(default)]
    pub verify_signatures: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_true")]
    pub deploy_samples: bool,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            gas_limit: default_gas_limit(),
            deploy_samples: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MempoolConfig {
    #[serde(default = "default_mempool_size")]
    pub max_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_mempool_size(),
        }
    }
}

impl Config {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml(source: &str) -> Result<Self, ChainError> {
        toml::from_str(source).map_err(|e| ChainError::ConfigError(e.to_string()))
    }

    /// Apply the environment knobs the node has always honoured.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ChainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MINING_DIFFICULTY") {
            self.mining.difficulty = value.trim().parse().map_err(|_| {
                ChainError::ConfigError(format!("MINING_DIFFICULTY is not a number: {}", value))
            })?;
        }
        if let Some(value) = lookup("PEERS") {
            self.node.peers = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.node.log_level = value.trim().to_lowercase();
        }
        if let Some(value) = lookup("NODE_PORT") {
            self.node.api_port = value.trim().parse().map_err(|_| {
                ChainError::ConfigError(format!("NODE_PORT is not a valid port: {}", value))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.mining.block_transaction_limit == 0 {
            return Err(ChainError::ConfigError(
                "mining.block_transaction_limit must be at least 1".to_string(),
            ));
        }
        if self.mining.attempt_budget == 0 {
            return Err(ChainError::ConfigError(
                "mining.attempt_budget must be at least 1".to_string(),
            ));
        }
        if self.mining.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "mining.difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.mining.difficulty
            )));
        }
        if self.node.node_id.is_empty() {
            return Err(ChainError::ConfigError("node.node_id must be set".to_string()));
        }
        self.mining.interval()?;
        Ok(())
    }
}

/// Load configuration from `path` (absent file means defaults), then apply
/// environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config, ChainError> {
    let mut config = match fs::read_to_string(path) {
        Ok(source) => Config::from_toml(&source)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(e.into()),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn default_node_id() -> String {
    "node-1".to_string()
}

fn default_api_port() -> u16 {
    5000
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|dir| dir.join("forgeledger").to_string_lossy().into_owned())
        .unwrap_or_else(|| "./data".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_genesis_balance() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_difficulty() -> u32 {
    4
}

fn default_block_transaction_limit() -> usize {
    5
}

fn default_reward() -> u64 {
    100
}

fn default_attempt_budget() -> u64 {
    10_000
}

fn default_interval() -> String {
    "100ms".to_string()
}

fn default_gas_limit() -> u64 {
    100_000
}

fn default_mempool_size() -> usize {
    1000
}
