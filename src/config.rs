//! Configuration Module
//!
//! This module defines all configuration structures for the sequencer.
//! Configuration is loaded from TOML files and parsed using serde.

use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Main configuration structure
///
/// Contains all configuration sections for the sequencer.
/// Loaded from a TOML file (e.g., config/default.toml).
///
/// # Example TOML
/// ```toml
/// [batch]
/// interval_ms = 5000
/// max_batch_txs = 10000
/// commit_timeout_ms = 2000
/// empty_batches = "commit"
///
/// [api]
/// host = "127.0.0.1"
/// port = 8545
///
/// [ledger]
/// backend = "sqlite"
/// url = "sqlite://chain.db"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub batch: BatchConfig,
    pub api: ApiConfig,
    pub ledger: LedgerConfig,
}

/// Batch creation configuration
///
/// Controls when and how batches are sealed.
///
/// # Fields
/// - `interval_ms`: Time between the first admission of a batch and its seal
/// - `max_batch_txs`: Maximum number of transactions per batch
/// - `commit_timeout_ms`: Upper bound on a ledger commit; exceeding it halts the sequencer
/// - `empty_batches`: What to do when a batch window closes with no transactions
/// - `genesis_timestamp_ms`: Timestamp of the genesis header
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_batch_txs")]
    pub max_batch_txs: usize,
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
    #[serde(default)]
    pub empty_batches: EmptyBatchPolicy,
    #[serde(default)]
    pub genesis_timestamp_ms: u64,
}

impl BatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_batch_txs: default_max_batch_txs(),
            commit_timeout_ms: default_commit_timeout_ms(),
            empty_batches: EmptyBatchPolicy::default(),
            genesis_timestamp_ms: 0,
        }
    }
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_max_batch_txs() -> usize {
    10_000
}

fn default_commit_timeout_ms() -> u64 {
    2000
}

/// Policy for a batch window that closes without any admitted transaction
///
/// A batch only opens on a submission, so this happens when every
/// submission in the window was rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyBatchPolicy {
    /// Seal, commit and publish an empty block
    #[default]
    Commit,
    /// Discard the batch; no block is produced
    Skip,
}

/// API server configuration
///
/// # Fields
/// - `host`: IP address to bind to (e.g., "127.0.0.1" or "0.0.0.0")
/// - `port`: TCP port to listen on (e.g., 8545)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Ledger backend configuration
///
/// # Fields
/// - `backend`: "memory" or "sqlite"
/// - `url`: Database connection URL for the sqlite backend (e.g., "sqlite://chain.db")
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    Sqlite,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was successfully loaded and parsed
    /// * `Err` if the file couldn't be read or the TOML is invalid
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;

        if config.batch.interval_ms == 0 {
            anyhow::bail!("batch.interval_ms must be greater than zero");
        }
        if config.batch.commit_timeout_ms == 0 {
            anyhow::bail!("batch.commit_timeout_ms must be greater than zero");
        }
        if config.batch.max_batch_txs == 0 {
            anyhow::bail!("batch.max_batch_txs must be greater than zero");
        }
        if config.ledger.backend == LedgerBackend::Sqlite && config.ledger.url.is_none() {
            anyhow::bail!("ledger.url is required for the sqlite backend");
        }

        Ok(config)
    }
}
