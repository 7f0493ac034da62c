//! Error types
//!
//! Decode and admission errors are reported back to the submitter. Seal and
//! commit errors end up in [`FinalizeError`], which halts the coordinator.

use ethers::types::H256;
use std::time::Duration;
use thiserror::Error;

/// Inbound payload could not be turned into a transaction
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed transaction: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported transaction version {0}")]
    UnsupportedVersion(u64),
    #[error("runlimit must be non-zero")]
    ZeroRunlimit,
    #[error("transaction has neither inputs nor outputs")]
    Empty,
    #[error("min time {min} is after max time {max}")]
    InvalidTimeRange { min: u64, max: u64 },
    #[error("transaction without inputs must set max_time_ms")]
    UnboundedIssuance,
    #[error("input {0:?} is spent twice")]
    DuplicateInput(H256),
}

/// Transaction is inconsistent with the pending state of the open batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("transaction {0:?} is already in the chain or the pending batch")]
    Duplicate(H256),
    #[error("input {0:?} is not an unspent output")]
    UnknownInput(H256),
    #[error("output {0:?} already exists")]
    OutputExists(H256),
    #[error("transaction not valid until {min_time_ms}, block time is {block_time_ms}")]
    TooEarly { min_time_ms: u64, block_time_ms: u64 },
    #[error("transaction expired at {max_time_ms}, block time is {block_time_ms}")]
    Expired { max_time_ms: u64, block_time_ms: u64 },
    #[error("batch is full ({limit} transactions)")]
    BatchFull { limit: usize },
}

/// A batch could not be opened against the chain state
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("chain state has no header")]
    MissingHeader,
    #[error("block time {timestamp_ms} does not advance past tip time {tip_ms}")]
    StaleTimestamp { timestamp_ms: u64, tip_ms: u64 },
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Sealing the builder failed
#[derive(Debug, Error)]
pub enum SealError {
    #[error("block height overflow above {0}")]
    HeightOverflow(u64),
}

/// Failure reported by a ledger backend
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("chain state is not initialized")]
    Uninitialized,
    #[error("block {height} does not extend tip {tip}")]
    OutOfOrder { height: u64, tip: u64 },
    #[error("block parent {parent:?} does not match tip {tip:?}")]
    ParentMismatch { parent: H256, tip: H256 },
    #[error("{0}")]
    Backend(String),
}

/// Seal-commit-publish sequence failed; chain state is no longer known
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("building block: {0}")]
    Seal(#[from] SealError),
    #[error("committing block: {0}")]
    Commit(#[from] LedgerError),
    #[error("committing block: timed out after {0:?}")]
    CommitTimeout(Duration),
}

/// Error returned by `BatchCoordinator::admit`
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("initializing batch: {0}")]
    Initialization(#[from] InitializationError),
    #[error("adding tx to pending block: {0}")]
    Admission(#[from] AdmissionError),
    #[error("coordinator halted: {0}")]
    Halted(String),
}
