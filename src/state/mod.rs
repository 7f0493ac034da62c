//! State Management Module
//!
//! This module holds the chain state snapshot that batches are opened against
//! and that the ledger commits together with each block: the unspent output
//! set plus the replay nonces of input-less transactions.

mod chain;
pub use chain::ChainState;
