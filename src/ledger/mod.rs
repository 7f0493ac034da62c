//! Ledger Module
//!
//! The ledger owns the authoritative chain state and the committed blocks.
//! The batch coordinator only reads the current state when it opens a batch
//! and hands every sealed batch to `commit_block`.
//!
//! # Backends
//! - `MemoryLedger`: process-local, used by tests and the `memory` backend
//! - `SqliteLedger`: block and state rows written in one SQL transaction

mod memory;
mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use crate::{Block, BlockHeader, LedgerError, state::ChainState};
use async_trait::async_trait;

/// Access to the chain state and committed blocks
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Snapshot of the current chain state. Side-effect free.
    async fn current_state(&self) -> Result<ChainState, LedgerError>;

    /// Seed the chain state with `genesis` if it has no header yet
    async fn initialize_if_empty(&self, genesis: &BlockHeader) -> Result<(), LedgerError>;

    /// Atomically store `block` and make `state` the current chain state
    ///
    /// Must reject a block that does not extend the current tip, so a batch
    /// can never be applied twice or out of order.
    async fn commit_block(&self, block: &Block, state: &ChainState) -> Result<(), LedgerError>;

    /// Committed block at `height`, if any
    async fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError>;
}

/// Check that `block` extends the tip of `current`
pub(crate) fn check_extends(current: &ChainState, block: &Block) -> Result<(), LedgerError> {
    let tip = current.header.as_ref().ok_or(LedgerError::Uninitialized)?;
    if block.header.height != tip.height + 1 {
        return Err(LedgerError::OutOfOrder {
            height: block.header.height,
            tip: tip.height,
        });
    }
    if block.header.previous_block_id != tip.id() {
        return Err(LedgerError::ParentMismatch {
            parent: block.header.previous_block_id,
            tip: tip.id(),
        });
    }
    Ok(())
}
