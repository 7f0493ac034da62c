//! Batch Builder Module
//!
//! Accumulates admitted transactions for one batch window and seals them
//! into a block plus the resulting chain state. Pure in-memory logic: no
//! locking, no I/O.

use crate::{
    AdmissionError, Block, BlockHeader, InitializationError, SealError, Transaction,
    state::ChainState, types::transactions_root, types::CURRENT_VERSION, validation::Validator,
};

/// Sealed batch ready to be committed
///
/// Produced once by [`BatchBuilder::seal`] and consumed by the commit.
#[derive(Debug, Clone)]
pub struct SealedBatch {
    pub block: Block,
    pub state: ChainState,
}

/// Accumulator for a single open batch
pub struct BatchBuilder {
    /// Header of the block this batch extends
    parent: BlockHeader,
    /// Base state with every admitted transaction applied
    pending: ChainState,
    /// Admitted transactions, in admission order
    transactions: Vec<Transaction>,
    /// Timestamp the sealed block will carry
    timestamp_ms: u64,
    /// Maximum number of transactions admitted to this batch
    limit: usize,
    validator: Validator,
}

impl BatchBuilder {
    /// Open a batch against `base`, to be sealed with timestamp `timestamp_ms`
    ///
    /// # Errors
    /// `InitializationError` if `base` has no header or `timestamp_ms` does not
    /// advance past the tip.
    pub fn open(base: &ChainState, timestamp_ms: u64) -> Result<Self, InitializationError> {
        let parent = base.header.clone().ok_or(InitializationError::MissingHeader)?;
        if timestamp_ms <= parent.timestamp_ms {
            return Err(InitializationError::StaleTimestamp {
                timestamp_ms,
                tip_ms: parent.timestamp_ms,
            });
        }

        Ok(Self {
            parent,
            pending: base.clone(),
            transactions: Vec::new(),
            timestamp_ms,
            limit: usize::MAX,
            validator: Validator::new(timestamp_ms),
        })
    }

    /// Cap the number of transactions this batch admits
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Add a transaction to the batch
    ///
    /// Validates against the pending state, which already reflects every
    /// earlier admission. On error the batch is unchanged.
    ///
    /// # Returns
    /// The zero-based position of the transaction in the block
    pub fn add(&mut self, tx: Transaction) -> Result<usize, AdmissionError> {
        if self.transactions.len() >= self.limit {
            return Err(AdmissionError::BatchFull { limit: self.limit });
        }
        self.validator.validate(&self.pending, &tx)?;

        self.pending.apply_transaction(&tx);
        self.transactions.push(tx);
        Ok(self.transactions.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Seal the batch into a block and the state that results from it
    ///
    /// Takes `self` by value, so a builder can only be sealed once.
    pub fn seal(self) -> Result<SealedBatch, SealError> {
        let height = self
            .parent
            .height
            .checked_add(1)
            .ok_or(SealError::HeightOverflow(self.parent.height))?;

        let mut state = self.pending;
        state.prune_nonces(self.timestamp_ms);

        let header = BlockHeader {
            version: CURRENT_VERSION,
            height,
            previous_block_id: self.parent.id(),
            timestamp_ms: self.timestamp_ms,
            transactions_root: transactions_root(&self.transactions),
            state_root: state.state_root(),
        };
        state.apply_header(header.clone());

        Ok(SealedBatch {
            block: Block {
                header,
                transactions: self.transactions,
            },
            state,
        })
    }
}
