//! Batch Coordinator Module
//!
//! Owns the single open batch and serializes everything that touches it.
//!
//! # Lifecycle
//! 1. `admit` on an idle coordinator opens a batch against the ledger's
//!    current state and arms a one-shot timer for it
//! 2. Further `admit` calls append to that batch
//! 3. The timer calls `finalize`, which seals the batch, commits it to the
//!    ledger, publishes the block, and returns the coordinator to idle
//!
//! `admit` and `finalize` take the same lock, so no transaction is admitted
//! to a batch that is being sealed. The lock is held across the commit; the
//! commit is bounded by `commit_timeout_ms`.
//!
//! The current phase is also published on a `watch` channel, so `status()`
//! never waits on the lock while a batch opens or commits.
//!
//! A failed seal or commit leaves the chain state unknown. The coordinator
//! then halts: every later `admit` fails and `halted()` resolves.

use crate::{
    Block, BlockHeader, CoordinatorError, FinalizeError, InitializationError, Transaction,
    batch::{BatchBuilder, SealedBatch, trigger},
    config::{BatchConfig, EmptyBatchPolicy},
    feed::BlockFeed,
    ledger::Ledger,
};
use ethers::types::H256;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

/// Result of a successful admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub tx_id: H256,
    /// Sequence number of the batch the transaction landed in
    pub batch: u64,
    /// Position of the transaction within that batch
    pub position: usize,
}

/// Snapshot of the coordinator phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum CoordinatorStatus {
    Idle,
    Open {
        batch: u64,
        pending: usize,
        seal_at_ms: u64,
    },
    /// Timer fired; the batch is being sealed and committed
    Sealing {
        batch: u64,
    },
    Halted {
        reason: String,
    },
}

/// Batch coordinator
///
/// Cheap to clone; clones share the same open batch.
#[derive(Clone)]
pub struct BatchCoordinator {
    core: Arc<Core>,
}

struct OpenBatch {
    id: u64,
    builder: BatchBuilder,
}

enum Phase {
    Idle,
    Open(OpenBatch),
    Halted(String),
}

struct Slot {
    phase: Phase,
    /// Sequence number the next opened batch gets
    next_batch: u64,
}

/// State shared between the coordinator handles and the armed timer
pub(super) struct Core {
    ledger: Arc<dyn Ledger>,
    feed: Arc<BlockFeed>,
    config: BatchConfig,
    slot: Mutex<Slot>,
    status: watch::Sender<CoordinatorStatus>,
}

impl BatchCoordinator {
    /// Creates an idle coordinator
    ///
    /// # Arguments
    /// * `ledger` - Ledger the batches are opened against and committed to
    /// * `feed` - Feed committed blocks are published on
    /// * `config` - Batch interval, size limit, commit timeout and empty-batch policy
    pub fn new(ledger: Arc<dyn Ledger>, feed: Arc<BlockFeed>, config: BatchConfig) -> Self {
        let (status, _) = watch::channel(CoordinatorStatus::Idle);
        Self {
            core: Arc::new(Core {
                ledger,
                feed,
                config,
                slot: Mutex::new(Slot {
                    phase: Phase::Idle,
                    next_batch: 1,
                }),
                status,
            }),
        }
    }

    /// Admit a transaction into the open batch, opening one if needed
    ///
    /// # Returns
    /// * `Ok(Admission)` - the transaction's place in the final ordering is fixed
    /// * `Err(Initialization)` - no batch could be opened; the coordinator stays idle
    /// * `Err(Admission)` - the transaction conflicts with the batch; the batch stays open
    /// * `Err(Halted)` - a previous commit failed
    pub async fn admit(&self, tx: Transaction) -> Result<Admission, CoordinatorError> {
        let mut slot = self.core.slot.lock().await;

        let mut open = match std::mem::replace(&mut slot.phase, Phase::Idle) {
            Phase::Halted(reason) => {
                slot.phase = Phase::Halted(reason.clone());
                return Err(CoordinatorError::Halted(reason));
            }
            Phase::Open(open) => open,
            Phase::Idle => {
                let open = self.core.open_batch(slot.next_batch).await?;
                slot.next_batch += 1;
                trigger::arm(self.core.clone(), open.id, self.core.config.interval());
                open
            }
        };

        let tx_id = tx.id();
        let batch = open.id;
        let added = open.builder.add(tx);
        slot.phase = Phase::Open(open);
        self.core.publish_status(&slot.phase);

        let position = added?;
        info!("added tx {:?} to pending block of batch {} at position {}", tx_id, batch, position);
        Ok(Admission {
            tx_id,
            batch,
            position,
        })
    }

    /// Last published phase of the coordinator
    ///
    /// Does not take the coordinator lock, so it answers immediately even
    /// while a commit is in flight.
    pub fn status(&self) -> CoordinatorStatus {
        self.core.status.borrow().clone()
    }

    /// Resolves with the failure reason once the coordinator halts
    pub async fn halted(&self) -> String {
        let mut status = self.core.status.subscribe();
        loop {
            if let CoordinatorStatus::Halted { reason } = &*status.borrow_and_update() {
                return reason.clone();
            }
            if status.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn feed(&self) -> &Arc<BlockFeed> {
        &self.core.feed
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.core.ledger
    }
}

impl Core {
    fn publish_status(&self, phase: &Phase) {
        let status = match phase {
            Phase::Idle => CoordinatorStatus::Idle,
            Phase::Open(open) => CoordinatorStatus::Open {
                batch: open.id,
                pending: open.builder.len(),
                seal_at_ms: open.builder.timestamp_ms(),
            },
            Phase::Halted(reason) => CoordinatorStatus::Halted {
                reason: reason.clone(),
            },
        };
        self.status.send_replace(status);
    }

    /// Open a batch against the ledger's current state
    ///
    /// Seeds the ledger with the genesis header first if it is empty.
    async fn open_batch(&self, id: u64) -> Result<OpenBatch, InitializationError> {
        let mut state = self.ledger.current_state().await?;
        if state.header.is_none() {
            let genesis = BlockHeader::genesis(self.config.genesis_timestamp_ms);
            self.ledger.initialize_if_empty(&genesis).await?;
            info!("initialized empty chain state with genesis {:?}", genesis.id());
            state = self.ledger.current_state().await?;
        }

        // Block timestamps must strictly increase even if the wall clock does not.
        let tip_ms = state.header.as_ref().map_or(0, |h| h.timestamp_ms);
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let seal_at_ms = now_ms
            .saturating_add(self.config.interval_ms)
            .max(tip_ms.saturating_add(1));

        let builder = BatchBuilder::open(&state, seal_at_ms)?.with_limit(self.config.max_batch_txs);
        info!(
            "starting new block (batch {}), will commit at {}",
            id,
            chrono::DateTime::<chrono::Utc>::from_timestamp_millis(seal_at_ms as i64)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| seal_at_ms.to_string())
        );

        Ok(OpenBatch { id, builder })
    }

    /// Seal, commit and publish batch `batch`
    ///
    /// Invoked once by the timer armed when the batch opened.
    pub(super) async fn finalize(&self, batch: u64) {
        let mut slot = self.slot.lock().await;

        let open = match std::mem::replace(&mut slot.phase, Phase::Idle) {
            Phase::Open(open) if open.id == batch => open,
            other => {
                warn!("timer for batch {} fired with no matching open batch", batch);
                slot.phase = other;
                return;
            }
        };

        if open.builder.is_empty() && self.config.empty_batches == EmptyBatchPolicy::Skip {
            info!("batch {} closed without transactions, no block built", batch);
            self.publish_status(&slot.phase);
            return;
        }
        self.status.send_replace(CoordinatorStatus::Sealing { batch });

        match self.seal_and_commit(open.builder).await {
            Ok(block) => {
                // Readers see the coordinator idle once they hold the block
                self.publish_status(&slot.phase);
                let readers = self.feed.write(block.clone());
                debug!("block {} published to {} reader(s)", block.height(), readers);
                info!(
                    "committed block {} with {} transaction(s)",
                    block.height(),
                    block.transactions.len()
                );
            }
            Err(e) => {
                error!("batch {}: {}", batch, e);
                slot.phase = Phase::Halted(e.to_string());
                self.publish_status(&slot.phase);
            }
        }
    }

    async fn seal_and_commit(&self, builder: BatchBuilder) -> Result<Arc<Block>, FinalizeError> {
        let SealedBatch { block, state } = builder.seal()?;

        let timeout = self.config.commit_timeout();
        tokio::time::timeout(timeout, self.ledger.commit_block(&block, &state))
            .await
            .map_err(|_| FinalizeError::CommitTimeout(timeout))??;

        Ok(Arc::new(block))
    }
}
