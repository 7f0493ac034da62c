use super::{Ledger, check_extends};
use crate::{Block, BlockHeader, LedgerError, state::ChainState};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
struct Chain {
    state: ChainState,
    blocks: Vec<Block>,
}

/// In-memory ledger
///
/// State and blocks live behind one lock, so a commit replaces both at once.
#[derive(Default)]
pub struct MemoryLedger {
    chain: RwLock<Chain>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn current_state(&self) -> Result<ChainState, LedgerError> {
        Ok(self.chain.read().await.state.clone())
    }

    async fn initialize_if_empty(&self, genesis: &BlockHeader) -> Result<(), LedgerError> {
        let mut chain = self.chain.write().await;
        if chain.state.header.is_none() {
            chain.state.apply_header(genesis.clone());
        }
        Ok(())
    }

    async fn commit_block(&self, block: &Block, state: &ChainState) -> Result<(), LedgerError> {
        let mut chain = self.chain.write().await;
        check_extends(&chain.state, block)?;

        chain.blocks.push(block.clone());
        chain.state = state.clone();
        Ok(())
    }

    async fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        let chain = self.chain.read().await;
        Ok(chain.blocks.iter().find(|b| b.height() == height).cloned())
    }
}
