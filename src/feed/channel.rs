use crate::Block;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

/// Multi-reader broadcast of committed blocks
///
/// Every reader owns an unbounded queue, so a write never blocks the writer
/// and a slow reader never loses a block. Readers only see blocks written
/// after they were created; history is served by the ledger.
#[derive(Default)]
pub struct BlockFeed {
    readers: Mutex<Vec<mpsc::UnboundedSender<Arc<Block>>>>,
    written: AtomicU64,
}

impl BlockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `block` to every current reader
    ///
    /// Readers that were dropped are forgotten here.
    ///
    /// # Returns
    /// The number of readers the block was delivered to
    pub fn write(&self, block: Arc<Block>) -> usize {
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        readers.retain(|reader| reader.send(block.clone()).is_ok());
        self.written.fetch_add(1, Ordering::Relaxed);

        debug!(height = block.height(), readers = readers.len(), "Block published");
        readers.len()
    }

    /// Create a reader that receives every block written from now on
    pub fn new_reader(&self) -> BlockReader {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        BlockReader { receiver }
    }

    /// Total number of blocks written
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

/// Reading end of a [`BlockFeed`]
pub struct BlockReader {
    receiver: mpsc::UnboundedReceiver<Arc<Block>>,
}

impl BlockReader {
    /// Wait for the next block
    ///
    /// Returns `None` once the feed is dropped and every queued block was read.
    pub async fn recv(&mut self) -> Option<Arc<Block>> {
        self.receiver.recv().await
    }

    /// Next queued block, without waiting
    pub fn try_recv(&mut self) -> Option<Arc<Block>> {
        match self.receiver.try_recv() {
            Ok(block) => Some(block),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
