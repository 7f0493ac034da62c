//! Batch Trigger Module
//!
//! One-shot finalize timer. Armed exactly once per batch, when the batch
//! opens; on firing it calls back into the coordinator, which takes the same
//! lock as admission before sealing.

use super::coordinator::Core;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Schedule `finalize(batch)` on `core` after `after`
pub(super) fn arm(core: Arc<Core>, batch: u64, after: Duration) {
    debug!("armed finalize timer for batch {} in {:?}", batch, after);
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        core.finalize(batch).await;
    });
}
