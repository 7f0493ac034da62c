//! This crate implements a single-authority batch sequencer. Transactions
//! submitted over HTTP are grouped into time-boxed blocks, committed to the
//! ledger, and published to every reader of the block feed.

pub mod types; // Transactions, block headers and blocks.
pub mod error; // Error taxonomy shared by all modules.
pub mod api; // HTTP endpoint for submissions, status and block lookups.
pub mod validation; // Checks transactions against the pending state of a batch.
pub mod state; // Chain state snapshot.
pub mod ledger; // Chain state and committed block storage.
pub mod feed; // Publication channel for committed blocks.
pub mod batch; // Batch building and the batch coordinator.
pub mod config; // Defines and loads system configuration.

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use error::*;
pub use config::Config;
pub use batch::BatchCoordinator;
