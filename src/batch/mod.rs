//! Batch Module
//!
//! This module handles batch accumulation, sealing and commit:
//! - BatchBuilder: Accumulates transactions for one batch and seals them
//! - BatchCoordinator: Owns the open batch, admits transactions, drives seal/commit/publish
//! - Trigger: One-shot timer that finalizes a batch

mod builder;
mod trigger;
pub mod coordinator;

#[cfg(test)]
mod tests;

pub use builder::{BatchBuilder, SealedBatch};
pub use coordinator::{Admission, BatchCoordinator, CoordinatorStatus};
