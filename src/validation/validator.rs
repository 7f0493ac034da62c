use crate::{AdmissionError, Transaction, state::ChainState};
use tracing::{debug, warn};

/// Checks a transaction against a pending chain state
///
/// Stateless; the batch builder hands in its accumulated pending state so each
/// admission sees the effects of earlier admissions in the same batch.
pub struct Validator {
    block_time_ms: u64,
}

impl Validator {
    /// Validator for a block stamped `block_time_ms`
    pub fn new(block_time_ms: u64) -> Self {
        Self { block_time_ms }
    }

    /// Validate a transaction
    /// Returns Ok(()) if it can be applied to `pending`, Err(AdmissionError) otherwise
    pub fn validate(&self, pending: &ChainState, tx: &Transaction) -> Result<(), AdmissionError> {
        debug!("Validating transaction {:?}", tx.id());

        // 1. Time window
        self.check_time_window(tx)?;

        // 2. Replay
        self.check_nonce(pending, tx)?;

        // 3. Inputs and outputs
        self.check_inputs(pending, tx)?;
        self.check_outputs(pending, tx)?;

        Ok(())
    }

    fn check_time_window(&self, tx: &Transaction) -> Result<(), AdmissionError> {
        if tx.valid_at(self.block_time_ms) {
            return Ok(());
        }
        if self.block_time_ms < tx.min_time_ms() {
            return Err(AdmissionError::TooEarly {
                min_time_ms: tx.min_time_ms(),
                block_time_ms: self.block_time_ms,
            });
        }
        Err(AdmissionError::Expired {
            max_time_ms: tx.max_time_ms(),
            block_time_ms: self.block_time_ms,
        })
    }

    fn check_nonce(&self, pending: &ChainState, tx: &Transaction) -> Result<(), AdmissionError> {
        if tx.inputs().is_empty() && pending.has_nonce(&tx.id()) {
            warn!("Replay of transaction {:?}", tx.id());
            return Err(AdmissionError::Duplicate(tx.id()));
        }
        Ok(())
    }

    fn check_inputs(&self, pending: &ChainState, tx: &Transaction) -> Result<(), AdmissionError> {
        match tx.inputs().iter().find(|input| !pending.is_unspent(input)) {
            Some(input) => {
                warn!("Transaction {:?} spends unknown output {:?}", tx.id(), input);
                Err(AdmissionError::UnknownInput(*input))
            }
            None => Ok(()),
        }
    }

    fn check_outputs(&self, pending: &ChainState, tx: &Transaction) -> Result<(), AdmissionError> {
        match tx.output_ids().find(|output| pending.is_unspent(output)) {
            Some(output) => Err(AdmissionError::OutputExists(output)),
            None => Ok(()),
        }
    }
}
