use crate::{BlockHeader, Transaction};
use ethers::types::H256;
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Chain state snapshot
///
/// Cloned by the batch builder when a batch opens; the clone accumulates the
/// effects of admitted transactions and becomes the new snapshot on commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Header of the latest committed block (or the genesis header).
    /// `None` until the ledger is initialized.
    pub header: Option<BlockHeader>,
    unspent: BTreeSet<H256>,
    /// Ids of input-less transactions mapped to their expiry (ms)
    nonces: BTreeMap<H256, u64>,
}

impl ChainState {
    /// Height of the tip, if the state has a header
    pub fn height(&self) -> Option<u64> {
        self.header.as_ref().map(|h| h.height)
    }

    /// Apply a header without transactions (used to seed genesis)
    pub fn apply_header(&mut self, header: BlockHeader) {
        self.header = Some(header);
    }

    pub fn is_unspent(&self, output: &H256) -> bool {
        self.unspent.contains(output)
    }

    pub fn has_nonce(&self, tx_id: &H256) -> bool {
        self.nonces.contains_key(tx_id)
    }

    /// Apply an already-validated transaction
    ///
    /// Spends its inputs, creates its outputs, and records the nonce of an
    /// input-less transaction until it expires.
    pub fn apply_transaction(&mut self, tx: &Transaction) {
        for input in tx.inputs() {
            self.unspent.remove(input);
        }
        self.unspent.extend(tx.output_ids());
        if tx.inputs().is_empty() {
            self.nonces.insert(tx.id(), tx.max_time_ms());
        }
    }

    /// Drop nonces whose transactions can no longer be included at `timestamp_ms`
    pub fn prune_nonces(&mut self, timestamp_ms: u64) {
        self.nonces.retain(|_, expiry| *expiry >= timestamp_ms);
    }

    /// Commitment over the unspent set and the nonce set
    ///
    /// The header is not part of the commitment; the header commits to this root.
    pub fn state_root(&self) -> H256 {
        let mut data = Vec::with_capacity(self.unspent.len() * 32 + self.nonces.len() * 40 + 16);
        data.extend_from_slice(&(self.unspent.len() as u64).to_be_bytes());
        for id in &self.unspent {
            data.extend_from_slice(id.as_bytes());
        }
        data.extend_from_slice(&(self.nonces.len() as u64).to_be_bytes());
        for (id, expiry) in &self.nonces {
            data.extend_from_slice(id.as_bytes());
            data.extend_from_slice(&expiry.to_be_bytes());
        }
        H256::from(keccak256(data))
    }
}
