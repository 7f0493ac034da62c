use crate::error::DecodeError;
use ethers::types::{Bytes, H256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Only transaction and block version understood by this sequencer.
pub const CURRENT_VERSION: u64 = 1;

/// Transaction as it arrives on the wire
///
/// Decoded from the JSON body of `POST /submit`. It carries no identifier;
/// the id is derived from the contents by [`Transaction::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub version: u64,
    pub runlimit: u64,
    /// Earliest block timestamp (ms) this transaction may land in. 0 = no bound.
    #[serde(default)]
    pub min_time_ms: u64,
    /// Latest block timestamp (ms) this transaction may land in. 0 = no bound.
    #[serde(default)]
    pub max_time_ms: u64,
    /// Ids of unspent outputs consumed by this transaction
    #[serde(default)]
    pub inputs: Vec<H256>,
    /// Payloads of the outputs created by this transaction
    #[serde(default)]
    pub outputs: Vec<Bytes>,
}

/// Decoded, immutable transaction
///
/// Identified by the keccak256 hash of its canonical encoding. Fields are
/// private so a transaction can't change after its id was computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: H256,
    version: u64,
    runlimit: u64,
    min_time_ms: u64,
    max_time_ms: u64,
    inputs: Vec<H256>,
    outputs: Vec<Bytes>,
}

impl Transaction {
    /// Build a transaction from its wire form
    ///
    /// # Errors
    /// Returns a `DecodeError` when the transaction is structurally invalid:
    /// unknown version, zero runlimit, nothing to do, a repeated input, an
    /// inverted time window, or an input-less transaction without an expiry
    /// (its id could otherwise be replayed forever).
    pub fn new(raw: RawTransaction) -> Result<Self, DecodeError> {
        if raw.version != CURRENT_VERSION {
            return Err(DecodeError::UnsupportedVersion(raw.version));
        }
        if raw.runlimit == 0 {
            return Err(DecodeError::ZeroRunlimit);
        }
        if raw.inputs.is_empty() && raw.outputs.is_empty() {
            return Err(DecodeError::Empty);
        }
        if raw.max_time_ms != 0 && raw.min_time_ms > raw.max_time_ms {
            return Err(DecodeError::InvalidTimeRange {
                min: raw.min_time_ms,
                max: raw.max_time_ms,
            });
        }
        if raw.inputs.is_empty() && raw.max_time_ms == 0 {
            return Err(DecodeError::UnboundedIssuance);
        }

        let mut seen = HashSet::with_capacity(raw.inputs.len());
        for input in &raw.inputs {
            if !seen.insert(*input) {
                return Err(DecodeError::DuplicateInput(*input));
            }
        }

        let mut tx = Transaction {
            id: H256::zero(),
            version: raw.version,
            runlimit: raw.runlimit,
            min_time_ms: raw.min_time_ms,
            max_time_ms: raw.max_time_ms,
            inputs: raw.inputs,
            outputs: raw.outputs,
        };
        tx.id = H256::from(keccak256(tx.encode()));
        Ok(tx)
    }

    /// Decode a JSON request body straight into a transaction
    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawTransaction = serde_json::from_slice(bytes)?;
        Self::new(raw)
    }

    pub fn id(&self) -> H256 {
        self.id
    }

    pub fn min_time_ms(&self) -> u64 {
        self.min_time_ms
    }

    pub fn max_time_ms(&self) -> u64 {
        self.max_time_ms
    }

    pub fn inputs(&self) -> &[H256] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Bytes] {
        &self.outputs
    }

    /// Ids of the outputs this transaction creates, in output order
    pub fn output_ids(&self) -> impl Iterator<Item = H256> + '_ {
        (0..self.outputs.len()).map(|index| output_id(self.id, index as u32))
    }

    /// Whether a block with timestamp `timestamp_ms` may include this transaction
    pub fn valid_at(&self, timestamp_ms: u64) -> bool {
        let after_min = timestamp_ms >= self.min_time_ms;
        let before_max = self.max_time_ms == 0 || timestamp_ms <= self.max_time_ms;
        after_min && before_max
    }

    /// Canonical encoding hashed into the transaction id
    fn encode(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.version.to_be_bytes());
        data.extend_from_slice(&self.runlimit.to_be_bytes());
        data.extend_from_slice(&self.min_time_ms.to_be_bytes());
        data.extend_from_slice(&self.max_time_ms.to_be_bytes());

        data.extend_from_slice(&(self.inputs.len() as u32).to_be_bytes());
        for input in &self.inputs {
            data.extend_from_slice(input.as_bytes());
        }

        data.extend_from_slice(&(self.outputs.len() as u32).to_be_bytes());
        for output in &self.outputs {
            data.extend_from_slice(&(output.len() as u32).to_be_bytes());
            data.extend_from_slice(output);
        }
        data
    }
}

/// Id of output `index` of transaction `tx_id`
pub fn output_id(tx_id: H256, index: u32) -> H256 {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(tx_id.as_bytes());
    data.extend_from_slice(&index.to_be_bytes());
    H256::from(keccak256(data))
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u64,
    pub height: u64,
    pub previous_block_id: H256,
    pub timestamp_ms: u64,
    /// Hash over the ordered transaction ids
    pub transactions_root: H256,
    /// Commitment to the chain state after applying the block
    pub state_root: H256,
}

impl BlockHeader {
    /// Header the chain state is initialized with before the first block
    pub fn genesis(timestamp_ms: u64) -> Self {
        Self {
            version: CURRENT_VERSION,
            height: 0,
            previous_block_id: H256::zero(),
            timestamp_ms,
            transactions_root: transactions_root(&[]),
            state_root: crate::state::ChainState::default().state_root(),
        }
    }

    pub fn id(&self) -> H256 {
        let mut data = Vec::with_capacity(8 * 3 + 32 * 3);
        data.extend_from_slice(&self.version.to_be_bytes());
        data.extend_from_slice(&self.height.to_be_bytes());
        data.extend_from_slice(self.previous_block_id.as_bytes());
        data.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        data.extend_from_slice(self.transactions_root.as_bytes());
        data.extend_from_slice(self.state_root.as_bytes());
        H256::from(keccak256(data))
    }
}

/// Hash over the ordered transaction ids of a block
pub fn transactions_root(transactions: &[Transaction]) -> H256 {
    let mut data = Vec::with_capacity(transactions.len() * 32);
    for tx in transactions {
        data.extend_from_slice(tx.id().as_bytes());
    }
    H256::from(keccak256(data))
}

/// Committed (or about to be committed) block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn id(&self) -> H256 {
        self.header.id()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }
}
