//! Move History
//!
//! Append-only log of dual-signed move records. Each replica keeps its own
//! copy. Dispute evidence carries it bincode-encoded together with its
//! Merkle root, and rebuttals replay the proofs a stale state omitted.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::address::Address;
use crate::core::hash::StateHash;
use crate::game::state::MoveRecord;
use crate::proof::merkle::MerkleTree;

/// History errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    /// Record nonce does not advance past the last one.
    #[error("move record nonce {got} does not follow {last}")]
    OutOfOrder {
        /// Nonce of the last stored record.
        last: u64,
        /// Nonce offered.
        got: u64,
    },

    /// bincode encoding failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// bincode decoding failed.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),
}

/// Ordered move records for one game.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveHistory {
    records: Vec<MoveRecord>,
}

impl MoveHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Nonces must strictly increase.
    pub fn push(&mut self, record: MoveRecord) -> Result<(), TranscriptError> {
        if let Some(last) = self.records.last() {
            if record.nonce <= last.nonce {
                return Err(TranscriptError::OutOfOrder {
                    last: last.nonce,
                    got: record.nonce,
                });
            }
        }
        self.records.push(record);
        Ok(())
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[MoveRecord] {
        &self.records
    }

    /// Records with a nonce above `nonce`.
    pub fn since(&self, nonce: u64) -> &[MoveRecord] {
        let start = self.records.partition_point(|r| r.nonce <= nonce);
        &self.records[start..]
    }

    /// Prefix of the history up to and including `nonce`.
    pub fn until(&self, nonce: u64) -> MoveHistory {
        let end = self.records.partition_point(|r| r.nonce <= nonce);
        MoveHistory {
            records: self.records[..end].to_vec(),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no move has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent record.
    pub fn last(&self) -> Option<&MoveRecord> {
        self.records.last()
    }

    /// Cells of `defender`'s board that were hit, in order.
    pub fn hits_against(&self, defender: &Address) -> Vec<(u8, u8)> {
        self.records
            .iter()
            .filter(|r| r.mv.is_hit && r.proof.signals.player == *defender)
            .map(|r| (r.mv.x, r.mv.y))
            .collect()
    }

    /// Merkle root over the bincode-encoded records.
    pub fn root(&self) -> Result<StateHash, TranscriptError> {
        let leaves = self
            .records
            .iter()
            .map(|r| {
                bincode::serialize(&(r.nonce, &r.mv, r.state_hash, r.proof.signals.new_move_hash))
                    .map_err(|e| TranscriptError::SerializationFailed(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MerkleTree::from_leaves(&leaves).root())
    }

    /// Serialize to bytes using bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TranscriptError> {
        bincode::serialize(self).map_err(|e| TranscriptError::SerializationFailed(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TranscriptError> {
        bincode::deserialize(data).map_err(|e| TranscriptError::DeserializationFailed(e.to_string()))
    }
}
