//! Hashing Primitives
//!
//! Two hash families are in play:
//! - SHA-256 for everything the proof circuits see: salted board
//!   commitments, the move-hash chain, the board Merkle tree.
//! - Keccak-256 for the typed-data signing layer and address derivation,
//!   matching what the arbiter contract recomputes.
//!
//! Every SHA-256 use outside the Merkle tree goes through [`StateHasher`]
//! with an explicit [`HashDomain`], so no two kinds of preimage can
//! collide.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// 32-byte digest used for state hashes, roots and commitments.
pub type StateHash = [u8; 32];

/// All-zero hash, used as the `previousMoveHash` of the first move.
pub const ZERO_HASH: StateHash = [0u8; 32];

/// Tag prepended to each hashed preimage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashDomain {
    /// `H(merkleRoot, salt)`.
    Commitment,
    /// Link of the move-hash chain.
    MoveChain,
    /// Verification key of the in-process prover.
    SimulatedKey,
    /// Proof points of the in-process prover.
    SimulatedProof,
}

impl HashDomain {
    fn tag(self) -> &'static [u8] {
        match self {
            HashDomain::Commitment => b"BATTLESHIP_COMMIT_V1",
            HashDomain::MoveChain => b"BATTLESHIP_MOVE_V1",
            HashDomain::SimulatedKey => b"BATTLESHIP_SIM_VK_V1",
            HashDomain::SimulatedProof => b"BATTLESHIP_SIM_PROOF_V1",
        }
    }
}

/// Domain-tagged SHA-256 builder. Fields are absorbed in call order;
/// integers are little-endian and strings are length-prefixed.
#[derive(Clone)]
pub struct StateHasher(Sha256);

impl StateHasher {
    /// Start a preimage in `domain`.
    pub fn new(domain: HashDomain) -> Self {
        Self(Sha256::new_with_prefix(domain.tag()))
    }

    /// Absorb raw bytes.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.0.update(data);
        self
    }

    /// Absorb another digest.
    pub fn hash(self, digest: &StateHash) -> Self {
        self.bytes(digest)
    }

    /// Absorb one byte.
    pub fn byte(self, value: u8) -> Self {
        self.bytes(&[value])
    }

    /// Absorb a u64.
    pub fn word(self, value: u64) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    /// Absorb a flag as 0/1.
    pub fn flag(self, value: bool) -> Self {
        self.byte(value as u8)
    }

    /// Absorb a string with its length in front.
    pub fn text(self, value: &str) -> Self {
        self.word(value.len() as u64).bytes(value.as_bytes())
    }

    /// Digest.
    pub fn finish(self) -> StateHash {
        self.0.finalize().into()
    }
}

/// Keccak-256 of arbitrary data.
pub fn keccak256(data: &[u8]) -> StateHash {
    keccak256_concat(&[data])
}

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256_concat(parts: &[&[u8]]) -> StateHash {
    parts
        .iter()
        .fold(Keccak256::new(), |mut k, part| {
            k.update(part);
            k
        })
        .finalize()
        .into()
}

/// `0x`-prefixed hex.
pub fn to_hex(hash: &StateHash) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parse a `0x`-prefixed (or bare) 32-byte hex string.
pub fn from_hex(s: &str) -> Option<StateHash> {
    hex::decode(s.trim_start_matches("0x")).ok()?.try_into().ok()
}

/// Serde adapter encoding a [`StateHash`] as a `0x` hex string.
pub mod hex_hash {
    use super::{from_hex, to_hex, StateHash};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as hex.
    pub fn serialize<S: Serializer>(hash: &StateHash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_hex(hash))
    }

    /// Deserialize from hex.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StateHash, D::Error> {
        let s = String::deserialize(deserializer)?;
        from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 32-byte hex string"))
    }
}
