//! Proof Public Inputs
//!
//! Typed public-signal schemas for the three circuits plus the four-part
//! proof encoding the arbiter accepts as calldata. Each circuit has its own
//! signal type so a move proof can never be passed where a placement or
//! win proof is expected.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::address::Address;
use crate::core::hash::{keccak256, StateHash};
use crate::proof::verify::ProofError;

/// One 256-bit public signal / proof coordinate, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FieldElement(pub [u8; 32]);

impl FieldElement {
    /// Zero.
    pub const ZERO: FieldElement = FieldElement([0u8; 32]);

    /// Encode an integer.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Decode an integer, if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(buf))
    }

    /// Encode a bit.
    pub fn from_bool(value: bool) -> Self {
        Self::from_u64(value as u64)
    }

    /// Decode a bit; anything other than 0 or 1 is rejected.
    pub fn to_bool(&self) -> Option<bool> {
        match self.to_u64()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    /// Encode a hash as a full word.
    pub fn from_hash(hash: &StateHash) -> Self {
        Self(*hash)
    }

    /// The raw word as a hash.
    pub fn to_hash(&self) -> StateHash {
        self.0
    }

    /// Encode an address as a left-padded word.
    pub fn from_address(address: &Address) -> Self {
        Self(address.to_word())
    }

    /// Decode an address; the top 12 bytes must be zero.
    pub fn to_address(&self) -> Option<Address> {
        if self.0[..12].iter().any(|b| *b != 0) {
            return None;
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.0[12..]);
        Some(Address::new(bytes))
    }

    /// Encode a string identifier as keccak256 of its bytes.
    pub fn from_id(id: &str) -> Self {
        Self(keccak256(id.as_bytes()))
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::core::hash::from_hex(&s)
            .map(FieldElement)
            .ok_or_else(|| serde::de::Error::custom("expected 32-byte hex word"))
    }
}

/// The three circuits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Circuit {
    /// Fleet legally placed and committed.
    ShipPlacement,
    /// Hit/miss answer consistent with the committed board.
    Move,
    /// Named hit cells are ships on the committed board.
    Win,
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Circuit::ShipPlacement => write!(f, "ship_placement"),
            Circuit::Move => write!(f, "move"),
            Circuit::Win => write!(f, "win"),
        }
    }
}

/// Schema of a circuit's public signal vector.
pub trait PublicSignals: Sized + Clone + fmt::Debug {
    /// The circuit these signals belong to.
    const CIRCUIT: Circuit;

    /// Number of field elements.
    const LEN: usize;

    /// Flatten in circuit order.
    fn to_fields(&self) -> Vec<FieldElement>;

    /// Parse the circuit's output vector.
    fn from_fields(fields: &[FieldElement]) -> Result<Self, ProofError>;
}

fn check_len(circuit: Circuit, expected: usize, fields: &[FieldElement]) -> Result<(), ProofError> {
    if fields.len() != expected {
        return Err(ProofError::SignalSchema {
            circuit,
            reason: format!("expected {} signals, got {}", expected, fields.len()),
        });
    }
    Ok(())
}

fn schema_error(circuit: Circuit, what: &str) -> ProofError {
    ProofError::SignalSchema {
        circuit,
        reason: format!("{} out of range", what),
    }
}

/// Placement circuit outputs: `[commitment, merkleRoot]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementSignals {
    /// Public board commitment.
    pub commitment: FieldElement,
    /// Board Merkle root.
    pub merkle_root: FieldElement,
}

impl PublicSignals for PlacementSignals {
    const CIRCUIT: Circuit = Circuit::ShipPlacement;
    const LEN: usize = 2;

    fn to_fields(&self) -> Vec<FieldElement> {
        vec![self.commitment, self.merkle_root]
    }

    fn from_fields(fields: &[FieldElement]) -> Result<Self, ProofError> {
        check_len(Self::CIRCUIT, Self::LEN, fields)?;
        Ok(Self {
            commitment: fields[0],
            merkle_root: fields[1],
        })
    }
}

/// Move circuit signals:
/// `[newMoveHash, isHit, commitment, previousMoveHash, moveCount, gameId, playerId, x, y]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveSignals {
    /// Chained hash this move produces; becomes the next `previousMoveHash`.
    pub new_move_hash: StateHash,
    /// Proved answer.
    pub is_hit: bool,
    /// Defender's board commitment.
    pub commitment: StateHash,
    /// Hash of the previous move.
    pub previous_move_hash: StateHash,
    /// Moves resolved before this one.
    pub move_count: u64,
    /// keccak256 of the game id.
    pub game_id: FieldElement,
    /// Defender address.
    pub player: Address,
    /// Guessed column.
    pub x: u8,
    /// Guessed row.
    pub y: u8,
}

impl PublicSignals for MoveSignals {
    const CIRCUIT: Circuit = Circuit::Move;
    const LEN: usize = 9;

    fn to_fields(&self) -> Vec<FieldElement> {
        vec![
            FieldElement::from_hash(&self.new_move_hash),
            FieldElement::from_bool(self.is_hit),
            FieldElement::from_hash(&self.commitment),
            FieldElement::from_hash(&self.previous_move_hash),
            FieldElement::from_u64(self.move_count),
            self.game_id,
            FieldElement::from_address(&self.player),
            FieldElement::from_u64(self.x as u64),
            FieldElement::from_u64(self.y as u64),
        ]
    }

    fn from_fields(fields: &[FieldElement]) -> Result<Self, ProofError> {
        let c = Self::CIRCUIT;
        check_len(c, Self::LEN, fields)?;
        let coord = |f: &FieldElement, what: &str| -> Result<u8, ProofError> {
            f.to_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| schema_error(c, what))
        };
        Ok(Self {
            new_move_hash: fields[0].to_hash(),
            is_hit: fields[1].to_bool().ok_or_else(|| schema_error(c, "isHit"))?,
            commitment: fields[2].to_hash(),
            previous_move_hash: fields[3].to_hash(),
            move_count: fields[4].to_u64().ok_or_else(|| schema_error(c, "moveCount"))?,
            game_id: fields[5],
            player: fields[6].to_address().ok_or_else(|| schema_error(c, "playerId"))?,
            x: coord(&fields[7], "x")?,
            y: coord(&fields[8], "y")?,
        })
    }
}

/// Win circuit signals: `[commitment, merkleRoot, hitCount]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinSignals {
    /// Loser's board commitment.
    pub commitment: StateHash,
    /// Loser's board Merkle root.
    pub merkle_root: StateHash,
    /// Hits attested.
    pub hit_count: u64,
}

impl PublicSignals for WinSignals {
    const CIRCUIT: Circuit = Circuit::Win;
    const LEN: usize = 3;

    fn to_fields(&self) -> Vec<FieldElement> {
        vec![
            FieldElement::from_hash(&self.commitment),
            FieldElement::from_hash(&self.merkle_root),
            FieldElement::from_u64(self.hit_count),
        ]
    }

    fn from_fields(fields: &[FieldElement]) -> Result<Self, ProofError> {
        check_len(Self::CIRCUIT, Self::LEN, fields)?;
        Ok(Self {
            commitment: fields[0].to_hash(),
            merkle_root: fields[1].to_hash(),
            hit_count: fields[2]
                .to_u64()
                .ok_or_else(|| schema_error(Self::CIRCUIT, "hitCount"))?,
        })
    }
}

/// Groth16-shaped proof: two G1 points and one G2 point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    /// G1 point A.
    pub pi_a: [FieldElement; 2],
    /// G2 point B (each coordinate an Fp2 pair).
    pub pi_b: [[FieldElement; 2]; 2],
    /// G1 point C.
    pub pi_c: [FieldElement; 2],
}

/// On-chain call encoding of a proof and its public signals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallData {
    /// A.
    pub p_a: [FieldElement; 2],
    /// B, with Fp2 limbs in verifier order.
    pub p_b: [[FieldElement; 2]; 2],
    /// C.
    pub p_c: [FieldElement; 2],
    /// Public signals.
    pub pub_signals: Vec<FieldElement>,
}

impl CallData {
    /// Encode a proof for the on-chain verifier.
    ///
    /// The verifier expects each Fp2 coordinate of B as (imaginary, real).
    pub fn encode(proof: &Groth16Proof, pub_signals: Vec<FieldElement>) -> Self {
        let b = &proof.pi_b;
        Self {
            p_a: proof.pi_a,
            p_b: [[b[0][1], b[0][0]], [b[1][1], b[1][0]]],
            p_c: proof.pi_c,
            pub_signals,
        }
    }
}

/// A proof together with its parsed public signals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle<S> {
    /// The proof.
    pub proof: Groth16Proof,
    /// The typed public signals.
    pub signals: S,
}

impl<S: PublicSignals> ProofBundle<S> {
    /// Circuit this bundle belongs to.
    pub fn circuit(&self) -> Circuit {
        S::CIRCUIT
    }

    /// Flattened public signals.
    pub fn public_signals(&self) -> Vec<FieldElement> {
        self.signals.to_fields()
    }

    /// Calldata for the arbiter.
    pub fn call_data(&self) -> CallData {
        CallData::encode(&self.proof, self.public_signals())
    }
}

/// Placement proof.
pub type PlacementProof = ProofBundle<PlacementSignals>;

/// Move proof.
pub type MoveProof = ProofBundle<MoveSignals>;

/// Win proof.
pub type WinProof = ProofBundle<WinSignals>;
