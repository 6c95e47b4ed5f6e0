//! Protocol Messages
//!
//! Wire format between the two channel participants. Every message is
//! wrapped in an [`Envelope`] naming the sender and the nonce of the state
//! it refers to, and serialized as JSON.

use serde::{Serialize, Deserialize};

use crate::core::address::Address;
use crate::game::state::{Move, PlayerSetup, SignedState};
use crate::network::signing::StateSignature;
use crate::proof::public_inputs::{MoveProof, WinProof};

// =============================================================================
// PEER MESSAGES
// =============================================================================

/// Messages exchanged between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Published commitment, Merkle root and placement proof.
    Placement {
        /// Sender's bootstrap values.
        setup: PlayerSetup,
    },

    /// Sender's signature over the shared genesis state.
    GenesisSignature {
        /// Signature.
        signature: StateSignature,
    },

    /// Attacker's guess.
    Guess {
        /// Column.
        x: u8,
        /// Row.
        y: u8,
    },

    /// Defender's proved answer and signature over the resulting state.
    MoveResult {
        /// Scored move.
        #[serde(rename = "move")]
        mv: Move,
        /// Move proof.
        proof: MoveProof,
        /// Defender's signature over the post-move state.
        signature: StateSignature,
        /// Present when the answer sinks the defender's last ship.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        win_proof: Option<WinProof>,
    },

    /// Signature completing a state the receiver proposed.
    CounterSignature {
        /// Signature.
        signature: StateSignature,
    },

    /// Attacker hands the turn over.
    TurnSwitch {
        /// Attacker's signature over the switched state.
        signature: StateSignature,
    },

    /// Full dual-signed snapshot for resynchronization.
    StateSync {
        /// Snapshot.
        state: SignedState,
    },
}

impl PeerMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Placement { .. } => "placement",
            PeerMessage::GenesisSignature { .. } => "genesis_signature",
            PeerMessage::Guess { .. } => "guess",
            PeerMessage::MoveResult { .. } => "move_result",
            PeerMessage::CounterSignature { .. } => "counter_signature",
            PeerMessage::TurnSwitch { .. } => "turn_switch",
            PeerMessage::StateSync { .. } => "state_sync",
        }
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Addressed, nonce-stamped message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender.
    pub from: Address,
    /// Nonce of the state the message refers to.
    pub nonce: u64,
    /// Payload.
    pub message: PeerMessage,
}

impl Envelope {
    /// Wrap a message.
    pub fn new(from: Address, nonce: u64, message: PeerMessage) -> Self {
        Self { from, nonce, message }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
