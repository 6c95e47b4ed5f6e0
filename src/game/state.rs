//! Channel State Definitions
//!
//! The canonical `GameState` record both replicas sign, plus the move and
//! snapshot types built around it. Purely local bookkeeping (move history,
//! events) lives on the channel, never in the signed record.

use serde::{Serialize, Deserialize};

use crate::core::address::Address;
use crate::core::hash::{hex_hash, StateHash, ZERO_HASH};
use crate::network::signing::StateSignature;
use crate::proof::public_inputs::{CallData, MoveProof, PlacementProof};

// =============================================================================
// PHASE
// =============================================================================

/// Lifecycle phase of a local channel replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Constructed, nothing committed.
    Created,
    /// Local placement published, waiting for the opponent's.
    AwaitingBothPlacements,
    /// Genesis agreed, latest state dual-signed.
    Active,
    /// Latest transition signed locally, counter-signature outstanding.
    MoveProposed,
    /// Escalated to the arbiter.
    Disputed,
    /// Terminal.
    Ended,
}

// =============================================================================
// PLAYER SLOT
// =============================================================================

/// Which of the two fixed seats a participant occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seat {
    /// Creator; moves first.
    Player1,
    /// Joiner.
    Player2,
}

impl Seat {
    /// The other seat.
    pub fn other(self) -> Self {
        match self {
            Seat::Player1 => Seat::Player2,
            Seat::Player2 => Seat::Player1,
        }
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// The channel's single canonical record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Game identifier.
    pub game_id: String,
    /// Transport room / channel identifier.
    pub channel_id: String,
    /// Strictly increasing; +1 per mutation.
    pub nonce: u64,
    /// Participant expected to guess next.
    pub current_turn: Address,
    /// Resolved moves.
    pub move_count: u64,
    /// First participant.
    pub player1: Address,
    /// Second participant.
    pub player2: Address,
    /// Player 1's board commitment.
    #[serde(with = "hex_hash")]
    pub player1_ship_commitment: StateHash,
    /// Player 2's board commitment.
    #[serde(with = "hex_hash")]
    pub player2_ship_commitment: StateHash,
    /// Player 1's board Merkle root.
    #[serde(with = "hex_hash")]
    pub player1_merkle_root: StateHash,
    /// Player 2's board Merkle root.
    #[serde(with = "hex_hash")]
    pub player2_merkle_root: StateHash,
    /// Hits scored by player 1.
    pub player1_hits: u8,
    /// Hits scored by player 2.
    pub player2_hits: u8,
    /// Monotonic false -> true.
    pub game_ended: bool,
    /// Set once, when a hit counter reaches the threshold.
    pub winner: Option<Address>,
    /// Output of the latest move proof.
    #[serde(with = "hex_hash")]
    pub last_move_hash: StateHash,
    /// Advisory wall-clock marker (ms); excluded from the signed hash.
    pub timestamp: u64,
}

impl GameState {
    /// Empty pre-genesis state.
    pub fn empty() -> Self {
        Self {
            game_id: String::new(),
            channel_id: String::new(),
            nonce: 0,
            current_turn: Address::ZERO,
            move_count: 0,
            player1: Address::ZERO,
            player2: Address::ZERO,
            player1_ship_commitment: ZERO_HASH,
            player2_ship_commitment: ZERO_HASH,
            player1_merkle_root: ZERO_HASH,
            player2_merkle_root: ZERO_HASH,
            player1_hits: 0,
            player2_hits: 0,
            game_ended: false,
            winner: None,
            last_move_hash: ZERO_HASH,
            timestamp: 0,
        }
    }

    /// Seat of an address, if it is a participant.
    pub fn seat_of(&self, address: &Address) -> Option<Seat> {
        if *address == self.player1 {
            Some(Seat::Player1)
        } else if *address == self.player2 {
            Some(Seat::Player2)
        } else {
            None
        }
    }

    /// Address in a seat.
    pub fn player(&self, seat: Seat) -> Address {
        match seat {
            Seat::Player1 => self.player1,
            Seat::Player2 => self.player2,
        }
    }

    /// Hits scored by a seat.
    pub fn hits(&self, seat: Seat) -> u8 {
        match seat {
            Seat::Player1 => self.player1_hits,
            Seat::Player2 => self.player2_hits,
        }
    }

    pub(crate) fn hits_mut(&mut self, seat: Seat) -> &mut u8 {
        match seat {
            Seat::Player1 => &mut self.player1_hits,
            Seat::Player2 => &mut self.player2_hits,
        }
    }

    /// Board commitment held by a seat.
    pub fn commitment(&self, seat: Seat) -> StateHash {
        match seat {
            Seat::Player1 => self.player1_ship_commitment,
            Seat::Player2 => self.player2_ship_commitment,
        }
    }

    /// Board Merkle root held by a seat.
    pub fn merkle_root(&self, seat: Seat) -> StateHash {
        match seat {
            Seat::Player1 => self.player1_merkle_root,
            Seat::Player2 => self.player2_merkle_root,
        }
    }

    /// The participant who is not `address`.
    pub fn opponent_of(&self, address: &Address) -> Option<Address> {
        self.seat_of(address).map(|seat| self.player(seat.other()))
    }
}

// =============================================================================
// MOVES
// =============================================================================

/// A revealed guess and its proved outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    /// Guessed column.
    pub x: u8,
    /// Guessed row.
    pub y: u8,
    /// Proved answer.
    pub is_hit: bool,
    /// When the defender answered (ms).
    pub timestamp: u64,
}

/// Both players' signatures over one snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePair {
    /// Player 1's signature.
    pub player1: StateSignature,
    /// Player 2's signature.
    pub player2: StateSignature,
}

/// An append-only record of one resolved move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// The move.
    #[serde(rename = "move")]
    pub mv: Move,
    /// Signatures over the resulting state.
    pub signatures: SignaturePair,
    /// Nonce of the resulting state.
    pub nonce: u64,
    /// Typed-data hash of the resulting state.
    #[serde(with = "hex_hash")]
    pub state_hash: StateHash,
    /// Defender's move proof.
    pub proof: MoveProof,
    /// The proof's arbiter encoding.
    pub call_data: CallData,
}

// =============================================================================
// SIGNED SNAPSHOTS
// =============================================================================

/// A state with its typed-data hash and whichever signatures are present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedState {
    /// The snapshot.
    pub state: GameState,
    /// Typed-data digest of `state`.
    #[serde(with = "hex_hash")]
    pub state_hash: StateHash,
    /// Player 1's signature, once given.
    pub player1_signature: Option<StateSignature>,
    /// Player 2's signature, once given.
    pub player2_signature: Option<StateSignature>,
}

impl SignedState {
    /// Both participants have signed.
    pub fn is_fully_signed(&self) -> bool {
        self.player1_signature.is_some() && self.player2_signature.is_some()
    }

    /// Signature in a seat.
    pub fn signature(&self, seat: Seat) -> Option<&StateSignature> {
        match seat {
            Seat::Player1 => self.player1_signature.as_ref(),
            Seat::Player2 => self.player2_signature.as_ref(),
        }
    }

    /// Store a signature in a seat.
    pub fn set_signature(&mut self, seat: Seat, signature: StateSignature) {
        match seat {
            Seat::Player1 => self.player1_signature = Some(signature),
            Seat::Player2 => self.player2_signature = Some(signature),
        }
    }

    /// Both signatures, if present.
    pub fn signature_pair(&self) -> Option<SignaturePair> {
        Some(SignaturePair {
            player1: self.player1_signature?,
            player2: self.player2_signature?,
        })
    }
}

// =============================================================================
// GENESIS
// =============================================================================

/// One participant's published bootstrap values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSetup {
    /// Participant address.
    pub address: Address,
    /// Board commitment.
    #[serde(with = "hex_hash")]
    pub commitment: StateHash,
    /// Board Merkle root.
    #[serde(with = "hex_hash")]
    pub merkle_root: StateHash,
    /// Placement proof.
    pub proof: PlacementProof,
}

/// Inputs to `create_game`. Both replicas must supply identical values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSetup {
    /// Game identifier.
    pub game_id: String,
    /// Transport room identifier.
    pub room_id: String,
    /// First mover.
    pub player1: PlayerSetup,
    /// Second mover.
    pub player2: PlayerSetup,
}
