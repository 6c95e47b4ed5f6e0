//! Proof Gateway
//!
//! Thin adapter between the channel and an external proof system. The
//! gateway turns board secrets into typed proof bundles, checks bundles
//! received from the opponent against the context the local replica
//! expects, and encodes them as arbiter calldata.
//!
//! Generation failures are retried exactly once with identical inputs; a
//! second failure means the inputs themselves are wrong. Verification
//! failures are never retried: a bad proof from the peer is grounds for a
//! dispute.

use std::sync::Arc;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::address::Address;
use crate::core::hash::{hex_hash, HashDomain, StateHash, StateHasher};
use crate::game::board::Board;
use crate::proof::commitment::Salt;
use crate::proof::public_inputs::{
    CallData, Circuit, FieldElement, Groth16Proof, MoveProof, PlacementProof, ProofBundle,
    PublicSignals, WinProof,
};

/// Errors from proof generation and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    /// The prover could not produce a proof for these inputs.
    #[error("proof generation failed for {circuit} circuit: {reason}")]
    ProofGenerationError {
        /// Circuit being proved.
        circuit: Circuit,
        /// Prover message.
        reason: String,
    },

    /// A received proof did not verify.
    #[error("{circuit} proof failed verification")]
    ProofVerificationFailed {
        /// Circuit the proof claims to belong to.
        circuit: Circuit,
    },

    /// Public signals do not fit the circuit's schema.
    #[error("{circuit} public signals malformed: {reason}")]
    SignalSchema {
        /// Circuit whose schema was violated.
        circuit: Circuit,
        /// What was wrong.
        reason: String,
    },

    /// Proof verifies but attests to a different game context.
    #[error("{circuit} proof bound to wrong {field}")]
    ContextMismatch {
        /// Circuit.
        circuit: Circuit,
        /// Public signal that disagreed with local state.
        field: &'static str,
    },
}

/// Opaque verification key for one circuit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    /// Circuit the key verifies.
    pub circuit: Circuit,
    /// Key material.
    #[serde(with = "hex_hash")]
    pub key: StateHash,
}

/// Private and public inputs handed to the prover.
#[derive(Clone, Debug)]
pub enum CircuitInputs {
    /// Fleet placement.
    ShipPlacement {
        /// Private board.
        board: Board,
        /// Private salt.
        salt: Salt,
    },
    /// One hit/miss answer.
    Move {
        /// Private board.
        board: Board,
        /// Private salt.
        salt: Salt,
        /// Public move context.
        context: MoveContext,
        /// Answer being claimed.
        claimed_hit: bool,
    },
    /// Final win attestation.
    Win {
        /// Private board of the losing side.
        board: Board,
        /// Private salt.
        salt: Salt,
        /// Published commitment.
        commitment: StateHash,
        /// Published Merkle root.
        merkle_root: StateHash,
        /// Hits claimed.
        hit_count: u64,
        /// Cells that were hit.
        hits: Vec<(u8, u8)>,
    },
}

impl CircuitInputs {
    /// Circuit these inputs target.
    pub fn circuit(&self) -> Circuit {
        match self {
            CircuitInputs::ShipPlacement { .. } => Circuit::ShipPlacement,
            CircuitInputs::Move { .. } => Circuit::Move,
            CircuitInputs::Win { .. } => Circuit::Win,
        }
    }
}

/// Untyped prover output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawProof {
    /// The proof.
    pub proof: Groth16Proof,
    /// Public signals in circuit order.
    pub public_signals: Vec<FieldElement>,
}

/// External proof system.
pub trait ProofSystem: Send + Sync {
    /// Produce a proof and its public signals.
    fn generate_proof(&self, inputs: &CircuitInputs) -> Result<RawProof, ProofError>;

    /// Check a proof against public signals. Never panics on bad input.
    fn verify_proof(
        &self,
        key: &VerificationKey,
        public_signals: &[FieldElement],
        proof: &Groth16Proof,
    ) -> bool;

    /// Verification key published for a circuit.
    fn verification_key(&self, circuit: Circuit) -> VerificationKey;

    /// On-chain encoding of a proof.
    fn proof_to_call_data(&self, proof: &Groth16Proof, public_signals: &[FieldElement]) -> CallData {
        CallData::encode(proof, public_signals.to_vec())
    }
}

/// Public context a move proof is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveContext {
    /// Defender's board commitment.
    #[serde(with = "hex_hash")]
    pub commitment: StateHash,
    /// `lastMoveHash` before this move.
    #[serde(with = "hex_hash")]
    pub previous_move_hash: StateHash,
    /// Moves resolved so far.
    pub move_count: u64,
    /// Game identifier.
    pub game_id: String,
    /// Defender address.
    pub player: Address,
    /// Guessed column.
    pub x: u8,
    /// Guessed row.
    pub y: u8,
}

/// Next link of the move-hash chain.
pub fn chain_move_hash(context: &MoveContext, hit: bool) -> StateHash {
    StateHasher::new(HashDomain::MoveChain)
        .hash(&context.previous_move_hash)
        .text(&context.game_id)
        .bytes(context.player.as_bytes())
        .word(context.move_count)
        .byte(context.x)
        .byte(context.y)
        .flag(hit)
        .finish()
}

/// Typed front end over a [`ProofSystem`].
#[derive(Clone)]
pub struct ProofGateway {
    system: Arc<dyn ProofSystem>,
}

impl std::fmt::Debug for ProofGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProofGateway")
    }
}

impl ProofGateway {
    /// Wrap a proof system.
    pub fn new(system: Arc<dyn ProofSystem>) -> Self {
        Self { system }
    }

    /// Prove that a committed board holds a legal fleet.
    pub fn prove_ship_placement(&self, board: &Board, salt: &Salt) -> Result<PlacementProof, ProofError> {
        self.generate(CircuitInputs::ShipPlacement {
            board: board.clone(),
            salt: *salt,
        })
    }

    /// Prove a hit/miss answer. Only the defender can do this.
    pub fn prove_move(
        &self,
        board: &Board,
        salt: &Salt,
        context: &MoveContext,
        claimed_hit: bool,
    ) -> Result<MoveProof, ProofError> {
        self.generate(CircuitInputs::Move {
            board: board.clone(),
            salt: *salt,
            context: context.clone(),
            claimed_hit,
        })
    }

    /// Prove that the named cells sink the whole fleet.
    pub fn prove_win(
        &self,
        board: &Board,
        salt: &Salt,
        commitment: StateHash,
        merkle_root: StateHash,
        hit_count: u64,
        hits: &[(u8, u8)],
    ) -> Result<WinProof, ProofError> {
        self.generate(CircuitInputs::Win {
            board: board.clone(),
            salt: *salt,
            commitment,
            merkle_root,
            hit_count,
            hits: hits.to_vec(),
        })
    }

    /// Stateless check of any bundle against its circuit key.
    pub fn verify<S: PublicSignals>(&self, bundle: &ProofBundle<S>) -> bool {
        let key = self.system.verification_key(S::CIRCUIT);
        self.system
            .verify_proof(&key, &bundle.public_signals(), &bundle.proof)
    }

    /// Verify the opponent's placement proof against their published values.
    pub fn verify_placement(
        &self,
        bundle: &PlacementProof,
        commitment: &StateHash,
        merkle_root: &StateHash,
    ) -> Result<(), ProofError> {
        self.check(bundle)?;
        let c = Circuit::ShipPlacement;
        if bundle.signals.commitment != FieldElement::from_hash(commitment) {
            return Err(ProofError::ContextMismatch { circuit: c, field: "commitment" });
        }
        if bundle.signals.merkle_root != FieldElement::from_hash(merkle_root) {
            return Err(ProofError::ContextMismatch { circuit: c, field: "merkleRoot" });
        }
        Ok(())
    }

    /// Verify a move proof and its binding to the expected context.
    ///
    /// Returns the proved hit bit.
    pub fn verify_move(&self, bundle: &MoveProof, expected: &MoveContext) -> Result<bool, ProofError> {
        self.check(bundle)?;
        let s = &bundle.signals;
        let mismatch = |field| ProofError::ContextMismatch { circuit: Circuit::Move, field };
        if s.commitment != expected.commitment {
            return Err(mismatch("commitment"));
        }
        if s.previous_move_hash != expected.previous_move_hash {
            return Err(mismatch("previousMoveHash"));
        }
        if s.move_count != expected.move_count {
            return Err(mismatch("moveCount"));
        }
        if s.game_id != FieldElement::from_id(&expected.game_id) {
            return Err(mismatch("gameId"));
        }
        if s.player != expected.player {
            return Err(mismatch("playerId"));
        }
        if (s.x, s.y) != (expected.x, expected.y) {
            return Err(mismatch("guess"));
        }
        Ok(s.is_hit)
    }

    /// Verify a win proof against the loser's published values.
    pub fn verify_win(
        &self,
        bundle: &WinProof,
        commitment: &StateHash,
        merkle_root: &StateHash,
        threshold: u64,
    ) -> Result<(), ProofError> {
        self.check(bundle)?;
        let mismatch = |field| ProofError::ContextMismatch { circuit: Circuit::Win, field };
        if bundle.signals.commitment != *commitment {
            return Err(mismatch("commitment"));
        }
        if bundle.signals.merkle_root != *merkle_root {
            return Err(mismatch("merkleRoot"));
        }
        if bundle.signals.hit_count < threshold {
            return Err(mismatch("hitCount"));
        }
        Ok(())
    }

    /// Calldata for the arbiter.
    pub fn to_call_data<S: PublicSignals>(&self, bundle: &ProofBundle<S>) -> CallData {
        self.system
            .proof_to_call_data(&bundle.proof, &bundle.public_signals())
    }

    /// Verification key for a circuit.
    pub fn verification_key(&self, circuit: Circuit) -> VerificationKey {
        self.system.verification_key(circuit)
    }

    fn check<S: PublicSignals>(&self, bundle: &ProofBundle<S>) -> Result<(), ProofError> {
        if self.verify(bundle) {
            debug!(circuit = %S::CIRCUIT, "proof verified");
            Ok(())
        } else {
            warn!(circuit = %S::CIRCUIT, "proof rejected");
            Err(ProofError::ProofVerificationFailed { circuit: S::CIRCUIT })
        }
    }

    fn generate<S: PublicSignals>(&self, inputs: CircuitInputs) -> Result<ProofBundle<S>, ProofError> {
        debug_assert_eq!(inputs.circuit(), S::CIRCUIT);
        let raw = match self.system.generate_proof(&inputs) {
            Ok(raw) => raw,
            Err(first) => {
                warn!(circuit = %S::CIRCUIT, error = %first, "proof generation failed, retrying once");
                self.system.generate_proof(&inputs)?
            }
        };
        let signals = S::from_fields(&raw.public_signals)?;
        debug!(circuit = %S::CIRCUIT, signals = raw.public_signals.len(), "proof generated");
        Ok(ProofBundle { proof: raw.proof, signals })
    }
}
