//! Simulated Proof Backend
//!
//! Evaluates each circuit's constraints in-process and emits a proof whose
//! points are a keyed hash of the public signals. It is binding to the
//! signals and to the verification key, but it is neither zero-knowledge
//! nor sound against anyone holding the key. Used for development, tests
//! and the demo binary in place of an external prover.

use std::collections::HashSet;

use crate::core::hash::{HashDomain, StateHash, StateHasher};
use crate::game::board::{in_bounds, Board, FLEET, TOTAL_SHIP_CELLS};
use crate::proof::commitment::{BoardCommitment, Salt};
use crate::proof::public_inputs::{
    Circuit, FieldElement, Groth16Proof, MoveSignals, PlacementSignals, PublicSignals, WinSignals,
};
use crate::proof::verify::{chain_move_hash, CircuitInputs, ProofError, ProofSystem, RawProof, VerificationKey};


/// In-process prover/verifier.
#[derive(Clone, Debug)]
pub struct SimulatedProofSystem {
    seed: StateHash,
}

impl Default for SimulatedProofSystem {
    fn default() -> Self {
        Self::new(*b"battleship-channel-dev-setup-v1!")
    }
}

impl SimulatedProofSystem {
    /// Backend whose keys derive from `seed` (stands in for a trusted setup).
    pub fn new(seed: StateHash) -> Self {
        Self { seed }
    }

    fn key_for(&self, circuit: Circuit) -> StateHash {
        StateHasher::new(HashDomain::SimulatedKey)
            .hash(&self.seed)
            .byte(circuit as u8)
            .finish()
    }

    fn prove(key: &StateHash, public_signals: &[FieldElement]) -> Groth16Proof {
        let tag = public_signals
            .iter()
            .fold(
                StateHasher::new(HashDomain::SimulatedProof)
                    .hash(key)
                    .word(public_signals.len() as u64),
                |h, signal| h.hash(&signal.0),
            )
            .finish();

        let point = |i: u8| {
            FieldElement(StateHasher::new(HashDomain::SimulatedProof).hash(&tag).byte(i).finish())
        };
        Groth16Proof {
            pi_a: [point(0), point(1)],
            pi_b: [[point(2), point(3)], [point(4), point(5)]],
            pi_c: [point(6), point(7)],
        }
    }

    fn unsatisfied(circuit: Circuit, reason: impl Into<String>) -> ProofError {
        ProofError::ProofGenerationError {
            circuit,
            reason: reason.into(),
        }
    }

    fn placement(board: &Board, salt: &Salt) -> Result<Vec<FieldElement>, ProofError> {
        let c = Circuit::ShipPlacement;
        if !tiles_fleet(board) {
            return Err(Self::unsatisfied(c, "board is not a legal fleet placement"));
        }
        let public = BoardCommitment::create(board, salt);
        Ok(PlacementSignals {
            commitment: FieldElement::from_hash(&public.commitment),
            merkle_root: FieldElement::from_hash(&public.merkle_root),
        }
        .to_fields())
    }

    fn movement(
        board: &Board,
        salt: &Salt,
        context: &crate::proof::verify::MoveContext,
        claimed_hit: bool,
    ) -> Result<Vec<FieldElement>, ProofError> {
        let c = Circuit::Move;
        if BoardCommitment::create(board, salt).commitment != context.commitment {
            return Err(Self::unsatisfied(c, "board and salt do not open the commitment"));
        }
        if !in_bounds(context.x as u32, context.y as u32) {
            return Err(Self::unsatisfied(c, "guess out of bounds"));
        }
        if board.is_occupied(context.x, context.y) != claimed_hit {
            return Err(Self::unsatisfied(c, "claimed result contradicts the board"));
        }
        Ok(MoveSignals {
            new_move_hash: chain_move_hash(context, claimed_hit),
            is_hit: claimed_hit,
            commitment: context.commitment,
            previous_move_hash: context.previous_move_hash,
            move_count: context.move_count,
            game_id: FieldElement::from_id(&context.game_id),
            player: context.player,
            x: context.x,
            y: context.y,
        }
        .to_fields())
    }

    fn win(
        board: &Board,
        salt: &Salt,
        commitment: &StateHash,
        merkle_root: &StateHash,
        hit_count: u64,
        hits: &[(u8, u8)],
    ) -> Result<Vec<FieldElement>, ProofError> {
        let c = Circuit::Win;
        let public = BoardCommitment::create(board, salt);
        if public.commitment != *commitment || public.merkle_root != *merkle_root {
            return Err(Self::unsatisfied(c, "board and salt do not open the commitment"));
        }
        let distinct: HashSet<(u8, u8)> = hits.iter().copied().collect();
        if distinct.len() != hits.len() {
            return Err(Self::unsatisfied(c, "duplicate hit cell"));
        }
        if let Some((x, y)) = hits.iter().find(|(x, y)| !board.is_occupied(*x, *y)) {
            return Err(Self::unsatisfied(c, format!("cell ({}, {}) is not a ship", x, y)));
        }
        if hit_count != hits.len() as u64 || hit_count < TOTAL_SHIP_CELLS as u64 {
            return Err(Self::unsatisfied(c, format!("hit count {} below threshold", hit_count)));
        }
        Ok(WinSignals {
            commitment: *commitment,
            merkle_root: *merkle_root,
            hit_count,
        }
        .to_fields())
    }
}

impl ProofSystem for SimulatedProofSystem {
    fn generate_proof(&self, inputs: &CircuitInputs) -> Result<RawProof, ProofError> {
        let public_signals = match inputs {
            CircuitInputs::ShipPlacement { board, salt } => Self::placement(board, salt)?,
            CircuitInputs::Move { board, salt, context, claimed_hit } => {
                Self::movement(board, salt, context, *claimed_hit)?
            }
            CircuitInputs::Win { board, salt, commitment, merkle_root, hit_count, hits } => {
                Self::win(board, salt, commitment, merkle_root, *hit_count, hits)?
            }
        };
        let proof = Self::prove(&self.key_for(inputs.circuit()), &public_signals);
        Ok(RawProof { proof, public_signals })
    }

    fn verify_proof(&self, key: &VerificationKey, public_signals: &[FieldElement], proof: &Groth16Proof) -> bool {
        key.key == self.key_for(key.circuit) && Self::prove(&key.key, public_signals) == *proof
    }

    fn verification_key(&self, circuit: Circuit) -> VerificationKey {
        VerificationKey {
            circuit,
            key: self.key_for(circuit),
        }
    }
}

/// Can the occupied cells be covered exactly by the fleet, with straight
/// non-overlapping ships?
pub fn tiles_fleet(board: &Board) -> bool {
    if board.occupied_count() != TOTAL_SHIP_CELLS as usize {
        return false;
    }
    let mut remaining: Vec<bool> = board.cells().iter().map(|c| *c == 1).collect();
    let mut used = [false; FLEET.len()];
    cover(&mut remaining, &mut used)
}

fn cover(remaining: &mut [bool], used: &mut [bool; FLEET.len()]) -> bool {
    // The first uncovered ship cell must be the top-left end of some ship.
    let Some(start) = remaining.iter().position(|c| *c) else {
        return used.iter().all(|u| *u);
    };
    let size = crate::game::board::BOARD_SIZE as usize;
    let (x, y) = (start % size, start / size);

    for ship in 0..FLEET.len() {
        if used[ship] {
            continue;
        }
        // Same-length ships are interchangeable; only try the first unused one.
        if (0..ship).any(|s| !used[s] && FLEET[s] == FLEET[ship]) {
            continue;
        }
        let length = FLEET[ship] as usize;
        for (dx, dy) in [(1, 0), (0, 1)] {
            let cells: Vec<usize> = (0..length)
                .map(|i| (x + dx * i, y + dy * i))
                .take_while(|(cx, cy)| *cx < size && *cy < size)
                .map(|(cx, cy)| cy * size + cx)
                .collect();
            if cells.len() != length || !cells.iter().all(|i| remaining[*i]) {
                continue;
            }
            for i in &cells {
                remaining[*i] = false;
            }
            used[ship] = true;
            if cover(remaining, used) {
                return true;
            }
            used[ship] = false;
            for i in &cells {
                remaining[*i] = true;
            }
        }
    }
    false
}
