//! Board Commitment Protocol
//!
//! Each player commits to their board before the channel opens:
//! `commitment = H(merkleRoot, salt)`. The root alone could be brute-forced
//! over legal fleets; the salt closes that search. Commitments are fixed
//! for the lifetime of the channel.

use std::collections::HashSet;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::address::Address;
use crate::core::hash::{hex_hash, to_hex, HashDomain, StateHash, StateHasher};
use crate::game::board::{Board, BoardError};
use crate::proof::merkle::board_root;

/// Private 256-bit salt. Never revealed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Salt(#[serde(with = "hex_hash")] pub [u8; 32]);

impl Salt {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Salt(..)")
    }
}

/// Draw a fresh salt from the operating system RNG.
pub fn generate_salt() -> Salt {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Salt(bytes)
}

/// Bind a Merkle root to a salt.
pub fn commit(root: &StateHash, salt: &Salt) -> StateHash {
    StateHasher::new(HashDomain::Commitment)
        .hash(root)
        .bytes(salt.as_bytes())
        .finish()
}

/// Public half of a board commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardCommitment {
    /// Root of the 128-leaf board tree.
    #[serde(with = "hex_hash")]
    pub merkle_root: StateHash,
    /// `H(merkle_root, salt)`.
    #[serde(with = "hex_hash")]
    pub commitment: StateHash,
}

impl BoardCommitment {
    /// Commit to a board with a salt.
    pub fn create(board: &Board, salt: &Salt) -> Self {
        let merkle_root = board_root(board);
        Self {
            merkle_root,
            commitment: commit(&merkle_root, salt),
        }
    }

    /// Recompute root and commitment from the claimed opening.
    pub fn verify(&self, board: &Board, salt: &Salt) -> bool {
        *self == Self::create(board, salt)
    }

    /// Hex commitment for logs.
    pub fn commitment_hex(&self) -> String {
        to_hex(&self.commitment)
    }
}

/// The owner's full view: board, salt and the public commitment.
#[derive(Clone, Debug)]
pub struct CommittedBoard {
    /// The private board.
    pub board: Board,
    /// The private salt.
    pub salt: Salt,
    /// The published values.
    pub public: BoardCommitment,
}

impl CommittedBoard {
    /// Commit to a board with a fresh salt.
    pub fn new(board: Board) -> Self {
        Self::with_salt(board, generate_salt())
    }

    /// Commit to a board with a caller-supplied salt.
    pub fn with_salt(board: Board, salt: Salt) -> Self {
        let public = BoardCommitment::create(&board, &salt);
        Self { board, salt, public }
    }
}

/// Errors from the commitment layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    /// Board failed validation.
    #[error(transparent)]
    Board(#[from] BoardError),

    /// The player already committed with this salt in an earlier game.
    #[error("salt reused by player {player}")]
    SaltReuse {
        /// Player whose salt repeated.
        player: Address,
    },
}

/// Tracks salts per player so a repeat is caught as a configuration error.
#[derive(Debug, Default)]
pub struct SaltRegistry {
    used: HashSet<(Address, Salt)>,
}

impl SaltRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a salt, failing if the player used it before.
    pub fn register(&mut self, player: Address, salt: Salt) -> Result<(), CommitmentError> {
        if !self.used.insert((player, salt)) {
            return Err(CommitmentError::SaltReuse { player });
        }
        Ok(())
    }

    /// Commit to raw cells with a fresh salt, registering it.
    pub fn commit_cells(&mut self, player: Address, cells: &[u8]) -> Result<CommittedBoard, CommitmentError> {
        let board = Board::from_cells(cells)?;
        let committed = CommittedBoard::new(board);
        self.register(player, committed.salt)?;
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Ship;

    fn scenario_board() -> Board {
        let ships: Vec<Ship> = [[3, 1, 3, 0], [5, 4, 3, 1], [7, 5, 2, 0], [1, 8, 2, 1], [8, 8, 2, 0]]
            .iter()
            .map(|t| Ship::from_tuple(*t))
            .collect();
        Board::from_ships(&ships)
    }

    #[test]
    fn test_commitment_roundtrip() {
        let board = scenario_board();
        let salt = generate_salt();
        let commitment = BoardCommitment::create(&board, &salt);

        // Regenerating from the original opening reproduces it exactly.
        assert!(commitment.verify(&board, &salt));
        assert_eq!(commitment.commitment, commit(&board_root(&board), &salt));
    }

    #[test]
    fn test_wrong_salt_fails() {
        let board = scenario_board();
        let commitment = BoardCommitment::create(&board, &Salt([1; 32]));
        assert!(!commitment.verify(&board, &Salt([2; 32])));
    }

    #[test]
    fn test_wrong_board_fails() {
        let board = scenario_board();
        let salt = Salt([9; 32]);
        let commitment = BoardCommitment::create(&board, &salt);

        let mut cells = board.cells().to_vec();
        cells[0] = 1;
        let tampered = Board::from_cells(&cells).unwrap();
        assert!(!commitment.verify(&tampered, &salt));
    }

    #[test]
    fn test_same_root_different_salt_hides() {
        let board = scenario_board();
        let a = BoardCommitment::create(&board, &Salt([1; 32]));
        let b = BoardCommitment::create(&board, &Salt([2; 32]));
        assert_eq!(a.merkle_root, b.merkle_root);
        assert_ne!(a.commitment, b.commitment);
    }

    #[test]
    fn test_generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_salt_reuse_detected() {
        let mut registry = SaltRegistry::new();
        let player = Address::new([1; 20]);
        let salt = Salt([5; 32]);

        registry.register(player, salt).unwrap();
        assert_eq!(
            registry.register(player, salt),
            Err(CommitmentError::SaltReuse { player })
        );
        // Another player may coincidentally hold the same salt.
        assert!(registry.register(Address::new([2; 20]), salt).is_ok());
    }

    #[test]
    fn test_commit_cells_rejects_malformed() {
        let mut registry = SaltRegistry::new();
        let result = registry.commit_cells(Address::new([1; 20]), &[0u8; 10]);
        assert!(matches!(result, Err(CommitmentError::Board(_))));
    }

    #[test]
    fn test_salt_debug_redacted() {
        assert_eq!(format!("{:?}", Salt([7; 32])), "Salt(..)");
    }
}
