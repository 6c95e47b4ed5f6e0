//! Merkle Tree Commitments
//!
//! Binary SHA-256 tree with separate leaf and node domains. Boards are
//! committed as a fixed 128-leaf tree: the 100 cells in row-major order,
//! zero-padded, giving 7 levels above the leaves. The move history is
//! rooted with the same tree over its encoded records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::hash::StateHash;
use crate::game::board::{cell_index, Board, BoardError, BOARD_CELLS, BOARD_SIZE};

const LEAF_TAG: &[u8] = b"BATTLESHIP_MERKLE_LEAF_V1";
const NODE_TAG: &[u8] = b"BATTLESHIP_MERKLE_NODE_V1";
const EMPTY_TAG: &[u8] = b"BATTLESHIP_MERKLE_EMPTY_V1";

/// Leaves in a board tree.
pub const BOARD_TREE_LEAVES: usize = 128;

/// Levels above the leaves in a board tree.
pub const BOARD_TREE_DEPTH: usize = 7;

fn leaf(data: &[u8]) -> StateHash {
    Sha256::new_with_prefix(LEAF_TAG).chain_update(data).finalize().into()
}

fn node(left: &StateHash, right: &StateHash) -> StateHash {
    Sha256::new_with_prefix(NODE_TAG)
        .chain_update(left)
        .chain_update(right)
        .finalize()
        .into()
}

/// Which side of the running hash a sibling sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Inclusion path from one leaf to the root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    /// Bottom-up.
    pub path: Vec<(Side, StateHash)>,
}

impl MerkleProof {
    /// Fold `leaf_data` up the path and compare with `root`.
    pub fn verify(&self, root: &StateHash, leaf_data: &[u8]) -> bool {
        let folded = self.path.iter().fold(leaf(leaf_data), |acc, (side, sibling)| match side {
            Side::Left => node(sibling, &acc),
            Side::Right => node(&acc, sibling),
        });
        folded == *root
    }
}

/// Fully built tree, bottom level first.
///
/// A level with an odd number of nodes pairs its last node with itself.
/// Board trees are a power of two wide and never hit that case.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    levels: Vec<Vec<StateHash>>,
}

impl MerkleTree {
    /// Hash every item as a leaf and build all levels.
    pub fn from_leaves<T: AsRef<[u8]>>(items: &[T]) -> Self {
        let mut levels = vec![items.iter().map(|i| leaf(i.as_ref())).collect::<Vec<_>>()];
        while let Some(top) = levels.last().filter(|l| l.len() > 1) {
            let parent = top
                .chunks(2)
                .map(|pair| node(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(parent);
        }
        Self { levels }
    }

    /// The 128-leaf tree over a board's cells.
    pub fn for_board(board: &Board) -> Self {
        let cells: Vec<[u8; 1]> = board
            .cells()
            .iter()
            .copied()
            .chain(std::iter::repeat(0).take(BOARD_TREE_LEAVES - BOARD_CELLS))
            .map(|c| [c])
            .collect();
        Self::from_leaves(&cells)
    }

    /// Root hash; a fixed tagged hash when there are no leaves.
    pub fn root(&self) -> StateHash {
        match self.levels.last().and_then(|top| top.first()) {
            Some(root) => *root,
            None => Sha256::digest(EMPTY_TAG).into(),
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Levels above the leaves.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn prove(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut at = index;
        let path = self.levels[..self.depth()]
            .iter()
            .map(|level| {
                let step = if at % 2 == 0 {
                    (Side::Right, *level.get(at + 1).unwrap_or(&level[at]))
                } else {
                    (Side::Left, level[at - 1])
                };
                at /= 2;
                step
            })
            .collect();
        Some(MerkleProof { leaf_index: index, path })
    }
}

/// Merkle root of a board given as raw cells.
///
/// Fails with `MalformedBoard` if the input is not 100 cells of 0/1.
pub fn build_merkle_root(cells: &[u8]) -> Result<StateHash, BoardError> {
    Ok(board_root(&Board::from_cells(cells)?))
}

/// Merkle root of an already-validated board.
pub fn board_root(board: &Board) -> StateHash {
    MerkleTree::for_board(board).root()
}

/// Inclusion proof for cell `(x, y)`.
pub fn cell_proof(board: &Board, x: u8, y: u8) -> Option<MerkleProof> {
    if x >= BOARD_SIZE || y >= BOARD_SIZE {
        return None;
    }
    MerkleTree::for_board(board).prove(cell_index(x, y))
}

/// Check that `value` sits at the proof's leaf under a board `root`.
pub fn verify_cell(root: &StateHash, proof: &MerkleProof, value: u8) -> bool {
    proof.path.len() == BOARD_TREE_DEPTH && proof.verify(root, &[value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Ship;
    use proptest::prelude::*;

    fn scenario_board() -> Board {
        let ships: Vec<Ship> = [[3, 1, 3, 0], [5, 4, 3, 1], [7, 5, 2, 0], [1, 8, 2, 1], [8, 8, 2, 0]]
            .iter()
            .map(|t| Ship::from_tuple(*t))
            .collect();
        Board::from_ships(&ships)
    }

    #[test]
    fn test_empty_tree_has_fixed_root() {
        let empty: [&[u8]; 0] = [];
        let a = MerkleTree::from_leaves(&empty).root();
        assert_eq!(a, MerkleTree::from_leaves(&empty).root());
        assert_ne!(a, MerkleTree::from_leaves(&[b"x"]).root());
    }

    #[test]
    fn test_board_tree_shape() {
        let tree = MerkleTree::for_board(&scenario_board());
        assert_eq!(tree.leaf_count(), BOARD_TREE_LEAVES);
        assert_eq!(tree.depth(), BOARD_TREE_DEPTH);
    }

    #[test]
    fn test_malformed_board_rejected() {
        assert!(build_merkle_root(&[0u8; 99]).is_err());
        let mut cells = [0u8; BOARD_CELLS];
        cells[7] = 3;
        assert!(build_merkle_root(&cells).is_err());
    }

    #[test]
    fn test_cell_proofs() {
        let board = scenario_board();
        let root = board_root(&board);

        let hit = cell_proof(&board, 3, 1).unwrap();
        assert!(verify_cell(&root, &hit, 1));
        assert!(!verify_cell(&root, &hit, 0));

        let miss = cell_proof(&board, 0, 0).unwrap();
        assert!(verify_cell(&root, &miss, 0));
        assert!(cell_proof(&board, 10, 0).is_none());
    }

    #[test]
    fn test_truncated_path_rejected() {
        let board = scenario_board();
        let root = board_root(&board);
        let mut proof = cell_proof(&board, 3, 1).unwrap();
        proof.path.pop();
        assert!(!verify_cell(&root, &proof, 1));
    }

    #[test]
    fn test_odd_width_levels() {
        let leaves: Vec<&[u8]> = vec![b"a", b"b", b"c"];
        let tree = MerkleTree::from_leaves(&leaves);
        let root = tree.root();
        for (i, item) in leaves.iter().enumerate() {
            assert!(tree.prove(i).unwrap().verify(&root, item));
        }
        assert!(tree.prove(3).is_none());
    }

    proptest! {
        #[test]
        fn prop_single_cell_change_changes_root(
            cells in proptest::collection::vec(0u8..=1, BOARD_CELLS),
            flip in 0usize..BOARD_CELLS,
        ) {
            let root = build_merkle_root(&cells).unwrap();
            prop_assert_eq!(root, build_merkle_root(&cells).unwrap());

            let mut other = cells.clone();
            other[flip] ^= 1;
            prop_assert_ne!(root, build_merkle_root(&other).unwrap());
        }
    }
}
