//! Board and Fleet Model
//!
//! A 10x10 grid stored row-major (`index = y * 10 + x`) with one byte per
//! cell: 1 = ship, 0 = water.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Board edge length.
pub const BOARD_SIZE: u8 = 10;

/// Cells on the board.
pub const BOARD_CELLS: usize = 100;

/// Ship lengths, by index. Declared ships must follow this schedule.
pub const FLEET: [u8; 5] = [3, 3, 2, 2, 2];

/// Number of ships in the fleet.
pub const FLEET_SIZE: usize = FLEET.len();

/// Sum of ship lengths. Reaching this many hits wins the game.
pub const TOTAL_SHIP_CELLS: u8 = 12;

/// Board errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// Board has the wrong size or a cell that is neither 0 nor 1.
    #[error("malformed board: {reason}")]
    MalformedBoard {
        /// What was wrong.
        reason: String,
    },
}

/// Ship orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Orientation {
    /// Extends toward increasing x.
    Horizontal = 0,
    /// Extends toward increasing y.
    Vertical = 1,
}

impl Orientation {
    /// Decode the wire value (0 or 1).
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Orientation::Horizontal),
            1 => Some(Orientation::Vertical),
            _ => None,
        }
    }
}

/// A declared ship, exactly as the player submitted it.
///
/// Fields are kept raw so the placement validator can report every
/// problem with a declaration instead of failing at parse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ship {
    /// Start column.
    pub x: u8,
    /// Start row.
    pub y: u8,
    /// Declared length.
    pub length: u8,
    /// Raw orientation (0 = horizontal, 1 = vertical).
    pub orientation: u8,
}

impl Ship {
    /// Create a ship.
    pub const fn new(x: u8, y: u8, length: u8, orientation: Orientation) -> Self {
        Self { x, y, length, orientation: orientation as u8 }
    }

    /// Create from the compact `[x, y, length, orientation]` form.
    pub const fn from_tuple(t: [u8; 4]) -> Self {
        Self { x: t[0], y: t[1], length: t[2], orientation: t[3] }
    }

    /// Decoded orientation, if valid.
    pub fn orientation(&self) -> Option<Orientation> {
        Orientation::from_raw(self.orientation)
    }

    /// Coordinates the ship would cover, including any off-board ones.
    ///
    /// An invalid orientation covers nothing.
    pub fn cells(&self) -> Vec<(u32, u32)> {
        let (dx, dy) = match self.orientation() {
            Some(Orientation::Horizontal) => (1, 0),
            Some(Orientation::Vertical) => (0, 1),
            None => return Vec::new(),
        };
        (0..self.length as u32)
            .map(|i| (self.x as u32 + dx * i, self.y as u32 + dy * i))
            .collect()
    }

    /// Last covered coordinate.
    pub fn end(&self) -> Option<(u32, u32)> {
        self.cells().last().copied()
    }
}

/// Check whether a coordinate is on the board.
#[inline]
pub fn in_bounds(x: u32, y: u32) -> bool {
    x < BOARD_SIZE as u32 && y < BOARD_SIZE as u32
}

/// Row-major cell index.
#[inline]
pub fn cell_index(x: u8, y: u8) -> usize {
    y as usize * BOARD_SIZE as usize + x as usize
}

/// A player's private board.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Board([u8; BOARD_CELLS]);

impl Board {
    /// Empty board.
    pub const fn empty() -> Self {
        Self([0u8; BOARD_CELLS])
    }

    /// Build from a flat cell slice.
    ///
    /// Fails with `MalformedBoard` unless there are exactly 100 cells, each 0 or 1.
    pub fn from_cells(cells: &[u8]) -> Result<Self, BoardError> {
        if cells.len() != BOARD_CELLS {
            return Err(BoardError::MalformedBoard {
                reason: format!("expected {} cells, got {}", BOARD_CELLS, cells.len()),
            });
        }
        if let Some((i, v)) = cells.iter().enumerate().find(|(_, v)| **v > 1) {
            return Err(BoardError::MalformedBoard {
                reason: format!("cell {} has value {}, expected 0 or 1", i, v),
            });
        }
        let mut out = [0u8; BOARD_CELLS];
        out.copy_from_slice(cells);
        Ok(Self(out))
    }

    /// Derive the bitmap covered by a ship list. Off-board cells are dropped.
    pub fn from_ships(ships: &[Ship]) -> Self {
        let mut board = Self::empty();
        for ship in ships {
            for (x, y) in ship.cells() {
                if in_bounds(x, y) {
                    board.0[cell_index(x as u8, y as u8)] = 1;
                }
            }
        }
        board
    }

    /// Raw cells.
    pub fn cells(&self) -> &[u8; BOARD_CELLS] {
        &self.0
    }

    /// Is there a ship at (x, y)? Off-board coordinates are water.
    pub fn is_occupied(&self, x: u8, y: u8) -> bool {
        in_bounds(x as u32, y as u32) && self.0[cell_index(x, y)] == 1
    }

    /// Number of ship cells.
    pub fn occupied_count(&self) -> usize {
        self.0.iter().filter(|c| **c == 1).count()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for Board {
    // Boards are secrets; keep them out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Board({} ship cells)", self.occupied_count())
    }
}

impl TryFrom<Vec<u8>> for Board {
    type Error = BoardError;

    fn try_from(cells: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_cells(&cells)
    }
}

impl From<Board> for Vec<u8> {
    fn from(board: Board) -> Self {
        board.0.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_fleet() -> Vec<Ship> {
        [[3, 1, 3, 0], [5, 4, 3, 1], [7, 5, 2, 0], [1, 8, 2, 1], [8, 8, 2, 0]]
            .iter()
            .map(|t| Ship::from_tuple(*t))
            .collect()
    }

    #[test]
    fn test_fleet_total() {
        let sum: u32 = FLEET.iter().map(|l| *l as u32).sum();
        assert_eq!(sum, TOTAL_SHIP_CELLS as u32);
    }

    #[test]
    fn test_from_ships() {
        let board = Board::from_ships(&scenario_fleet());
        assert_eq!(board.occupied_count(), 12);
        assert!(board.is_occupied(3, 1));
        assert!(board.is_occupied(5, 1));
        assert!(board.is_occupied(5, 6));
        assert!(board.is_occupied(8, 5));
        assert!(board.is_occupied(1, 9));
        assert!(!board.is_occupied(0, 0));
    }

    #[test]
    fn test_malformed_length() {
        let result = Board::from_cells(&[0u8; 99]);
        assert!(matches!(result, Err(BoardError::MalformedBoard { .. })));
    }

    #[test]
    fn test_malformed_value() {
        let mut cells = [0u8; 100];
        cells[42] = 2;
        let err = Board::from_cells(&cells).unwrap_err();
        assert!(err.to_string().contains("cell 42"));
    }

    #[test]
    fn test_vertical_cells() {
        let ship = Ship::new(2, 3, 3, Orientation::Vertical);
        assert_eq!(ship.cells(), vec![(2, 3), (2, 4), (2, 5)]);
        assert_eq!(ship.end(), Some((2, 5)));
    }

    #[test]
    fn test_invalid_orientation_covers_nothing() {
        let ship = Ship::from_tuple([0, 0, 3, 7]);
        assert!(ship.cells().is_empty());
        assert!(ship.orientation().is_none());
    }

    #[test]
    fn test_serde_rejects_bad_board() {
        let json = serde_json::to_string(&vec![0u8; 50]).unwrap();
        assert!(serde_json::from_str::<Board>(&json).is_err());
    }
}
