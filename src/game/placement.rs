//! Ship-Placement Validator
//!
//! Pure rule checker for a player's own declaration. It is advisory: the
//! authoritative check of an opponent's fleet is the placement proof.
//!
//! Validation is exhaustive. Every violation is collected so the caller
//! can show complete feedback in one pass.

use std::fmt;

use serde::{Serialize, Deserialize};

use crate::game::board::{in_bounds, Board, BoardError, Ship, FLEET, FLEET_SIZE};

/// A single rule violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementViolation {
    /// Wrong number of ships.
    ShipCount {
        /// Ships declared.
        got: usize,
    },
    /// Ship length does not follow the fleet schedule.
    WrongLength {
        /// Ship index.
        ship: usize,
        /// Length required at this index.
        expected: u8,
        /// Declared length.
        got: u8,
    },
    /// Orientation is neither horizontal nor vertical.
    InvalidOrientation {
        /// Ship index.
        ship: usize,
        /// Raw value.
        got: u8,
    },
    /// Start coordinate is off the board.
    StartOutOfBounds {
        /// Ship index.
        ship: usize,
        /// Start column.
        x: u8,
        /// Start row.
        y: u8,
    },
    /// Ship runs off the board.
    EndOutOfBounds {
        /// Ship index.
        ship: usize,
        /// End column.
        x: u32,
        /// End row.
        y: u32,
    },
    /// Two ships share a cell.
    Overlap {
        /// First ship index.
        first: usize,
        /// Second ship index.
        second: usize,
        /// Column of the first shared cell.
        x: u32,
        /// Row of the first shared cell.
        y: u32,
    },
    /// Supplied board is not a 100-cell 0/1 bitmap.
    MalformedBoard {
        /// What was wrong.
        reason: String,
    },
    /// Supplied board differs from the bitmap the ships describe.
    BoardMismatch {
        /// Number of differing cells.
        differing_cells: usize,
    },
}

impl fmt::Display for PlacementViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShipCount { got } => {
                write!(f, "expected {} ships, got {}", FLEET_SIZE, got)
            }
            Self::WrongLength { ship, expected, got } => {
                write!(f, "ship {} must have length {}, got {}", ship, expected, got)
            }
            Self::InvalidOrientation { ship, got } => {
                write!(f, "ship {} has invalid orientation {} (0 = horizontal, 1 = vertical)", ship, got)
            }
            Self::StartOutOfBounds { ship, x, y } => {
                write!(f, "ship {} starts out of bounds at ({}, {})", ship, x, y)
            }
            Self::EndOutOfBounds { ship, x, y } => {
                write!(f, "ship {} ends out of bounds at ({}, {})", ship, x, y)
            }
            Self::Overlap { first, second, x, y } => {
                write!(f, "ships {} and {} overlap at ({}, {})", first, second, x, y)
            }
            Self::MalformedBoard { reason } => write!(f, "malformed board: {}", reason),
            Self::BoardMismatch { differing_cells } => {
                write!(f, "board differs from declared ships in {} cells", differing_cells)
            }
        }
    }
}

/// Outcome of validating a declaration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementReport {
    /// True when no violations were found.
    pub valid: bool,
    /// Every violation, in check order.
    pub errors: Vec<PlacementViolation>,
}

impl PlacementReport {
    /// Human-readable reasons.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

/// Validate a ship list against its claimed board bitmap.
pub fn validate(ships: &[Ship], board: &[u8]) -> PlacementReport {
    let mut errors = Vec::new();

    // 1. Ship count
    if ships.len() != FLEET_SIZE {
        errors.push(PlacementViolation::ShipCount { got: ships.len() });
    }

    // 2. Length schedule
    for (i, (ship, expected)) in ships.iter().zip(FLEET.iter()).enumerate() {
        if ship.length != *expected {
            errors.push(PlacementViolation::WrongLength {
                ship: i,
                expected: *expected,
                got: ship.length,
            });
        }
    }

    // 3. Orientation
    for (i, ship) in ships.iter().enumerate() {
        if ship.orientation().is_none() {
            errors.push(PlacementViolation::InvalidOrientation { ship: i, got: ship.orientation });
        }
    }

    // 4. Start bounds
    for (i, ship) in ships.iter().enumerate() {
        if !in_bounds(ship.x as u32, ship.y as u32) {
            errors.push(PlacementViolation::StartOutOfBounds { ship: i, x: ship.x, y: ship.y });
        }
    }

    // 5. End bounds (only meaningful for a valid orientation and a sane start)
    for (i, ship) in ships.iter().enumerate() {
        if !in_bounds(ship.x as u32, ship.y as u32) {
            continue;
        }
        if let Some((ex, ey)) = ship.end() {
            if !in_bounds(ex, ey) {
                errors.push(PlacementViolation::EndOutOfBounds { ship: i, x: ex, y: ey });
            }
        }
    }

    // 6. Overlap
    let covered: Vec<Vec<(u32, u32)>> = ships
        .iter()
        .map(|s| s.cells().into_iter().filter(|(x, y)| in_bounds(*x, *y)).collect())
        .collect();
    for first in 0..covered.len() {
        for second in (first + 1)..covered.len() {
            if let Some(&(x, y)) = covered[first].iter().find(|c| covered[second].contains(c)) {
                errors.push(PlacementViolation::Overlap { first, second, x, y });
            }
        }
    }

    // 7. Board bitmap must equal the derived bitmap
    match Board::from_cells(board) {
        Ok(supplied) => {
            let derived = Board::from_ships(ships);
            let differing_cells = supplied
                .cells()
                .iter()
                .zip(derived.cells().iter())
                .filter(|(a, b)| a != b)
                .count();
            if differing_cells > 0 {
                errors.push(PlacementViolation::BoardMismatch { differing_cells });
            }
        }
        Err(err) => {
            let reason = match err {
                BoardError::MalformedBoard { reason } => reason,
            };
            errors.push(PlacementViolation::MalformedBoard { reason });
        }
    }

    PlacementReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Orientation;

    fn scenario_fleet() -> Vec<Ship> {
        [[3, 1, 3, 0], [5, 4, 3, 1], [7, 5, 2, 0], [1, 8, 2, 1], [8, 8, 2, 0]]
            .iter()
            .map(|t| Ship::from_tuple(*t))
            .collect()
    }

    fn board_for(ships: &[Ship]) -> Vec<u8> {
        Board::from_ships(ships).cells().to_vec()
    }

    #[test]
    fn test_valid_fleet() {
        let ships = scenario_fleet();
        let report = validate(&ships, &board_for(&ships));
        assert!(report.valid, "{:?}", report.messages());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_wrong_count() {
        let ships = scenario_fleet()[..4].to_vec();
        let report = validate(&ships, &board_for(&ships));
        assert!(!report.valid);
        assert_eq!(report.errors[0], PlacementViolation::ShipCount { got: 4 });
    }

    #[test]
    fn test_wrong_length_by_index() {
        let mut ships = scenario_fleet();
        ships[2].length = 3;
        let report = validate(&ships, &board_for(&ships));
        assert!(report.errors.contains(&PlacementViolation::WrongLength {
            ship: 2,
            expected: 2,
            got: 3
        }));
    }

    #[test]
    fn test_two_independent_violations_both_reported() {
        let mut ships = scenario_fleet();
        // Ship 4 runs off the right edge.
        ships[4] = Ship::new(9, 0, 2, Orientation::Horizontal);
        // Ship 3 lands on ship 0.
        ships[3] = Ship::new(4, 1, 2, Orientation::Vertical);
        let report = validate(&ships, &board_for(&ships));

        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, PlacementViolation::EndOutOfBounds { ship: 4, .. })));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, PlacementViolation::Overlap { first: 0, second: 3, x: 4, y: 1 })));
    }

    #[test]
    fn test_start_out_of_bounds() {
        let mut ships = scenario_fleet();
        ships[0] = Ship::new(10, 10, 3, Orientation::Horizontal);
        let report = validate(&ships, &board_for(&ships));
        assert!(report
            .errors
            .contains(&PlacementViolation::StartOutOfBounds { ship: 0, x: 10, y: 10 }));
        // No duplicate end-of-ship report for a ship that never started on the board.
        assert!(!report
            .errors
            .iter()
            .any(|e| matches!(e, PlacementViolation::EndOutOfBounds { ship: 0, .. })));
    }

    #[test]
    fn test_invalid_orientation() {
        let mut ships = scenario_fleet();
        ships[1].orientation = 2;
        let report = validate(&ships, &board_for(&scenario_fleet()));
        assert!(report
            .errors
            .contains(&PlacementViolation::InvalidOrientation { ship: 1, got: 2 }));
        // Ship 1 now covers nothing, so the supplied board no longer matches.
        assert!(report
            .errors
            .contains(&PlacementViolation::BoardMismatch { differing_cells: 3 }));
    }

    #[test]
    fn test_board_mismatch() {
        let ships = scenario_fleet();
        let mut board = board_for(&ships);
        board[0] = 1;
        let report = validate(&ships, &board);
        assert_eq!(report.errors, vec![PlacementViolation::BoardMismatch { differing_cells: 1 }]);
    }

    #[test]
    fn test_malformed_board_reported() {
        let ships = scenario_fleet();
        let report = validate(&ships, &[0u8; 64]);
        assert!(matches!(report.errors.last(), Some(PlacementViolation::MalformedBoard { .. })));
        assert!(report.messages().last().unwrap().starts_with("malformed board"));
    }
}
