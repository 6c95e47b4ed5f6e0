//! Game Logic Module
//!
//! Board model, placement rules and the channel state machine. Nothing in
//! here touches the network; every transition is a pure function of the
//! previous state plus a proved move.
//!
//! ## Module Structure
//!
//! - `board`: Grid, ships, fleet schedule
//! - `placement`: Exhaustive placement validator
//! - `state`: Game state, signed snapshots, move records
//! - `channel`: Local replica of the channel state machine
//! - `events`: Channel events for logging and replay

pub mod board;
pub mod placement;
pub mod state;
pub mod channel;
pub mod events;

// Re-export key types
pub use board::{Board, BoardError, Orientation, Ship, BOARD_CELLS, BOARD_SIZE, FLEET, FLEET_SIZE, TOTAL_SHIP_CELLS};
pub use placement::{validate, PlacementReport, PlacementViolation};
pub use state::{GameSetup, GameState, Move, MoveRecord, Phase, PlayerSetup, Seat, SignaturePair, SignedState};
pub use channel::{Channel, ChannelError};
pub use events::ChannelEvent;
