//! # Battleship State Channel
//!
//! Two-party Battleship played off-chain. Each move is a dual-signed state
//! transition backed by a proof about a privately committed board; an
//! on-chain arbiter is only involved to open the channel, to settle it and
//! to resolve disputes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   BATTLESHIP CHANNEL                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── hash.rs     - SHA-256 / keccak state hashing            │
//! │  ├── address.rs  - Participant addresses                     │
//! │  └── clock.rs    - Injected time source                      │
//! │                                                              │
//! │  game/           - Board and channel state machine           │
//! │  ├── board.rs    - Grid, ships, fleet schedule               │
//! │  ├── placement.rs- Placement rules                           │
//! │  ├── state.rs    - Game state and signed snapshots           │
//! │  └── channel.rs  - Local replica transitions                 │
//! │                                                              │
//! │  proof/          - Commitments and proofs                    │
//! │  ├── merkle.rs   - Board Merkle tree                         │
//! │  ├── commitment.rs - Salted board commitments                │
//! │  └── verify.rs   - Proof gateway                             │
//! │                                                              │
//! │  network/        - Replica-to-replica protocol               │
//! │  ├── signing.rs  - Typed-data signatures                     │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── sync.rs     - Snapshot synchronization                  │
//! │  └── session.rs  - Replica session                           │
//! │                                                              │
//! │  dispute/        - On-chain fallback                         │
//! │  ├── arbiter.rs  - Arbiter surface and timers                │
//! │  └── coordinator.rs - Dispute submission                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Agreement Guarantee
//!
//! A state counts only once both participants have signed its typed-data
//! hash. Every signed transition raises the nonce by exactly one, so the
//! highest dual-signed nonce is always the authoritative state, both
//! locally and for the arbiter.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod dispute;
pub mod game;
pub mod network;
pub mod proof;

// Re-export commonly used types
pub use config::{ChannelConfig, ConfigError};
pub use core::address::Address;
pub use core::hash::StateHash;
pub use dispute::{Arbiter, DisputeCoordinator, DisputeType, InMemoryArbiter};
pub use game::channel::{Channel, ChannelError};
pub use game::state::{GameState, Move, Phase, SignedState};
pub use network::session::{Invite, Replica};
pub use proof::verify::ProofGateway;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
