//! Core primitives.
//!
//! Hashing, participant addresses and the clock abstraction shared by
//! every other layer.

pub mod address;
pub mod clock;
pub mod hash;

// Re-export core types
pub use address::Address;
pub use clock::{Clock, ManualClock, SystemClock};
pub use hash::{HashDomain, StateHash, StateHasher, ZERO_HASH};
