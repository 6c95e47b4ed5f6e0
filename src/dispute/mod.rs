//! Dispute Resolution
//!
//! On-chain fallback for when cooperation breaks down: the arbiter call
//! surface with a reference in-memory arbiter, and the coordinator that
//! prepares and submits each call from a replica.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     DISPUTE LAYER                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  arbiter.rs     - Arbiter trait, InMemoryArbiter, timers     │
//! │  coordinator.rs - Evidence checks, respond/timeout/settle    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod arbiter;
pub mod coordinator;

// Re-export key types
pub use arbiter::{
    Arbiter, ArbiterConstants, ChannelRecord, ChannelStatus, Dispute, DisputeError, DisputeEvidence,
    DisputeStatus, DisputeType, InMemoryArbiter, Resolution,
};
pub use coordinator::DisputeCoordinator;
