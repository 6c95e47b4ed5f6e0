//! Commitments and Proofs
//!
//! Binds private boards to public commitments and gates every claim about
//! a board (legal placement, hit/miss answer, sunk fleet) behind a proof
//! the opponent and the arbiter can check without seeing the board.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     PROOF LAYER                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  merkle.rs        - 128-leaf board tree, cell inclusion      │
//! │  commitment.rs    - H(merkleRoot, salt), salt registry       │
//! │  public_inputs.rs - Typed signal schemas, calldata encoding  │
//! │  verify.rs        - Proof gateway over an external prover    │
//! │  simulated.rs     - In-process development prover            │
//! │  transcript.rs    - Append-only move history                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod merkle;
pub mod commitment;
pub mod public_inputs;
pub mod verify;
pub mod simulated;
pub mod transcript;

// Re-export key types
pub use merkle::{build_merkle_root, MerkleProof, MerkleTree};
pub use commitment::{commit, generate_salt, BoardCommitment, CommitmentError, CommittedBoard, Salt, SaltRegistry};
pub use public_inputs::{
    CallData, Circuit, FieldElement, Groth16Proof, MoveProof, MoveSignals, PlacementProof,
    PlacementSignals, ProofBundle, PublicSignals, WinProof, WinSignals,
};
pub use verify::{chain_move_hash, MoveContext, ProofError, ProofGateway, ProofSystem, VerificationKey};
pub use simulated::SimulatedProofSystem;
pub use transcript::{MoveHistory, TranscriptError};
