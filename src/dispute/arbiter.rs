//! Arbiter
//!
//! The call surface of the on-chain authority that adjudicates disputes
//! and finalizes settlement, plus an in-memory reference implementation
//! driven by an explicit clock.
//!
//! ## Dispute lifecycle
//!
//! ```text
//!   Open ──initiate_dispute──▶ Disputed ──respond (higher nonce)──▶ Open
//!                                  │
//!                                  └──claim_timeout (window over)──▶ Settled
//!   Open ──settle_channel (final state + win proof)──────────────▶ Settled
//!   Open ──make_move ... (next answer overdue)──claim_timeout────▶ Settled
//! ```
//!
//! On-chain moves alternate between the two defenders and must extend the
//! move-hash chain. Each one gives the other side `challenge_period`
//! seconds to answer the next guess on-chain.

use std::collections::HashMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::core::address::Address;
use crate::core::hash::{hex_hash, to_hex, StateHash};
use crate::game::state::{GameState, SignedState};
use crate::network::signing::{typed_data_hash, verify_state_signature, StateSignature};
use crate::proof::public_inputs::{FieldElement, MoveProof, MoveSignals, PlacementProof, WinProof};
use crate::proof::transcript::{MoveHistory, TranscriptError};
use crate::proof::verify::{ProofError, ProofGateway};

// =============================================================================
// TYPES
// =============================================================================

/// Grounds on which a dispute is raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeType {
    /// Guess off the board, out of turn, or past the move limit.
    InvalidMove,
    /// Fleet proof missing or invalid.
    InvalidShipPlacement,
    /// Claimed hit/miss disagrees with the proof.
    InvalidHitResult,
    /// A move proof was replayed.
    ReusedMove,
    /// A proof failed verification.
    InvalidProof,
    /// The challenger disputed a state it knew to be stale.
    MaliciousDispute,
    /// Signatures do not form a single chain of states.
    InvalidStateChain,
    /// Proof bound to another game, player or move index.
    GameContextMismatch,
}

/// Arbiter errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisputeError {
    /// Signatures or state hash in the submitted evidence do not check out.
    #[error("invalid dispute evidence: {reason}")]
    InvalidDisputeEvidence {
        /// What failed.
        reason: String,
    },

    /// No channel with this id.
    #[error("channel {channel_id} not found")]
    ChannelNotFound {
        /// Requested id.
        channel_id: String,
    },

    /// No dispute was ever opened on this channel.
    #[error("no dispute on channel {channel_id}")]
    DisputeNotFound {
        /// Requested id.
        channel_id: String,
    },

    /// The dispute is already resolved.
    #[error("dispute on channel {channel_id} is not active")]
    DisputeNotActive {
        /// Channel id.
        channel_id: String,
    },

    /// Timeout claimed before the response window elapsed.
    #[error("response window still open for {remaining}s")]
    ResponseWindowOpen {
        /// Seconds left.
        remaining: u64,
    },

    /// Rebuttal arrived after the response window.
    #[error("response window closed at {deadline}")]
    ResponseWindowClosed {
        /// Window end.
        deadline: u64,
    },

    /// Rebuttal nonce does not exceed the disputed nonce.
    #[error("counter state nonce {offered} does not exceed disputed nonce {disputed}")]
    StaleCounterState {
        /// Disputed nonce.
        disputed: u64,
        /// Offered nonce.
        offered: u64,
    },

    /// Caller is not one of the channel's participants.
    #[error("{address} is not a participant")]
    NotParticipant {
        /// Offending address.
        address: Address,
    },

    /// Final state cannot settle the channel.
    #[error("invalid settlement: {reason}")]
    InvalidSettlement {
        /// Why.
        reason: String,
    },

    /// Move proofs do not extend the accepted move chain.
    #[error("move chain rejected ({dispute_type:?}): {reason}")]
    MoveChain {
        /// What the break amounts to.
        dispute_type: DisputeType,
        /// Where it broke.
        reason: String,
    },

    /// On-chain move arrived after its answer window.
    #[error("on-chain move window closed at {deadline}")]
    MoveWindowClosed {
        /// Window end.
        deadline: u64,
    },

    /// An attached proof was rejected.
    #[error(transparent)]
    Proof(#[from] ProofError),

    /// Shipped move history could not be decoded.
    #[error(transparent)]
    History(#[from] TranscriptError),
}

/// Constants the arbiter exposes and replicas consume as configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterConstants {
    /// Window for answering an on-chain move, in seconds.
    pub challenge_period: u64,
    /// Window for rebutting a dispute, in seconds.
    pub response_period: u64,
    /// Maximum moves per game.
    pub max_moves: u32,
    /// Hits needed to win.
    pub win_threshold: u8,
}

impl From<&ChannelConfig> for ArbiterConstants {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            challenge_period: config.challenge_period,
            response_period: config.response_period,
            max_moves: config.max_moves,
            win_threshold: config.win_threshold,
        }
    }
}

/// On-chain channel status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Opened, waiting for both genesis submissions.
    Opening,
    /// Genesis accepted; play happens off-chain.
    Open,
    /// A dispute is active.
    Disputed,
    /// Terminal.
    Settled,
}

/// On-chain view of a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// Channel id (also the state's `channelId`).
    pub id: String,
    /// Opener and peer.
    pub participants: [Address; 2],
    /// Status.
    pub status: ChannelStatus,
    /// Arbiter time at opening.
    pub opened_at: u64,
    /// Participants whose genesis submission was accepted.
    pub initial_submissions: Vec<Address>,
    /// Highest state the arbiter has accepted.
    pub latest_state: Option<GameState>,
    /// Digest of `latest_state`.
    pub latest_state_hash: Option<StateHash>,
    /// Moves answered through the on-chain fallback.
    pub onchain_moves: Vec<MoveSignals>,
    /// Deadline for answering the last on-chain move.
    pub move_deadline: Option<u64>,
    /// Winner once settled.
    pub winner: Option<Address>,
}

impl ChannelRecord {
    fn is_participant(&self, address: &Address) -> bool {
        self.participants.contains(address)
    }

    fn latest_nonce(&self) -> u64 {
        self.latest_state.as_ref().map(|s| s.nonce).unwrap_or(0)
    }
}

/// Dispute status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeStatus {
    /// Waiting for a rebuttal.
    Active,
    /// A higher-nonce counter state was accepted.
    CounterStateAccepted {
        /// Accepted nonce.
        nonce: u64,
    },
    /// Window elapsed without a rebuttal.
    TimedOut,
}

/// An on-chain dispute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Channel under dispute.
    pub channel_id: String,
    /// Who raised it.
    pub challenger: Address,
    /// Who must answer.
    pub respondent: Address,
    /// Grounds.
    pub dispute_type: DisputeType,
    /// State the challenger submitted.
    pub disputed_state: GameState,
    /// Its digest.
    #[serde(with = "hex_hash")]
    pub disputed_state_hash: StateHash,
    /// Merkle root of the move history shipped with the evidence.
    #[serde(with = "hex_hash")]
    pub history_root: StateHash,
    /// Arbiter time at initiation.
    pub opened_at: u64,
    /// End of the response window.
    pub deadline: u64,
    /// Status.
    pub status: DisputeStatus,
    /// Set on a rebuttal: the challenger had co-signed a newer state.
    pub finding: Option<DisputeType>,
}

/// Evidence for `initiate_dispute`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeEvidence {
    /// Channel id.
    pub channel_id: String,
    /// Grounds.
    pub dispute_type: DisputeType,
    /// Disputed state.
    pub state: GameState,
    /// Claimed digest of `state`.
    #[serde(with = "hex_hash")]
    pub state_hash: StateHash,
    /// Player 1 signature.
    pub player1_signature: StateSignature,
    /// Player 2 signature.
    pub player2_signature: StateSignature,
    /// bincode-encoded move history up to `state`.
    pub history: Vec<u8>,
    /// Merkle root of `history`.
    #[serde(with = "hex_hash")]
    pub history_root: StateHash,
}

impl DisputeEvidence {
    /// Evidence from a dual-signed snapshot and the local move history,
    /// cut at the snapshot's nonce.
    pub fn from_signed(
        dispute_type: DisputeType,
        signed: &SignedState,
        history: &MoveHistory,
    ) -> Result<Self, DisputeError> {
        let pair = signed.signature_pair().ok_or_else(|| DisputeError::InvalidDisputeEvidence {
            reason: format!("nonce {} is not dual-signed", signed.state.nonce),
        })?;
        let history = history.until(signed.state.nonce);
        Ok(Self {
            channel_id: signed.state.channel_id.clone(),
            dispute_type,
            state: signed.state.clone(),
            state_hash: signed.state_hash,
            player1_signature: pair.player1,
            player2_signature: pair.player2,
            history_root: history.root()?,
            history: history.to_bytes()?,
        })
    }
}

/// How a channel or dispute ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Rebuttal accepted; the channel continues from `nonce`.
    CounterStateAccepted {
        /// Accepted nonce.
        nonce: u64,
    },
    /// Respondent stayed silent; challenger wins.
    ChallengeTimedOut {
        /// Challenger.
        winner: Address,
    },
    /// Nobody answered the last on-chain move in time; its defender wins.
    MoveTimedOut {
        /// Defender of the last on-chain move.
        winner: Address,
    },
    /// Cooperative settlement on a final state.
    Settled {
        /// Winner.
        winner: Address,
        /// Final nonce.
        nonce: u64,
    },
}

// =============================================================================
// ARBITER INTERFACE
// =============================================================================

/// Arbiter contract calls.
pub trait Arbiter: Send {
    /// Configuration constants.
    fn constants(&self) -> ArbiterConstants;

    /// Open a channel between `opener` and `peer`; returns its id.
    fn open_channel(&mut self, opener: Address, peer: Address) -> Result<String, DisputeError>;

    /// One participant's genesis submission with its placement proof.
    fn submit_initial_state(
        &mut self,
        channel_id: &str,
        submitter: Address,
        state: &GameState,
        signature: &StateSignature,
        placement_proof: &PlacementProof,
    ) -> Result<(), DisputeError>;

    /// On-chain fallback: the defender answers a guess directly.
    fn make_move(&mut self, channel_id: &str, defender: Address, proof: &MoveProof) -> Result<(), DisputeError>;

    /// Open a dispute on a dual-signed state.
    fn initiate_dispute(&mut self, challenger: Address, evidence: &DisputeEvidence) -> Result<Dispute, DisputeError>;

    /// Rebut with a higher-nonce dual-signed state and the proofs of the
    /// moves the disputed state omitted.
    fn respond_to_dispute(
        &mut self,
        channel_id: &str,
        responder: Address,
        counter: &SignedState,
        move_proofs: &[MoveProof],
    ) -> Result<Resolution, DisputeError>;

    /// Settle for the challenger once the response window has elapsed, or
    /// for the last on-chain defender once the next answer is overdue.
    fn claim_timeout(&mut self, channel_id: &str, claimant: Address) -> Result<Resolution, DisputeError>;

    /// Settle on a dual-signed final state and the loser's win proof.
    fn settle_channel(
        &mut self,
        channel_id: &str,
        final_state: &SignedState,
        win_proof: &WinProof,
    ) -> Result<Resolution, DisputeError>;

    /// Channel record.
    fn get_channel(&self, channel_id: &str) -> Result<ChannelRecord, DisputeError>;

    /// Highest accepted state.
    fn get_game_state(&self, channel_id: &str) -> Result<Option<GameState>, DisputeError>;

    /// Latest dispute on a channel.
    fn get_dispute(&self, channel_id: &str) -> Result<Dispute, DisputeError>;
}

// =============================================================================
// IN-MEMORY ARBITER
// =============================================================================

/// Reference arbiter with an explicit clock (seconds).
#[derive(Debug)]
pub struct InMemoryArbiter {
    config: ChannelConfig,
    proofs: ProofGateway,
    now: u64,
    channels: HashMap<String, ChannelRecord>,
    disputes: HashMap<String, Dispute>,
}

impl InMemoryArbiter {
    /// Create an arbiter verifying proofs through `proofs`.
    pub fn new(config: ChannelConfig, proofs: ProofGateway) -> Self {
        Self {
            config,
            proofs,
            now: 0,
            channels: HashMap::new(),
            disputes: HashMap::new(),
        }
    }

    /// Current arbiter time.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Move the clock forward.
    pub fn advance_time(&mut self, seconds: u64) {
        self.now += seconds;
        debug!("Arbiter clock at {}", self.now);
    }

    fn channel(&self, channel_id: &str) -> Result<&ChannelRecord, DisputeError> {
        self.channels.get(channel_id).ok_or_else(|| DisputeError::ChannelNotFound {
            channel_id: channel_id.to_string(),
        })
    }

    fn channel_mut(&mut self, channel_id: &str) -> Result<&mut ChannelRecord, DisputeError> {
        self.channels.get_mut(channel_id).ok_or_else(|| DisputeError::ChannelNotFound {
            channel_id: channel_id.to_string(),
        })
    }

    fn active_dispute(&self, channel_id: &str) -> Result<&Dispute, DisputeError> {
        let dispute = self.disputes.get(channel_id).ok_or_else(|| DisputeError::DisputeNotFound {
            channel_id: channel_id.to_string(),
        })?;
        if dispute.status != DisputeStatus::Active {
            return Err(DisputeError::DisputeNotActive { channel_id: channel_id.to_string() });
        }
        Ok(dispute)
    }

    /// Check digest, channel binding and both signatures of a state.
    fn check_dual_signed(
        &self,
        record: &ChannelRecord,
        state: &GameState,
        state_hash: &StateHash,
        player1_signature: &StateSignature,
        player2_signature: &StateSignature,
    ) -> Result<(), String> {
        if state.channel_id != record.id {
            return Err(format!("state belongs to channel {}", state.channel_id));
        }
        if !record.is_participant(&state.player1) || !record.is_participant(&state.player2) {
            return Err("state participants differ from channel".into());
        }
        let expected = typed_data_hash(&self.config.domain, state);
        if expected != *state_hash {
            return Err(format!("state hash {} does not match state", to_hex(state_hash)));
        }
        for (signer, signature) in [(state.player1, player1_signature), (state.player2, player2_signature)] {
            let check = verify_state_signature(&self.config.domain, signature, &signer, state);
            if !check.is_valid {
                return Err(format!(
                    "signature of {}: {}",
                    signer,
                    check.error.unwrap_or_else(|| "signer mismatch".into())
                ));
            }
        }
        Ok(())
    }

    /// Check the proofs covering the moves between two states.
    fn check_move_chain(
        &self,
        from: &GameState,
        to: &GameState,
        proofs: &[MoveProof],
    ) -> Result<(), DisputeError> {
        let invalid = |reason: String| DisputeError::InvalidDisputeEvidence { reason };
        let omitted = to
            .move_count
            .checked_sub(from.move_count)
            .ok_or_else(|| invalid("counter state has fewer moves".into()))?;
        if proofs.len() as u64 != omitted {
            return Err(invalid(format!("{} move proofs for {} omitted moves", proofs.len(), omitted)));
        }

        let game_id = FieldElement::from_id(&from.game_id);
        let mut previous = from.last_move_hash;
        for (i, proof) in proofs.iter().enumerate() {
            if !self.proofs.verify(proof) {
                return Err(DisputeError::Proof(ProofError::ProofVerificationFailed {
                    circuit: proof.circuit(),
                }));
            }
            let s = &proof.signals;
            let expected = from.move_count + i as u64;
            if s.move_count < expected {
                return Err(DisputeError::MoveChain {
                    dispute_type: DisputeType::ReusedMove,
                    reason: format!("proof {} replays move {}", i, s.move_count),
                });
            }
            if s.move_count != expected {
                return Err(invalid(format!("proof {} has move index {}", i, s.move_count)));
            }
            if s.previous_move_hash != previous {
                return Err(DisputeError::MoveChain {
                    dispute_type: DisputeType::InvalidStateChain,
                    reason: format!("proof {} breaks the move-hash chain", i),
                });
            }
            if s.game_id != game_id {
                return Err(invalid(format!("proof {} is for another game", i)));
            }
            let seat = from
                .seat_of(&s.player)
                .ok_or_else(|| invalid(format!("proof {} names a non-participant", i)))?;
            if s.commitment != from.commitment(seat) {
                return Err(invalid(format!("proof {} uses a foreign commitment", i)));
            }
            previous = s.new_move_hash;
        }
        if omitted > 0 && previous != to.last_move_hash {
            return Err(invalid("move proofs do not end at the counter state's move hash".into()));
        }
        Ok(())
    }

    /// Check the move history shipped with dispute evidence against the
    /// disputed state. A history cut short by a state sync is accepted;
    /// a complete one must end at the state's move hash.
    fn check_history(&self, evidence: &DisputeEvidence) -> Result<MoveHistory, DisputeError> {
        let invalid = |reason: String| DisputeError::InvalidDisputeEvidence { reason };
        let history = MoveHistory::from_bytes(&evidence.history)?;
        if history.root()? != evidence.history_root {
            return Err(invalid("history root does not match its records".into()));
        }
        let state = &evidence.state;
        let recorded = history.len() as u64;
        if recorded > state.move_count {
            return Err(invalid(format!("{} records for {} moves", recorded, state.move_count)));
        }
        for record in history.records() {
            if record.nonce > state.nonce || record.proof.signals.move_count >= state.move_count {
                return Err(invalid(format!("record at nonce {} is past the disputed state", record.nonce)));
            }
            if !self.proofs.verify(&record.proof) {
                return Err(DisputeError::Proof(ProofError::ProofVerificationFailed {
                    circuit: record.proof.circuit(),
                }));
            }
        }
        if let Some(last) = history.last().filter(|_| recorded == state.move_count) {
            if last.proof.signals.new_move_hash != state.last_move_hash {
                return Err(DisputeError::MoveChain {
                    dispute_type: DisputeType::InvalidStateChain,
                    reason: "history does not end at the disputed move hash".into(),
                });
            }
        }
        Ok(history)
    }

    fn claim_move_timeout(
        &mut self,
        channel_id: &str,
        claimant: Address,
        deadline: u64,
    ) -> Result<Resolution, DisputeError> {
        let record = self.channel(channel_id)?;
        if !record.is_participant(&claimant) {
            return Err(DisputeError::NotParticipant { address: claimant });
        }
        if self.now < deadline {
            return Err(DisputeError::ResponseWindowOpen { remaining: deadline - self.now });
        }
        let winner = record
            .onchain_moves
            .last()
            .map(|m| m.player)
            .ok_or_else(|| DisputeError::InvalidSettlement {
                reason: "no on-chain move to time out".into(),
            })?;

        let record = self.channel_mut(channel_id)?;
        record.status = ChannelStatus::Settled;
        record.winner = Some(winner);
        record.move_deadline = None;
        info!("On-chain move on {} went unanswered, settled for {}", channel_id, winner.short());
        Ok(Resolution::MoveTimedOut { winner })
    }
}

impl Arbiter for InMemoryArbiter {
    fn constants(&self) -> ArbiterConstants {
        ArbiterConstants::from(&self.config)
    }

    fn open_channel(&mut self, opener: Address, peer: Address) -> Result<String, DisputeError> {
        if opener == peer || peer.is_zero() {
            return Err(DisputeError::NotParticipant { address: peer });
        }
        let id = Uuid::new_v4().to_string();
        self.channels.insert(
            id.clone(),
            ChannelRecord {
                id: id.clone(),
                participants: [opener, peer],
                status: ChannelStatus::Opening,
                opened_at: self.now,
                initial_submissions: Vec::new(),
                latest_state: None,
                latest_state_hash: None,
                onchain_moves: Vec::new(),
                move_deadline: None,
                winner: None,
            },
        );
        info!("Channel {} opened: {} <-> {}", id, opener.short(), peer.short());
        Ok(id)
    }

    fn submit_initial_state(
        &mut self,
        channel_id: &str,
        submitter: Address,
        state: &GameState,
        signature: &StateSignature,
        placement_proof: &PlacementProof,
    ) -> Result<(), DisputeError> {
        let record = self.channel(channel_id)?;
        if record.status != ChannelStatus::Opening {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: "channel already past genesis".into(),
            });
        }
        if !record.is_participant(&submitter) {
            return Err(DisputeError::NotParticipant { address: submitter });
        }
        let invalid = |reason: &str| DisputeError::InvalidDisputeEvidence { reason: reason.into() };
        if state.nonce != 1 || state.move_count != 0 {
            return Err(invalid("initial state must be the genesis"));
        }
        if state.channel_id != record.id {
            return Err(invalid("initial state bound to another channel"));
        }
        let seat = state
            .seat_of(&submitter)
            .ok_or(DisputeError::NotParticipant { address: submitter })?;
        if !record.is_participant(&state.opponent_of(&submitter).unwrap_or_default()) {
            return Err(invalid("initial state participants differ from channel"));
        }
        let check = verify_state_signature(&self.config.domain, signature, &submitter, state);
        if !check.is_valid {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: check.error.unwrap_or_else(|| "signer mismatch".into()),
            });
        }
        self.proofs
            .verify_placement(placement_proof, &state.commitment(seat), &state.merkle_root(seat))?;

        let state_hash = typed_data_hash(&self.config.domain, state);
        if let Some(existing) = record.latest_state_hash {
            if existing != state_hash {
                return Err(invalid("initial state differs from the other submission"));
            }
        }

        let record = self.channel_mut(channel_id)?;
        if !record.initial_submissions.contains(&submitter) {
            record.initial_submissions.push(submitter);
        }
        record.latest_state = Some(state.clone());
        record.latest_state_hash = Some(state_hash);
        if record.initial_submissions.len() == 2 {
            record.status = ChannelStatus::Open;
            info!("Channel {} active, genesis {}", channel_id, to_hex(&state_hash));
        }
        Ok(())
    }

    fn make_move(&mut self, channel_id: &str, defender: Address, proof: &MoveProof) -> Result<(), DisputeError> {
        let record = self.channel(channel_id)?;
        if record.status != ChannelStatus::Open {
            return Err(DisputeError::InvalidSettlement {
                reason: format!("channel is {:?}", record.status),
            });
        }
        if !record.is_participant(&defender) || proof.signals.player != defender {
            return Err(DisputeError::NotParticipant { address: defender });
        }
        let state = record.latest_state.clone().ok_or_else(|| DisputeError::InvalidSettlement {
            reason: "no accepted state".into(),
        })?;
        if !self.proofs.verify(proof) {
            return Err(DisputeError::Proof(ProofError::ProofVerificationFailed {
                circuit: proof.circuit(),
            }));
        }
        let seat = state
            .seat_of(&defender)
            .ok_or(DisputeError::NotParticipant { address: defender })?;
        if proof.signals.commitment != state.commitment(seat) {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: "move proof uses a foreign commitment".into(),
            });
        }
        if let Some(deadline) = record.move_deadline.filter(|d| self.now >= *d) {
            return Err(DisputeError::MoveWindowClosed { deadline });
        }
        let (expected_index, previous, last_defender) = match record.onchain_moves.last() {
            Some(last) => (last.move_count + 1, last.new_move_hash, Some(last.player)),
            None => (state.move_count, state.last_move_hash, None),
        };
        let s = &proof.signals;
        if s.move_count < expected_index {
            return Err(DisputeError::MoveChain {
                dispute_type: DisputeType::ReusedMove,
                reason: format!("move {} already answered", s.move_count),
            });
        }
        if s.move_count != expected_index {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: format!("move index {} expected {}", s.move_count, expected_index),
            });
        }
        if last_defender == Some(defender) {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: format!("{} answered the previous on-chain move", defender.short()),
            });
        }
        if s.previous_move_hash != previous {
            return Err(DisputeError::MoveChain {
                dispute_type: DisputeType::InvalidStateChain,
                reason: format!("move {} does not extend the move-hash chain", s.move_count),
            });
        }
        if s.game_id != FieldElement::from_id(&state.game_id) {
            return Err(DisputeError::MoveChain {
                dispute_type: DisputeType::GameContextMismatch,
                reason: "move proof is for another game".into(),
            });
        }
        if expected_index >= self.config.max_moves as u64 {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: format!("move limit {} reached", self.config.max_moves),
            });
        }

        let deadline = self.now + self.config.challenge_period;
        let record = self.channel_mut(channel_id)?;
        record.onchain_moves.push(proof.signals.clone());
        record.move_deadline = Some(deadline);
        info!(
            "On-chain move ({}, {}) answered by {} on {}: {}",
            proof.signals.x,
            proof.signals.y,
            defender.short(),
            channel_id,
            if proof.signals.is_hit { "hit" } else { "miss" }
        );
        Ok(())
    }

    fn initiate_dispute(&mut self, challenger: Address, evidence: &DisputeEvidence) -> Result<Dispute, DisputeError> {
        let record = self.channel(&evidence.channel_id)?;
        match record.status {
            ChannelStatus::Open => {}
            status => {
                return Err(DisputeError::InvalidDisputeEvidence {
                    reason: format!("channel is {:?}", status),
                })
            }
        }
        if !record.is_participant(&challenger) {
            return Err(DisputeError::NotParticipant { address: challenger });
        }
        self.check_dual_signed(
            record,
            &evidence.state,
            &evidence.state_hash,
            &evidence.player1_signature,
            &evidence.player2_signature,
        )
        .map_err(|reason| {
            warn!("Dispute on {} rejected: {}", evidence.channel_id, reason);
            DisputeError::InvalidDisputeEvidence { reason }
        })?;
        if evidence.state.nonce < record.latest_nonce() {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: format!(
                    "nonce {} is below accepted nonce {}",
                    evidence.state.nonce,
                    record.latest_nonce()
                ),
            });
        }
        let history = self.check_history(evidence)?;
        debug!("Dispute evidence carries {} move records", history.len());
        let respondent = evidence
            .state
            .opponent_of(&challenger)
            .ok_or(DisputeError::NotParticipant { address: challenger })?;

        let dispute = Dispute {
            channel_id: evidence.channel_id.clone(),
            challenger,
            respondent,
            dispute_type: evidence.dispute_type,
            disputed_state: evidence.state.clone(),
            disputed_state_hash: evidence.state_hash,
            history_root: evidence.history_root,
            opened_at: self.now,
            deadline: self.now + self.config.response_period,
            status: DisputeStatus::Active,
            finding: None,
        };
        self.channel_mut(&evidence.channel_id)?.status = ChannelStatus::Disputed;
        self.disputes.insert(evidence.channel_id.clone(), dispute.clone());
        info!(
            "Dispute {:?} opened on {} by {} at nonce {}, deadline {}",
            dispute.dispute_type,
            dispute.channel_id,
            challenger.short(),
            dispute.disputed_state.nonce,
            dispute.deadline
        );
        Ok(dispute)
    }

    fn respond_to_dispute(
        &mut self,
        channel_id: &str,
        responder: Address,
        counter: &SignedState,
        move_proofs: &[MoveProof],
    ) -> Result<Resolution, DisputeError> {
        let dispute = self.active_dispute(channel_id)?.clone();
        if responder != dispute.respondent {
            if responder == dispute.challenger {
                return Err(DisputeError::InvalidDisputeEvidence {
                    reason: "challenger cannot rebut its own dispute".into(),
                });
            }
            return Err(DisputeError::NotParticipant { address: responder });
        }
        if self.now >= dispute.deadline {
            return Err(DisputeError::ResponseWindowClosed { deadline: dispute.deadline });
        }
        if counter.state.nonce <= dispute.disputed_state.nonce {
            return Err(DisputeError::StaleCounterState {
                disputed: dispute.disputed_state.nonce,
                offered: counter.state.nonce,
            });
        }
        if counter.state.game_id != dispute.disputed_state.game_id {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: "counter state is for another game".into(),
            });
        }
        let pair = counter.signature_pair().ok_or_else(|| DisputeError::InvalidDisputeEvidence {
            reason: "counter state is not dual-signed".into(),
        })?;
        let record = self.channel(channel_id)?;
        self.check_dual_signed(record, &counter.state, &counter.state_hash, &pair.player1, &pair.player2)
            .map_err(|reason| DisputeError::InvalidDisputeEvidence { reason })?;
        self.check_move_chain(&dispute.disputed_state, &counter.state, move_proofs)?;

        let nonce = counter.state.nonce;
        if let Some(d) = self.disputes.get_mut(channel_id) {
            d.status = DisputeStatus::CounterStateAccepted { nonce };
            d.finding = Some(DisputeType::MaliciousDispute);
        }
        let record = self.channel_mut(channel_id)?;
        record.status = ChannelStatus::Open;
        record.latest_state = Some(counter.state.clone());
        record.latest_state_hash = Some(counter.state_hash);
        info!(
            "Dispute on {} rebutted by {}: nonce {} -> {}",
            channel_id,
            responder.short(),
            dispute.disputed_state.nonce,
            nonce
        );
        Ok(Resolution::CounterStateAccepted { nonce })
    }

    fn claim_timeout(&mut self, channel_id: &str, claimant: Address) -> Result<Resolution, DisputeError> {
        let record = self.channel(channel_id)?;
        if let (ChannelStatus::Open, Some(deadline)) = (record.status, record.move_deadline) {
            return self.claim_move_timeout(channel_id, claimant, deadline);
        }
        let dispute = self.active_dispute(channel_id)?.clone();
        if claimant != dispute.challenger && claimant != dispute.respondent {
            return Err(DisputeError::NotParticipant { address: claimant });
        }
        if self.now < dispute.deadline {
            return Err(DisputeError::ResponseWindowOpen { remaining: dispute.deadline - self.now });
        }

        let winner = dispute.challenger;
        if let Some(d) = self.disputes.get_mut(channel_id) {
            d.status = DisputeStatus::TimedOut;
        }
        let record = self.channel_mut(channel_id)?;
        record.status = ChannelStatus::Settled;
        record.winner = Some(winner);
        info!("Dispute on {} timed out, settled for {}", channel_id, winner.short());
        Ok(Resolution::ChallengeTimedOut { winner })
    }

    fn settle_channel(
        &mut self,
        channel_id: &str,
        final_state: &SignedState,
        win_proof: &WinProof,
    ) -> Result<Resolution, DisputeError> {
        let record = self.channel(channel_id)?;
        let invalid = |reason: String| DisputeError::InvalidSettlement { reason };
        if record.status != ChannelStatus::Open {
            return Err(invalid(format!("channel is {:?}", record.status)));
        }
        let pair = final_state
            .signature_pair()
            .ok_or_else(|| invalid("final state is not dual-signed".into()))?;
        self.check_dual_signed(record, &final_state.state, &final_state.state_hash, &pair.player1, &pair.player2)
            .map_err(invalid)?;
        let state = &final_state.state;
        if state.nonce < record.latest_nonce() {
            return Err(DisputeError::StaleCounterState {
                disputed: record.latest_nonce(),
                offered: state.nonce,
            });
        }
        let winner = match (state.game_ended, state.winner) {
            (true, Some(winner)) => winner,
            _ => return Err(invalid("game has not ended".into())),
        };
        let seat = state.seat_of(&winner).ok_or_else(|| invalid("winner is not a participant".into()))?;
        if state.hits(seat) < self.config.win_threshold {
            return Err(invalid(format!(
                "winner has {} hits, {} required",
                state.hits(seat),
                self.config.win_threshold
            )));
        }
        let loser = seat.other();
        self.proofs.verify_win(
            win_proof,
            &state.commitment(loser),
            &state.merkle_root(loser),
            self.config.win_threshold as u64,
        )?;

        let nonce = state.nonce;
        let record = self.channel_mut(channel_id)?;
        record.status = ChannelStatus::Settled;
        record.winner = Some(winner);
        record.latest_state = Some(final_state.state.clone());
        record.latest_state_hash = Some(final_state.state_hash);
        info!("Channel {} settled for {} at nonce {}", channel_id, winner.short(), nonce);
        Ok(Resolution::Settled { winner, nonce })
    }

    fn get_channel(&self, channel_id: &str) -> Result<ChannelRecord, DisputeError> {
        self.channel(channel_id).cloned()
    }

    fn get_game_state(&self, channel_id: &str) -> Result<Option<GameState>, DisputeError> {
        Ok(self.channel(channel_id)?.latest_state.clone())
    }

    fn get_dispute(&self, channel_id: &str) -> Result<Dispute, DisputeError> {
        self.disputes.get(channel_id).cloned().ok_or_else(|| DisputeError::DisputeNotFound {
            channel_id: channel_id.to_string(),
        })
    }
}
