//! Channel State Machine
//!
//! One participant's replica of the channel. Owns the working `GameState`,
//! the latest signed snapshot, the local move history and the event queue.
//! Every mutation builds the next state on a copy, signs it, and only then
//! replaces the current state, so a failed operation never leaves a
//! half-applied state behind.
//!
//! ## Per-move flow
//!
//! ```text
//!   defender                                   attacker
//!   ────────                                   ────────
//!   update_latest_move_hash(proof.out)  (staged)
//!   make_move(move)          ── result ──▶     preview_move + verify sig
//!                                              update_latest_move_hash
//!                                              make_move(move)
//!   add_counter_signature    ◀── sig ────
//!   append_move_record                         append_move_record
//!
//!                                              switch_turn()
//!   preview_switch_turn      ◀── sig ────
//!   switch_turn()
//!   (countersign)            ── sig ───▶       add_counter_signature
//! ```
//!
//! `last_agreed` trails `latest`: it is the newest snapshot carrying both
//! signatures, and the only one the dispute path may escalate.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::core::address::Address;
use crate::core::clock::Clock;
use crate::core::hash::{to_hex, StateHash};
use crate::dispute::DisputeType;
use crate::game::board::in_bounds;
use crate::game::events::ChannelEvent;
use crate::game::state::{GameSetup, GameState, Move, MoveRecord, Phase, Seat, SignedState};
use crate::network::signing::{
    typed_data_hash, verify_state_signature, SignatureCheck, SigningError, StateSignature, StateSigner,
};
use crate::proof::public_inputs::MoveProof;
use crate::proof::transcript::{MoveHistory, TranscriptError};

/// Channel state machine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// `create_game` already ran on this replica.
    #[error("channel already initialized")]
    ChannelAlreadyInitialized,

    /// Operation needs a genesis state.
    #[error("channel not initialized")]
    ChannelNotInitialized,

    /// The game is over.
    #[error("game already ended")]
    GameAlreadyEnded,

    /// A different winner is already recorded.
    #[error("winner already declared: {winner}")]
    WinnerAlreadyDeclared {
        /// Recorded winner.
        winner: Address,
    },

    /// Proposed winner is not a participant.
    #[error("invalid winner {address}")]
    InvalidWinner {
        /// Offending address.
        address: Address,
    },

    /// Proposed winner has not reached the threshold.
    #[error("{player} has {hits} hits, {required} required")]
    InsufficientHits {
        /// Proposed winner.
        player: Address,
        /// Hits recorded.
        hits: u8,
        /// Threshold.
        required: u8,
    },

    /// Address is not one of the two participants.
    #[error("{address} is not a participant")]
    NotParticipant {
        /// Offending address.
        address: Address,
    },

    /// Genesis inputs are inconsistent.
    #[error("invalid setup: {reason}")]
    InvalidSetup {
        /// What was wrong.
        reason: String,
    },

    /// Move rejected before scoring.
    #[error("invalid move: {reason}")]
    InvalidMove {
        /// What was wrong.
        reason: String,
    },

    /// Opponent's signature does not cover the local state.
    #[error("counter-signature rejected: {reason}")]
    CounterSignatureMismatch {
        /// Why.
        reason: String,
    },

    /// Channel is under dispute; local play is frozen.
    #[error("channel is disputed")]
    ChannelDisputed,

    /// Signing backend failed.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Move history rejected a record.
    #[error(transparent)]
    History(#[from] TranscriptError),
}

/// One participant's channel replica.
pub struct Channel {
    config: ChannelConfig,
    signer: Arc<dyn StateSigner>,
    clock: Arc<dyn Clock>,
    state: GameState,
    latest: Option<SignedState>,
    last_agreed: Option<SignedState>,
    /// Move hash for the next `make_move`.
    staged_move_hash: Option<StateHash>,
    setup: Option<GameSetup>,
    placement_published: bool,
    disputed: bool,
    history: MoveHistory,
    events: Vec<ChannelEvent>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("address", &self.signer.address())
            .field("phase", &self.phase())
            .field("nonce", &self.state.nonce)
            .finish()
    }
}

impl Channel {
    /// Create an empty replica for the participant behind `signer`.
    pub fn new(config: ChannelConfig, signer: Arc<dyn StateSigner>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            signer,
            clock,
            state: GameState::empty(),
            latest: None,
            last_agreed: None,
            staged_move_hash: None,
            setup: None,
            placement_published: false,
            disputed: false,
            history: MoveHistory::new(),
            events: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Local participant.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Working state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Latest signed snapshot.
    pub fn latest(&self) -> Option<&SignedState> {
        self.latest.as_ref()
    }

    /// Newest snapshot signed by both participants.
    pub fn last_agreed(&self) -> Option<&SignedState> {
        self.last_agreed.as_ref()
    }

    /// Genesis inputs.
    pub fn setup(&self) -> Option<&GameSetup> {
        self.setup.as_ref()
    }

    /// Local move history.
    pub fn history(&self) -> &MoveHistory {
        &self.history
    }

    /// Genesis has run.
    pub fn is_initialized(&self) -> bool {
        self.latest.is_some()
    }

    /// Local seat, once initialized.
    pub fn seat(&self) -> Option<Seat> {
        self.state.seat_of(&self.address())
    }

    /// The other participant, once initialized.
    pub fn opponent(&self) -> Option<Address> {
        self.state.opponent_of(&self.address())
    }

    /// Is it the local participant's turn to guess?
    pub fn is_my_turn(&self) -> bool {
        self.is_initialized() && self.state.current_turn == self.address()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        if self.disputed {
            return Phase::Disputed;
        }
        if self.state.game_ended {
            return Phase::Ended;
        }
        match &self.latest {
            None if self.placement_published => Phase::AwaitingBothPlacements,
            None => Phase::Created,
            Some(signed) if signed.is_fully_signed() => Phase::Active,
            Some(_) => Phase::MoveProposed,
        }
    }

    /// Typed-data digest of a state under this channel's domain.
    pub fn state_hash(&self, state: &GameState) -> StateHash {
        typed_data_hash(&self.config.domain, state)
    }

    /// Replica wall clock, in milliseconds.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Drain queued events.
    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Record that the local placement has been published.
    pub fn mark_placement_published(&mut self) {
        if self.latest.is_none() {
            self.placement_published = true;
        }
    }

    /// Build the shared genesis state. Both replicas must call this with
    /// identical inputs.
    pub fn create_game(&mut self, setup: GameSetup) -> Result<SignedState, ChannelError> {
        if self.is_initialized() {
            return Err(ChannelError::ChannelAlreadyInitialized);
        }
        if setup.player1.address == setup.player2.address {
            return Err(ChannelError::InvalidSetup {
                reason: "players must be distinct".into(),
            });
        }
        if setup.player1.address.is_zero() || setup.player2.address.is_zero() {
            return Err(ChannelError::InvalidSetup {
                reason: "zero address participant".into(),
            });
        }
        let me = self.address();
        if me != setup.player1.address && me != setup.player2.address {
            return Err(ChannelError::NotParticipant { address: me });
        }

        let mut next = GameState::empty();
        next.game_id = setup.game_id.clone();
        next.channel_id = setup.room_id.clone();
        next.player1 = setup.player1.address;
        next.player2 = setup.player2.address;
        next.player1_ship_commitment = setup.player1.commitment;
        next.player2_ship_commitment = setup.player2.commitment;
        next.player1_merkle_root = setup.player1.merkle_root;
        next.player2_merkle_root = setup.player2.merkle_root;
        next.current_turn = setup.player1.address;
        next.nonce = 1;

        let signed = self.commit(next)?;
        self.setup = Some(setup);
        info!(
            "Game {} created, first turn {}, state {}",
            signed.state.game_id,
            signed.state.current_turn.short(),
            to_hex(&signed.state_hash)
        );
        self.events.push(ChannelEvent::GameCreated {
            game_id: signed.state.game_id.clone(),
            first_turn: signed.state.current_turn,
            state_hash: signed.state_hash,
        });
        Ok(signed)
    }

    /// State that `make_move(mv)` would produce after the move hash is
    /// updated to `move_hash`. Does not mutate.
    pub fn preview_move(&self, mv: &Move, move_hash: StateHash) -> Result<GameState, ChannelError> {
        self.ensure_playable()?;
        if let Some(winner) = self.state.winner {
            return Err(ChannelError::WinnerAlreadyDeclared { winner });
        }
        if !in_bounds(mv.x as u32, mv.y as u32) {
            return Err(ChannelError::InvalidMove {
                reason: format!("guess ({}, {}) is off the board", mv.x, mv.y),
            });
        }
        if self.state.move_count >= self.config.max_moves as u64 {
            return Err(ChannelError::InvalidMove {
                reason: format!("move limit {} reached", self.config.max_moves),
            });
        }

        let mut next = self.state.clone();
        next.last_move_hash = move_hash;
        next.nonce += 1;
        next.move_count += 1;
        if mv.is_hit {
            let attacker = next.current_turn;
            let seat = next
                .seat_of(&attacker)
                .ok_or(ChannelError::NotParticipant { address: attacker })?;
            let hits = next.hits_mut(seat);
            *hits = hits.saturating_add(1).min(self.config.win_threshold);
            // Win is part of the same transition as the hit that caused it.
            if *hits >= self.config.win_threshold {
                next.game_ended = true;
                next.winner = Some(attacker);
            }
        }
        Ok(next)
    }

    /// Score a resolved move for the player whose turn it is. Consumes the
    /// staged move hash, if any, whether or not the move is accepted.
    pub fn make_move(&mut self, mv: Move) -> Result<SignedState, ChannelError> {
        let attacker = self.state.current_turn;
        let move_hash = self.staged_move_hash.take().unwrap_or(self.state.last_move_hash);
        let next = self.preview_move(&mv, move_hash)?;
        let signed = self.commit(next)?;
        let state = &signed.state;

        debug!(
            "Move ({}, {}) by {}: {} (nonce {})",
            mv.x,
            mv.y,
            attacker.short(),
            if mv.is_hit { "hit" } else { "miss" },
            state.nonce
        );
        self.events.push(ChannelEvent::MoveApplied {
            nonce: state.nonce,
            attacker,
            x: mv.x,
            y: mv.y,
            is_hit: mv.is_hit,
        });
        if let Some(winner) = state.winner {
            info!("Game {} won by {} at nonce {}", state.game_id, winner.short(), state.nonce);
            self.events.push(ChannelEvent::GameEnded { winner, nonce: state.nonce });
        }
        Ok(signed)
    }

    /// State that `switch_turn()` would produce. Does not mutate.
    pub fn preview_switch_turn(&self) -> Result<GameState, ChannelError> {
        self.ensure_playable()?;
        let mut next = self.state.clone();
        next.current_turn = next
            .opponent_of(&next.current_turn)
            .ok_or(ChannelError::NotParticipant { address: next.current_turn })?;
        next.nonce += 1;
        Ok(next)
    }

    /// Hand the turn to the other participant.
    pub fn switch_turn(&mut self) -> Result<SignedState, ChannelError> {
        let next = self.preview_switch_turn()?;
        let signed = self.commit(next)?;
        debug!("Turn passed to {} (nonce {})", signed.state.current_turn.short(), signed.state.nonce);
        self.events.push(ChannelEvent::TurnSwitched {
            nonce: signed.state.nonce,
            current_turn: signed.state.current_turn,
        });
        Ok(signed)
    }

    /// Stage the latest move-proof output; the next `make_move` writes it
    /// into `last_move_hash`. Bookkeeping only; does not bump the nonce.
    pub fn update_latest_move_hash(&mut self, hash: StateHash) {
        self.staged_move_hash = Some(hash);
    }

    /// Fix the winner. A repeat declaration of the same winner is a no-op.
    pub fn declare_winner(&mut self, winner: Address) -> Result<SignedState, ChannelError> {
        if !self.is_initialized() {
            return Err(ChannelError::ChannelNotInitialized);
        }
        let seat = self
            .state
            .seat_of(&winner)
            .ok_or(ChannelError::InvalidWinner { address: winner })?;
        let hits = self.state.hits(seat);
        if hits < self.config.win_threshold {
            return Err(ChannelError::InsufficientHits {
                player: winner,
                hits,
                required: self.config.win_threshold,
            });
        }
        match self.state.winner {
            Some(existing) if existing == winner => {
                return self.latest.clone().ok_or(ChannelError::ChannelNotInitialized);
            }
            Some(existing) => return Err(ChannelError::WinnerAlreadyDeclared { winner: existing }),
            None => {}
        }
        if self.disputed {
            return Err(ChannelError::ChannelDisputed);
        }

        let mut next = self.state.clone();
        next.winner = Some(winner);
        next.game_ended = true;
        next.nonce += 1;
        let signed = self.commit(next)?;
        self.events.push(ChannelEvent::GameEnded { winner, nonce: signed.state.nonce });
        Ok(signed)
    }

    // =========================================================================
    // Signatures
    // =========================================================================

    /// Hash and sign the current working state.
    pub fn sign_state(&self) -> Result<(StateHash, StateSignature), ChannelError> {
        let hash = self.state_hash(&self.state);
        let signature = self.signer.sign_digest(&hash)?;
        Ok((hash, signature))
    }

    /// Check a signature over `state` under this channel's domain.
    pub fn verify_state_signature(
        &self,
        signature: &StateSignature,
        expected_signer: &Address,
        state: &GameState,
    ) -> SignatureCheck {
        verify_state_signature(&self.config.domain, signature, expected_signer, state)
    }

    /// Attach the opponent's signature to the latest snapshot.
    pub fn add_counter_signature(&mut self, signature: StateSignature) -> Result<SignedState, ChannelError> {
        let opponent = self.opponent().ok_or(ChannelError::ChannelNotInitialized)?;
        let latest = self.latest.as_mut().ok_or(ChannelError::ChannelNotInitialized)?;
        let check = verify_state_signature(&self.config.domain, &signature, &opponent, &latest.state);
        if !check.is_valid {
            warn!("Counter-signature rejected at nonce {}: {:?}", latest.state.nonce, check.error);
            return Err(ChannelError::CounterSignatureMismatch {
                reason: check.error.unwrap_or_else(|| "signer mismatch".into()),
            });
        }
        let seat = latest
            .state
            .seat_of(&opponent)
            .ok_or(ChannelError::NotParticipant { address: opponent })?;
        latest.set_signature(seat, signature);
        debug!("Nonce {} fully signed", latest.state.nonce);
        let agreed = latest.clone();
        self.last_agreed = Some(agreed.clone());
        Ok(agreed)
    }

    /// Append the latest (dual-signed) move snapshot to the history.
    pub fn append_move_record(&mut self, mv: Move, proof: MoveProof) -> Result<MoveRecord, ChannelError> {
        let latest = self.latest.as_ref().ok_or(ChannelError::ChannelNotInitialized)?;
        let signatures = latest
            .signature_pair()
            .ok_or_else(|| ChannelError::CounterSignatureMismatch {
                reason: format!("nonce {} is not dual-signed", latest.state.nonce),
            })?;
        let record = MoveRecord {
            mv,
            signatures,
            nonce: latest.state.nonce,
            state_hash: latest.state_hash,
            call_data: proof.call_data(),
            proof,
        };
        self.history.push(record.clone())?;
        Ok(record)
    }

    /// Replace local state with a canonical (already verified) snapshot.
    pub fn adopt(&mut self, signed: SignedState) {
        let from_nonce = self.state.nonce;
        let to_nonce = signed.state.nonce;
        let newly_ended = signed.state.game_ended && !self.state.game_ended;
        self.state = signed.state.clone();
        self.staged_move_hash = None;
        if signed.is_fully_signed() {
            self.last_agreed = Some(signed.clone());
        }
        self.latest = Some(signed);
        info!("Adopted peer state: nonce {} -> {}", from_nonce, to_nonce);
        self.events.push(ChannelEvent::StateSynchronized { from_nonce, to_nonce });
        if let (true, Some(winner)) = (newly_ended, self.state.winner) {
            self.events.push(ChannelEvent::GameEnded { winner, nonce: to_nonce });
        }
    }

    /// Freeze local play and ask the caller to escalate.
    pub fn mark_disputed(&mut self, dispute_type: DisputeType, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Dispute required ({:?}): {}", dispute_type, reason);
        self.disputed = true;
        self.events.push(ChannelEvent::DisputeRequired { dispute_type, reason });
    }

    /// Close the replica after arbiter settlement.
    pub fn mark_settled(&mut self) {
        self.disputed = false;
        self.state.game_ended = true;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_playable(&self) -> Result<(), ChannelError> {
        if !self.is_initialized() {
            return Err(ChannelError::ChannelNotInitialized);
        }
        if self.disputed {
            return Err(ChannelError::ChannelDisputed);
        }
        if self.state.game_ended {
            return Err(ChannelError::GameAlreadyEnded);
        }
        Ok(())
    }

    /// Sign `next` and make it current. Nothing changes if signing fails.
    fn commit(&mut self, mut next: GameState) -> Result<SignedState, ChannelError> {
        next.timestamp = self.clock.now_millis();
        let state_hash = self.state_hash(&next);
        let signature = self.signer.sign_digest(&state_hash)?;
        let seat = next
            .seat_of(&self.address())
            .ok_or(ChannelError::NotParticipant { address: self.address() })?;

        #[cfg(feature = "debug-tracing")]
        debug!(state = ?next, "committing state");

        let mut signed = SignedState {
            state: next,
            state_hash,
            player1_signature: None,
            player2_signature: None,
        };
        signed.set_signature(seat, signature);
        self.state = signed.state.clone();
        self.latest = Some(signed.clone());
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::game::board::TOTAL_SHIP_CELLS;
    use crate::game::state::PlayerSetup;
    use crate::network::signing::LocalSigner;
    use crate::proof::public_inputs::{FieldElement, Groth16Proof, PlacementSignals, ProofBundle};
    use proptest::prelude::*;

    fn dummy_placement(tag: u8) -> ProofBundle<PlacementSignals> {
        let zero = FieldElement::ZERO;
        ProofBundle {
            proof: Groth16Proof { pi_a: [zero; 2], pi_b: [[zero; 2]; 2], pi_c: [zero; 2] },
            signals: PlacementSignals {
                commitment: FieldElement([tag; 32]),
                merkle_root: FieldElement([tag + 1; 32]),
            },
        }
    }

    fn setup(a: &LocalSigner, b: &LocalSigner) -> GameSetup {
        GameSetup {
            game_id: "game-1".into(),
            room_id: "room-1".into(),
            player1: PlayerSetup {
                address: a.address(),
                commitment: [1; 32],
                merkle_root: [2; 32],
                proof: dummy_placement(1),
            },
            player2: PlayerSetup {
                address: b.address(),
                commitment: [3; 32],
                merkle_root: [4; 32],
                proof: dummy_placement(3),
            },
        }
    }

    fn pair() -> (Channel, Channel) {
        let a = LocalSigner::random();
        let b = LocalSigner::random();
        let s = setup(&a, &b);
        let clock = Arc::new(ManualClock::new(1_000));
        let mut c1 = Channel::new(ChannelConfig::default(), Arc::new(a), clock.clone());
        let mut c2 = Channel::new(ChannelConfig::default(), Arc::new(b), clock);
        c1.create_game(s.clone()).unwrap();
        c2.create_game(s).unwrap();
        (c1, c2)
    }

    fn hit(x: u8) -> Move {
        Move { x, y: 0, is_hit: true, timestamp: 0 }
    }

    #[test]
    fn test_genesis_identical() {
        let (c1, c2) = pair();
        assert_eq!(c1.state().nonce, 1);
        assert_eq!(c1.latest().unwrap().state_hash, c2.latest().unwrap().state_hash);
        assert_eq!(c1.state().current_turn, c1.address());
        assert_eq!(c1.phase(), Phase::MoveProposed);
    }

    #[test]
    fn test_create_twice_rejected() {
        let (mut c1, _) = pair();
        let s = c1.setup().unwrap().clone();
        let before = c1.state().clone();
        assert_eq!(c1.create_game(s), Err(ChannelError::ChannelAlreadyInitialized));
        assert_eq!(c1.state(), &before);
    }

    #[test]
    fn test_counter_signature_completes_snapshot() {
        let (mut c1, mut c2) = pair();
        let (_, sig2) = c2.sign_state().unwrap();
        let (_, sig1) = c1.sign_state().unwrap();
        c1.add_counter_signature(sig2).unwrap();
        c2.add_counter_signature(sig1).unwrap();
        assert!(c1.latest().unwrap().is_fully_signed());
        assert_eq!(c1.phase(), Phase::Active);

        // Our own signature is not a counter-signature.
        let (_, own) = c1.sign_state().unwrap();
        assert!(matches!(
            c1.add_counter_signature(own),
            Err(ChannelError::CounterSignatureMismatch { .. })
        ));
    }

    #[test]
    fn test_move_scores_current_turn() {
        let (mut c1, _) = pair();
        let signed = c1.make_move(hit(0)).unwrap();
        assert_eq!(signed.state.nonce, 2);
        assert_eq!(signed.state.move_count, 1);
        assert_eq!(signed.state.player1_hits, 1);
        assert_eq!(signed.state.player2_hits, 0);

        let signed = c1.switch_turn().unwrap();
        assert_eq!(signed.state.nonce, 3);
        assert_eq!(signed.state.current_turn, signed.state.player2);
    }

    #[test]
    fn test_move_hash_not_a_mutation() {
        let (mut c1, _) = pair();
        c1.update_latest_move_hash([9; 32]);
        assert_eq!(c1.state().nonce, 1);
        assert_eq!(c1.state(), &c1.latest().unwrap().state);
        let signed = c1.make_move(hit(0)).unwrap();
        assert_eq!(signed.state.last_move_hash, [9; 32]);
    }

    #[test]
    fn test_rejected_move_drops_staged_hash() {
        let (mut c1, _) = pair();
        c1.update_latest_move_hash([9; 32]);
        let off_board = Move { x: 10, y: 0, is_hit: false, timestamp: 0 };
        assert!(c1.make_move(off_board).is_err());
        assert_eq!(c1.state(), &c1.latest().unwrap().state);
        assert_eq!(c1.state().last_move_hash, [0; 32]);

        let signed = c1.make_move(hit(0)).unwrap();
        assert_eq!(signed.state.last_move_hash, [0; 32]);
    }

    #[test]
    fn test_last_agreed_trails_latest() {
        let (mut c1, mut c2) = pair();
        assert!(c1.last_agreed().is_none());

        let (_, sig2) = c2.sign_state().unwrap();
        c1.add_counter_signature(sig2).unwrap();
        assert_eq!(c1.last_agreed().unwrap().state.nonce, 1);

        // Own-signed steps move `latest` only.
        c1.switch_turn().unwrap();
        assert_eq!(c1.latest().unwrap().state.nonce, 2);
        assert_eq!(c1.last_agreed().unwrap().state.nonce, 1);
        assert!(c1.last_agreed().unwrap().is_fully_signed());

        c2.switch_turn().unwrap();
        let (_, sig2) = c2.sign_state().unwrap();
        c1.add_counter_signature(sig2).unwrap();
        assert_eq!(c1.last_agreed().unwrap().state.nonce, 2);
    }

    #[test]
    fn test_win_is_atomic() {
        let (mut c1, _) = pair();
        for i in 0..TOTAL_SHIP_CELLS - 1 {
            let signed = c1.make_move(hit(i % 10)).unwrap();
            assert!(!signed.state.game_ended);
        }
        assert!(matches!(
            c1.declare_winner(c1.address()),
            Err(ChannelError::InsufficientHits { hits: 11, required: 12, .. })
        ));

        let signed = c1.make_move(hit(5)).unwrap();
        assert_eq!(signed.state.player1_hits, 12);
        assert!(signed.state.game_ended);
        assert_eq!(signed.state.winner, Some(c1.address()));

        let events = c1.take_events();
        assert!(matches!(events.last(), Some(ChannelEvent::GameEnded { .. })));

        // Terminal.
        assert_eq!(c1.make_move(hit(1)), Err(ChannelError::GameAlreadyEnded));
        assert_eq!(c1.switch_turn().unwrap_err(), ChannelError::GameAlreadyEnded);
        assert_eq!(c1.phase(), Phase::Ended);

        // Idempotent declaration, same nonce.
        let again = c1.declare_winner(c1.address()).unwrap();
        assert_eq!(again.state.nonce, signed.state.nonce);
    }

    #[test]
    fn test_declare_winner_guards() {
        let (mut c1, _) = pair();
        let stranger = Address::new([0xaa; 20]);
        assert_eq!(
            c1.declare_winner(stranger),
            Err(ChannelError::InvalidWinner { address: stranger })
        );
    }

    #[test]
    fn test_out_of_bounds_guess() {
        let (mut c1, _) = pair();
        let result = c1.make_move(Move { x: 10, y: 0, is_hit: false, timestamp: 0 });
        assert!(matches!(result, Err(ChannelError::InvalidMove { .. })));
        assert_eq!(c1.state().nonce, 1);
    }

    #[test]
    fn test_move_limit() {
        let a = LocalSigner::random();
        let b = LocalSigner::random();
        let config = ChannelConfig { max_moves: 2, ..Default::default() };
        let mut c = Channel::new(config, Arc::new(a.clone()), Arc::new(ManualClock::new(0)));
        c.create_game(setup(&a, &b)).unwrap();
        let miss = Move { x: 0, y: 0, is_hit: false, timestamp: 0 };
        c.make_move(miss).unwrap();
        c.make_move(miss).unwrap();
        assert!(matches!(c.make_move(miss), Err(ChannelError::InvalidMove { .. })));
    }

    #[test]
    fn test_not_initialized() {
        let signer = LocalSigner::random();
        let mut c = Channel::new(ChannelConfig::default(), Arc::new(signer), Arc::new(ManualClock::new(0)));
        assert_eq!(c.phase(), Phase::Created);
        c.mark_placement_published();
        assert_eq!(c.phase(), Phase::AwaitingBothPlacements);
        assert_eq!(c.switch_turn(), Err(ChannelError::ChannelNotInitialized));
        assert_eq!(c.make_move(hit(0)), Err(ChannelError::ChannelNotInitialized));
    }

    #[test]
    fn test_stranger_cannot_create() {
        let a = LocalSigner::random();
        let b = LocalSigner::random();
        let stranger = LocalSigner::random();
        let mut c = Channel::new(ChannelConfig::default(), Arc::new(stranger.clone()), Arc::new(ManualClock::new(0)));
        assert_eq!(
            c.create_game(setup(&a, &b)),
            Err(ChannelError::NotParticipant { address: stranger.address() })
        );
    }

    #[test]
    fn test_disputed_freezes_play() {
        let (mut c1, _) = pair();
        c1.mark_disputed(DisputeType::InvalidProof, "bad proof");
        assert_eq!(c1.phase(), Phase::Disputed);
        assert_eq!(c1.make_move(hit(0)), Err(ChannelError::ChannelDisputed));
        assert!(matches!(c1.take_events().last(), Some(ChannelEvent::DisputeRequired { .. })));
    }

    #[test]
    fn test_timestamp_advisory() {
        let a = LocalSigner::random();
        let b = LocalSigner::random();
        let s = setup(&a, &b);
        let mut c1 = Channel::new(ChannelConfig::default(), Arc::new(a), Arc::new(ManualClock::new(1)));
        let mut c2 = Channel::new(ChannelConfig::default(), Arc::new(b), Arc::new(ManualClock::new(99_999)));
        let g1 = c1.create_game(s.clone()).unwrap();
        let g2 = c2.create_game(s).unwrap();
        assert_ne!(g1.state.timestamp, g2.state.timestamp);
        assert_eq!(g1.state_hash, g2.state_hash);
    }

    proptest! {
        #[test]
        fn prop_nonce_increments_by_one(ops in proptest::collection::vec(0u8..3, 1..40)) {
            let (mut c1, _) = pair();
            let mut last = c1.state().nonce;
            for op in ops {
                let result = match op {
                    0 => c1.make_move(Move { x: 1, y: 1, is_hit: false, timestamp: 0 }),
                    1 => c1.make_move(hit(2)),
                    _ => c1.switch_turn(),
                };
                match result {
                    Ok(signed) => {
                        prop_assert_eq!(signed.state.nonce, last + 1);
                        last = signed.state.nonce;
                    }
                    Err(_) => prop_assert_eq!(c1.state().nonce, last),
                }
                let p1 = c1.state().player1_hits;
                let p2 = c1.state().player2_hits;
                prop_assert!(p1 <= TOTAL_SHIP_CELLS && p2 <= TOTAL_SHIP_CELLS);
                if p1 == TOTAL_SHIP_CELLS || p2 == TOTAL_SHIP_CELLS {
                    prop_assert!(c1.state().game_ended);
                    prop_assert!(c1.state().winner.is_some());
                }
            }
        }
    }
}
