//! Replica Session
//!
//! Drives one participant's channel replica through the peer protocol.
//! Every received claim is checked before it touches local state:
//!
//! ```text
//!   receive ─▶ verify proof ─▶ verify counterpart signature ─▶ apply ─▶ sign ─▶ reply
//! ```
//!
//! No step is skipped or reordered. Messages whose nonce is already behind
//! the local state are ignored, so duplicate delivery is harmless. A turn
//! switch that overtakes the counter-signature it follows is held and
//! replayed once that signature lands. A failed proof or signature check
//! freezes the replica and surfaces a [`DisputeType`] for the dispute
//! coordinator.
//!
//! Channel events are drained after every handled envelope and forwarded
//! to the optional [`EventSink`].

use std::collections::HashSet;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::core::address::Address;
use crate::dispute::DisputeType;
use crate::game::board::{in_bounds, Board, Ship};
use crate::game::channel::{Channel, ChannelError};
use crate::game::events::ChannelEvent;
use crate::game::placement::validate;
use crate::game::state::{GameSetup, Move, Phase, PlayerSetup, SignedState};
use crate::network::protocol::{Envelope, PeerMessage};
use crate::network::signing::StateSignature;
use crate::network::sync::{SyncError, SyncOutcome, Synchronizer};
use crate::proof::commitment::{CommittedBoard, Salt};
use crate::proof::public_inputs::{MoveProof, WinProof};
use crate::proof::verify::{MoveContext, ProofError, ProofGateway};

// =============================================================================
// TYPES
// =============================================================================

/// Agreed game parameters, known to both sides before placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    /// Game identifier.
    pub game_id: String,
    /// Channel id on the arbiter.
    pub room_id: String,
    /// First mover.
    pub player1: Address,
    /// Second mover.
    pub player2: Address,
}

impl Invite {
    /// The other participant.
    pub fn peer_of(&self, address: &Address) -> Option<Address> {
        if *address == self.player1 {
            Some(self.player2)
        } else if *address == self.player2 {
            Some(self.player1)
        } else {
            None
        }
    }
}

/// Receiver side of a replica's channel events, tagged with its address.
pub type EventSink = mpsc::UnboundedSender<(Address, ChannelEvent)>;

/// Result of handling one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Messages to send back, in order.
    Reply(Vec<Envelope>),
    /// Applied; nothing to send.
    Applied,
    /// Held until the counter-signature for the previous nonce arrives.
    Deferred {
        /// Envelope nonce.
        nonce: u64,
    },
    /// Message refers to a state we are already past. Not an error.
    StaleNonceIgnored {
        /// Local nonce.
        local: u64,
        /// Envelope nonce.
        peer: u64,
    },
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Local state machine refused.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Local proof generation failed.
    #[error(transparent)]
    Proof(#[from] ProofError),

    /// Resolver refused a peer snapshot.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Local fleet breaks the placement rules.
    #[error("invalid placement: {}", .errors.join("; "))]
    InvalidPlacement {
        /// Every violation found.
        errors: Vec<String>,
    },

    /// Envelope from someone other than the peer.
    #[error("message from unknown sender {address}")]
    UnknownSender {
        /// Sender.
        address: Address,
    },

    /// Message does not fit the current protocol step.
    #[error("unexpected {kind}: {reason}")]
    UnexpectedMessage {
        /// Message kind.
        kind: &'static str,
        /// Why.
        reason: String,
    },

    /// Guess made out of turn.
    #[error("not {player}'s turn")]
    NotYourTurn {
        /// Player who acted.
        player: Address,
    },

    /// The latest state still lacks the peer's signature.
    #[error("nonce {nonce} awaits the counter-signature")]
    AwaitingCounterSignature {
        /// Unfinished nonce.
        nonce: u64,
    },

    /// A guess is already in flight.
    #[error("guess ({x}, {y}) still awaiting its result")]
    GuessPending {
        /// Column.
        x: u8,
        /// Row.
        y: u8,
    },

    /// Cell was already guessed.
    #[error("cell ({x}, {y}) already guessed")]
    RepeatedGuess {
        /// Column.
        x: u8,
        /// Row.
        y: u8,
    },

    /// Peer proof failed; escalate.
    #[error("peer proof rejected ({dispute_type:?}): {source}")]
    InvalidProof {
        /// Suggested dispute.
        dispute_type: DisputeType,
        /// Verification failure.
        source: ProofError,
    },

    /// Peer signature failed; escalate.
    #[error("peer signature rejected ({dispute_type:?}): {reason}")]
    InvalidSignature {
        /// Suggested dispute.
        dispute_type: DisputeType,
        /// Why.
        reason: String,
    },

    /// Claimed hit bit contradicts the proof; escalate.
    #[error("peer claimed hit={claimed} but proved hit={proved}")]
    InvalidHitResult {
        /// Bit in the message.
        claimed: bool,
        /// Bit in the proof.
        proved: bool,
    },
}

impl SessionError {
    /// Dispute this error calls for, if any.
    pub fn dispute_type(&self) -> Option<DisputeType> {
        match self {
            SessionError::InvalidProof { dispute_type, .. } => Some(*dispute_type),
            SessionError::InvalidSignature { dispute_type, .. } => Some(*dispute_type),
            SessionError::InvalidHitResult { .. } => Some(DisputeType::InvalidHitResult),
            SessionError::Sync(SyncError::Equivocation { .. }) => Some(DisputeType::InvalidStateChain),
            _ => None,
        }
    }
}

// =============================================================================
// REPLICA
// =============================================================================

/// One participant's end of the game.
#[derive(Debug)]
pub struct Replica {
    channel: Channel,
    proofs: ProofGateway,
    invite: Invite,
    peer: Address,
    board: CommittedBoard,
    sync: Synchronizer,
    local_setup: Option<PlayerSetup>,
    peer_setup: Option<PlayerSetup>,
    /// Guess sent, result not yet received.
    pending_guess: Option<(u8, u8)>,
    /// Answer sent, counter-signature not yet received.
    pending_move: Option<(u64, Move, MoveProof)>,
    /// Turn switch that arrived ahead of that counter-signature.
    early_switch: Option<(u64, StateSignature)>,
    shots: HashSet<(u8, u8)>,
    guessed_against: HashSet<(u8, u8)>,
    win_proof: Option<WinProof>,
    event_sink: Option<EventSink>,
}

impl Replica {
    /// Validate the local fleet and commit to it under `salt`.
    pub fn new(
        channel: Channel,
        proofs: ProofGateway,
        invite: Invite,
        ships: &[Ship],
        salt: Salt,
    ) -> Result<Self, SessionError> {
        let me = channel.address();
        let peer = invite
            .peer_of(&me)
            .ok_or(ChannelError::NotParticipant { address: me })?;
        let board = Board::from_ships(ships);
        let report = validate(ships, board.cells());
        if !report.valid {
            return Err(SessionError::InvalidPlacement { errors: report.messages() });
        }
        let board = CommittedBoard::with_salt(board, salt);
        info!(
            "Replica {} committed fleet: {}",
            me.short(),
            board.public.commitment_hex()
        );

        Ok(Self {
            channel,
            proofs,
            invite,
            peer,
            board,
            sync: Synchronizer::new(),
            local_setup: None,
            peer_setup: None,
            pending_guess: None,
            pending_move: None,
            early_switch: None,
            shots: HashSet::new(),
            guessed_against: HashSet::new(),
            win_proof: None,
            event_sink: None,
        })
    }

    /// Local participant.
    pub fn address(&self) -> Address {
        self.channel.address()
    }

    /// The other participant.
    pub fn peer(&self) -> Address {
        self.peer
    }

    /// Channel replica.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Mutable channel replica, for the dispute coordinator.
    pub fn channel_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }

    /// Local committed board.
    pub fn board(&self) -> &CommittedBoard {
        &self.board
    }

    /// Win proof for the finished game: received as winner, produced as loser.
    pub fn win_proof(&self) -> Option<&WinProof> {
        self.win_proof.as_ref()
    }

    /// Game over locally.
    pub fn is_game_over(&self) -> bool {
        self.channel.state().game_ended
    }

    /// Forward channel events to `sink` from now on.
    pub fn set_event_sink(&mut self, sink: EventSink) {
        self.event_sink = Some(sink);
    }

    /// Drain queued channel events, log them and pass them to the sink.
    ///
    /// Called after every handled envelope; call it directly after driving
    /// the channel from outside, e.g. through the dispute coordinator.
    pub fn flush_events(&mut self) -> Vec<ChannelEvent> {
        let events = self.channel.take_events();
        let me = self.address();
        for event in &events {
            debug!("Channel event for {}: {:?}", me.short(), event);
            if let Some(sink) = &self.event_sink {
                if sink.send((me, event.clone())).is_err() {
                    warn!("Event sink closed, dropping further events");
                    self.event_sink = None;
                    break;
                }
            }
        }
        events
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Prove the local fleet and publish commitment, root and proof. Also
    /// emits the genesis signature if the peer's placement is already here.
    pub fn publish_placement(&mut self) -> Result<Vec<Envelope>, SessionError> {
        let setup = if let Some(setup) = self.local_setup.clone() {
            setup
        } else {
            let proof = self.proofs.prove_ship_placement(&self.board.board, &self.board.salt)?;
            let setup = PlayerSetup {
                address: self.address(),
                commitment: self.board.public.commitment,
                merkle_root: self.board.public.merkle_root,
                proof,
            };
            self.local_setup = Some(setup.clone());
            self.channel.mark_placement_published();
            setup
        };
        let mut out = vec![self.envelope(0, PeerMessage::Placement { setup })];
        out.extend(self.try_genesis()?);
        self.flush_events();
        Ok(out)
    }

    /// Guess a cell on the peer's board.
    pub fn fire(&mut self, x: u8, y: u8) -> Result<Envelope, SessionError> {
        self.ensure_settled()?;
        if !self.channel.is_my_turn() {
            return Err(SessionError::NotYourTurn { player: self.address() });
        }
        if let Some((px, py)) = self.pending_guess {
            return Err(SessionError::GuessPending { x: px, y: py });
        }
        if !in_bounds(x as u32, y as u32) {
            return Err(ChannelError::InvalidMove {
                reason: format!("guess ({}, {}) is off the board", x, y),
            }
            .into());
        }
        if self.shots.contains(&(x, y)) {
            return Err(SessionError::RepeatedGuess { x, y });
        }
        self.pending_guess = Some((x, y));
        debug!("Firing at ({}, {})", x, y);
        Ok(self.envelope(self.channel.state().nonce, PeerMessage::Guess { x, y }))
    }

    /// Last dual-signed snapshot, for a peer that fell behind.
    pub fn state_sync_message(&self) -> Option<Envelope> {
        let agreed = self.channel.last_agreed()?;
        Some(self.envelope(
            agreed.state.nonce,
            PeerMessage::StateSync { state: agreed.clone() },
        ))
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Handle one envelope from the peer.
    #[instrument(skip(self, envelope), fields(me = %self.address().short(), kind = envelope.message.kind(), nonce = envelope.nonce))]
    pub fn handle(&mut self, envelope: Envelope) -> Result<Delivery, SessionError> {
        if envelope.from != self.peer {
            return Err(SessionError::UnknownSender { address: envelope.from });
        }
        let delivery = self.dispatch(envelope);
        self.flush_events();
        delivery
    }

    fn dispatch(&mut self, envelope: Envelope) -> Result<Delivery, SessionError> {
        let nonce = envelope.nonce;
        match envelope.message {
            PeerMessage::Placement { setup } => self.on_placement(nonce, setup),
            PeerMessage::GenesisSignature { signature } => self.on_genesis_signature(nonce, signature),
            PeerMessage::Guess { x, y } => self.on_guess(nonce, x, y),
            PeerMessage::MoveResult { mv, proof, signature, win_proof } => {
                self.on_move_result(nonce, mv, proof, signature, win_proof)
            }
            PeerMessage::CounterSignature { signature } => self.on_counter_signature(nonce, signature),
            PeerMessage::TurnSwitch { signature } => self.on_turn_switch(nonce, signature),
            PeerMessage::StateSync { state } => self.on_state_sync(state),
        }
    }

    fn on_placement(&mut self, nonce: u64, setup: PlayerSetup) -> Result<Delivery, SessionError> {
        if setup.address != self.peer {
            return Err(SessionError::UnknownSender { address: setup.address });
        }
        if let Some(existing) = &self.peer_setup {
            if *existing == setup {
                return Ok(self.stale(nonce));
            }
            return Err(SessionError::UnexpectedMessage {
                kind: "placement",
                reason: "peer already published a different placement".into(),
            });
        }
        if let Err(e) = self
            .proofs
            .verify_placement(&setup.proof, &setup.commitment, &setup.merkle_root)
        {
            return Err(self.reject_proof(DisputeType::InvalidShipPlacement, e));
        }
        info!("Peer {} placement verified", self.peer.short());
        self.peer_setup = Some(setup);
        Ok(match self.try_genesis()? {
            Some(envelope) => Delivery::Reply(vec![envelope]),
            None => Delivery::Applied,
        })
    }

    fn on_genesis_signature(&mut self, nonce: u64, signature: StateSignature) -> Result<Delivery, SessionError> {
        let Some(latest) = self.channel.latest() else {
            return Err(SessionError::UnexpectedMessage {
                kind: "genesis_signature",
                reason: "genesis not created yet".into(),
            });
        };
        if latest.state.nonce > 1 || latest.is_fully_signed() {
            return Ok(self.stale(nonce));
        }
        self.counter_sign(signature)?;
        info!("Genesis dual-signed, game {} active", self.channel.state().game_id);
        Ok(Delivery::Applied)
    }

    fn on_guess(&mut self, nonce: u64, x: u8, y: u8) -> Result<Delivery, SessionError> {
        let local = self.channel.state().nonce;
        if nonce < local || self.pending_move.is_some() {
            return Ok(self.stale(nonce));
        }
        if nonce > local {
            return Err(self.ahead("guess", nonce));
        }
        self.ensure_settled()?;
        if self.channel.state().current_turn != self.peer {
            return Err(SessionError::NotYourTurn { player: self.peer });
        }
        if self.guessed_against.contains(&(x, y)) {
            return Err(SessionError::RepeatedGuess { x, y });
        }

        let state = self.channel.state();
        let context = MoveContext {
            commitment: self.board.public.commitment,
            previous_move_hash: state.last_move_hash,
            move_count: state.move_count,
            game_id: state.game_id.clone(),
            player: self.address(),
            x,
            y,
        };
        let mv = Move {
            x,
            y,
            is_hit: self.board.board.is_occupied(x, y),
            timestamp: self.channel.now_millis(),
        };
        let proof = self.proofs.prove_move(&self.board.board, &self.board.salt, &context, mv.is_hit)?;
        let preview = self.channel.preview_move(&mv, proof.signals.new_move_hash)?;

        let mut hits_taken = self.channel.history().hits_against(&self.address());
        if mv.is_hit {
            hits_taken.push((x, y));
        }
        // The sinking answer carries the proof the winner needs to settle.
        let win_proof = if preview.game_ended {
            Some(self.proofs.prove_win(
                &self.board.board,
                &self.board.salt,
                self.board.public.commitment,
                self.board.public.merkle_root,
                hits_taken.len() as u64,
                &hits_taken,
            )?)
        } else {
            None
        };

        self.channel.update_latest_move_hash(proof.signals.new_move_hash);
        let signed = self.channel.make_move(mv)?;
        let signature = self.own_signature(&signed)?;
        self.guessed_against.insert((x, y));
        self.pending_move = Some((signed.state.nonce, mv, proof.clone()));
        if win_proof.is_some() {
            self.win_proof = win_proof.clone();
        }
        debug!(
            "Answered ({}, {}) with {} at nonce {}",
            x,
            y,
            if mv.is_hit { "hit" } else { "miss" },
            signed.state.nonce
        );

        Ok(Delivery::Reply(vec![self.envelope(
            signed.state.nonce,
            PeerMessage::MoveResult { mv, proof, signature, win_proof },
        )]))
    }

    fn on_move_result(
        &mut self,
        nonce: u64,
        mv: Move,
        proof: MoveProof,
        signature: StateSignature,
        win_proof: Option<WinProof>,
    ) -> Result<Delivery, SessionError> {
        let local = self.channel.state().nonce;
        if nonce <= local {
            return Ok(self.stale(nonce));
        }
        if self.pending_guess != Some((mv.x, mv.y)) {
            return Err(SessionError::UnexpectedMessage {
                kind: "move_result",
                reason: format!("no guess pending at ({}, {})", mv.x, mv.y),
            });
        }
        if nonce != local + 1 {
            return Err(self.ahead("move_result", nonce));
        }

        // 1. Proof, bound to the context we expect.
        let state = self.channel.state();
        let opponent = state.seat_of(&self.peer).ok_or(ChannelError::NotParticipant { address: self.peer })?;
        let expected = MoveContext {
            commitment: state.commitment(opponent),
            previous_move_hash: state.last_move_hash,
            move_count: state.move_count,
            game_id: state.game_id.clone(),
            player: self.peer,
            x: mv.x,
            y: mv.y,
        };
        // An answer for an earlier move index is a replayed proof.
        let replayed = proof.signals.move_count < state.move_count;
        let proved = match self.proofs.verify_move(&proof, &expected) {
            Ok(bit) => bit,
            Err(e @ ProofError::ContextMismatch { .. }) if replayed => {
                return Err(self.reject_proof(DisputeType::ReusedMove, e))
            }
            Err(e @ ProofError::ContextMismatch { .. }) => {
                return Err(self.reject_proof(DisputeType::GameContextMismatch, e))
            }
            Err(e) => return Err(self.reject_proof(DisputeType::InvalidProof, e)),
        };
        if proved != mv.is_hit {
            self.channel.mark_disputed(
                DisputeType::InvalidHitResult,
                format!("claimed hit={} proved hit={}", mv.is_hit, proved),
            );
            return Err(SessionError::InvalidHitResult { claimed: mv.is_hit, proved });
        }

        // 2. Counterpart signature over the state we are about to apply.
        let preview = self.channel.preview_move(&mv, proof.signals.new_move_hash)?;
        let check = self.channel.verify_state_signature(&signature, &self.peer, &preview);
        if !check.is_valid {
            return Err(self.reject_signature(
                DisputeType::InvalidStateChain,
                check.error.unwrap_or_else(|| "signer mismatch".into()),
            ));
        }
        if preview.game_ended {
            match &win_proof {
                Some(wp) => {
                    let threshold = self.channel.config().win_threshold as u64;
                    if let Err(e) = self.proofs.verify_win(
                        wp,
                        &preview.commitment(opponent),
                        &preview.merkle_root(opponent),
                        threshold,
                    ) {
                        return Err(self.reject_proof(DisputeType::InvalidProof, e));
                    }
                }
                None => warn!("Final answer arrived without a win proof; settlement will need a dispute"),
            }
        }

        // 3. Apply, sign, reply.
        self.channel.update_latest_move_hash(proof.signals.new_move_hash);
        let signed = self.channel.make_move(mv)?;
        self.counter_sign(signature)?;
        self.channel.append_move_record(mv, proof)?;
        self.pending_guess = None;
        self.shots.insert((mv.x, mv.y));
        if win_proof.is_some() {
            self.win_proof = win_proof;
        }

        let mut replies = vec![self.envelope(
            signed.state.nonce,
            PeerMessage::CounterSignature { signature: self.own_signature(&signed)? },
        )];
        if !signed.state.game_ended {
            let switched = self.channel.switch_turn()?;
            replies.push(self.envelope(
                switched.state.nonce,
                PeerMessage::TurnSwitch { signature: self.own_signature(&switched)? },
            ));
        }
        Ok(Delivery::Reply(replies))
    }

    fn on_counter_signature(&mut self, nonce: u64, signature: StateSignature) -> Result<Delivery, SessionError> {
        let Some(latest) = self.channel.latest() else {
            return Err(SessionError::UnexpectedMessage {
                kind: "counter_signature",
                reason: "no state to countersign".into(),
            });
        };
        let local = latest.state.nonce;
        if nonce < local || (nonce == local && latest.is_fully_signed()) {
            return Ok(self.stale(nonce));
        }
        if nonce > local {
            return Err(self.ahead("counter_signature", nonce));
        }
        self.counter_sign(signature)?;
        if let Some((pending_nonce, mv, proof)) = self.pending_move.take() {
            if pending_nonce == nonce {
                self.channel.append_move_record(mv, proof)?;
            } else {
                self.pending_move = Some((pending_nonce, mv, proof));
            }
        }
        if let Some((switch_nonce, switch_signature)) = self.early_switch.take() {
            debug!("Replaying held turn switch at nonce {}", switch_nonce);
            return self.on_turn_switch(switch_nonce, switch_signature);
        }
        Ok(Delivery::Applied)
    }

    fn on_turn_switch(&mut self, nonce: u64, signature: StateSignature) -> Result<Delivery, SessionError> {
        let local = self.channel.state().nonce;
        if nonce <= local {
            return Ok(self.stale(nonce));
        }
        if nonce != local + 1 {
            return Err(self.ahead("turn_switch", nonce));
        }
        let answered = self.pending_move.as_ref().map(|(n, _, _)| *n) == Some(local);
        if self.channel.phase() == Phase::MoveProposed && answered {
            debug!("Turn switch {} overtook the counter-signature for {}, holding it", nonce, local);
            self.early_switch = Some((nonce, signature));
            return Ok(Delivery::Deferred { nonce });
        }
        self.ensure_settled()?;
        if self.channel.state().current_turn != self.peer {
            return Err(SessionError::NotYourTurn { player: self.peer });
        }
        let preview = self.channel.preview_switch_turn()?;
        let check = self.channel.verify_state_signature(&signature, &self.peer, &preview);
        if !check.is_valid {
            return Err(self.reject_signature(
                DisputeType::InvalidStateChain,
                check.error.unwrap_or_else(|| "signer mismatch".into()),
            ));
        }
        let signed = self.channel.switch_turn()?;
        self.counter_sign(signature)?;
        Ok(Delivery::Reply(vec![self.envelope(
            signed.state.nonce,
            PeerMessage::CounterSignature { signature: self.own_signature(&signed)? },
        )]))
    }

    fn on_state_sync(&mut self, state: SignedState) -> Result<Delivery, SessionError> {
        match self.sync.synchronize(&mut self.channel, &state)? {
            SyncOutcome::Adopted { .. } => {
                self.pending_guess = None;
                self.pending_move = None;
                self.early_switch = None;
                Ok(Delivery::Applied)
            }
            SyncOutcome::StaleNonceIgnored { local, peer } => Ok(Delivery::StaleNonceIgnored { local, peer }),
            SyncOutcome::InFlight => Ok(Delivery::Applied),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn try_genesis(&mut self) -> Result<Option<Envelope>, SessionError> {
        if self.channel.is_initialized() {
            return Ok(None);
        }
        let (Some(local), Some(peer)) = (&self.local_setup, &self.peer_setup) else {
            return Ok(None);
        };
        let (player1, player2) = if local.address == self.invite.player1 {
            (local.clone(), peer.clone())
        } else {
            (peer.clone(), local.clone())
        };
        let signed = self.channel.create_game(GameSetup {
            game_id: self.invite.game_id.clone(),
            room_id: self.invite.room_id.clone(),
            player1,
            player2,
        })?;
        let signature = self.own_signature(&signed)?;
        Ok(Some(self.envelope(
            signed.state.nonce,
            PeerMessage::GenesisSignature { signature },
        )))
    }

    /// The latest state must be dual-signed and playable.
    fn ensure_settled(&self) -> Result<(), SessionError> {
        match self.channel.phase() {
            Phase::Active => Ok(()),
            Phase::Ended => Err(ChannelError::GameAlreadyEnded.into()),
            Phase::Disputed => Err(ChannelError::ChannelDisputed.into()),
            Phase::Created | Phase::AwaitingBothPlacements => Err(ChannelError::ChannelNotInitialized.into()),
            Phase::MoveProposed => Err(SessionError::AwaitingCounterSignature {
                nonce: self.channel.state().nonce,
            }),
        }
    }

    fn counter_sign(&mut self, signature: StateSignature) -> Result<(), SessionError> {
        match self.channel.add_counter_signature(signature) {
            Ok(_) => Ok(()),
            Err(ChannelError::CounterSignatureMismatch { reason }) => {
                Err(self.reject_signature(DisputeType::InvalidStateChain, reason))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn own_signature(&self, signed: &SignedState) -> Result<StateSignature, SessionError> {
        self.channel
            .seat()
            .and_then(|seat| signed.signature(seat).copied())
            .ok_or_else(|| ChannelError::ChannelNotInitialized.into())
    }

    fn reject_proof(&mut self, dispute_type: DisputeType, source: ProofError) -> SessionError {
        self.channel.mark_disputed(dispute_type, source.to_string());
        SessionError::InvalidProof { dispute_type, source }
    }

    fn reject_signature(&mut self, dispute_type: DisputeType, reason: String) -> SessionError {
        self.channel.mark_disputed(dispute_type, reason.clone());
        SessionError::InvalidSignature { dispute_type, reason }
    }

    fn stale(&self, nonce: u64) -> Delivery {
        let local = self.channel.state().nonce;
        debug!("Ignoring stale message (nonce {} vs local {})", nonce, local);
        Delivery::StaleNonceIgnored { local, peer: nonce }
    }

    fn ahead(&self, kind: &'static str, nonce: u64) -> SessionError {
        SessionError::UnexpectedMessage {
            kind,
            reason: format!("peer at nonce {} is ahead of local {}", nonce, self.channel.state().nonce),
        }
    }

    fn envelope(&self, nonce: u64, message: PeerMessage) -> Envelope {
        Envelope::new(self.address(), nonce, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use crate::config::ChannelConfig;
    use crate::core::clock::ManualClock;
    use crate::network::signing::{LocalSigner, StateSigner};
    use crate::proof::commitment::generate_salt;
    use crate::proof::simulated::SimulatedProofSystem;

    const FLEET_A: [[u8; 4]; 5] = [[3, 1, 3, 0], [5, 4, 3, 1], [7, 5, 2, 0], [1, 8, 2, 1], [8, 8, 2, 0]];
    const FLEET_B: [[u8; 4]; 5] = [[0, 0, 3, 0], [0, 1, 3, 0], [0, 2, 2, 0], [0, 3, 2, 0], [0, 4, 2, 0]];

    fn ships(fleet: &[[u8; 4]]) -> Vec<Ship> {
        fleet.iter().map(|t| Ship::from_tuple(*t)).collect()
    }

    fn table() -> (Replica, Replica) {
        let gateway = ProofGateway::new(Arc::new(SimulatedProofSystem::default()));
        let a = LocalSigner::random();
        let b = LocalSigner::random();
        let invite = Invite {
            game_id: "session-test".into(),
            room_id: "room".into(),
            player1: a.address(),
            player2: b.address(),
        };
        let clock = Arc::new(ManualClock::new(0));
        let ra = Replica::new(
            Channel::new(ChannelConfig::default(), Arc::new(a), clock.clone()),
            gateway.clone(),
            invite.clone(),
            &ships(&FLEET_A),
            generate_salt(),
        )
        .unwrap();
        let rb = Replica::new(
            Channel::new(ChannelConfig::default(), Arc::new(b), clock),
            gateway,
            invite,
            &ships(&FLEET_B),
            generate_salt(),
        )
        .unwrap();
        (ra, rb)
    }

    fn run(a: &mut Replica, b: &mut Replica, initial: Vec<Envelope>) {
        let mut queue: VecDeque<Envelope> = initial.into();
        while let Some(envelope) = queue.pop_front() {
            let target = if envelope.from == a.address() { &mut *b } else { &mut *a };
            if let Delivery::Reply(out) = target.handle(envelope).unwrap() {
                queue.extend(out);
            }
        }
    }

    fn started() -> (Replica, Replica) {
        let (mut a, mut b) = table();
        let out = a.publish_placement().unwrap();
        run(&mut a, &mut b, out);
        let out = b.publish_placement().unwrap();
        run(&mut a, &mut b, out);
        (a, b)
    }

    #[test]
    fn test_invalid_fleet_rejected_locally() {
        let signer = LocalSigner::random();
        let invite = Invite {
            game_id: "g".into(),
            room_id: "r".into(),
            player1: signer.address(),
            player2: Address::new([9; 20]),
        };
        let overlapping = ships(&[[0, 0, 3, 0], [0, 0, 3, 1], [5, 5, 2, 0], [9, 9, 2, 0], [7, 7, 2, 1]]);
        let result = Replica::new(
            Channel::new(ChannelConfig::default(), Arc::new(signer), Arc::new(ManualClock::new(0))),
            ProofGateway::new(Arc::new(SimulatedProofSystem::default())),
            invite,
            &overlapping,
            generate_salt(),
        );
        match result {
            Err(SessionError::InvalidPlacement { errors }) => assert!(errors.len() >= 2),
            other => panic!("expected InvalidPlacement, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_genesis_handshake() {
        let (a, b) = started();
        assert_eq!(a.channel().phase(), Phase::Active);
        assert_eq!(b.channel().phase(), Phase::Active);
        assert_eq!(
            a.channel().latest().unwrap().state_hash,
            b.channel().latest().unwrap().state_hash
        );
    }

    #[test]
    fn test_miss_then_turn_switch() {
        let (mut a, mut b) = started();
        // (9, 0) is open water on fleet B.
        let guess = a.fire(9, 0).unwrap();
        run(&mut a, &mut b, vec![guess]);

        for replica in [&a, &b] {
            let state = replica.channel().state();
            assert_eq!(state.nonce, 3);
            assert_eq!(state.move_count, 1);
            assert_eq!(state.current_turn, b.address());
            assert_eq!(replica.channel().phase(), Phase::Active);
            assert_eq!(replica.channel().history().len(), 1);
        }
        assert_eq!(
            a.channel().latest().unwrap().state_hash,
            b.channel().latest().unwrap().state_hash
        );
        assert!(matches!(a.fire(1, 1), Err(SessionError::NotYourTurn { .. })));
    }

    #[test]
    fn test_duplicate_guess_ignored() {
        let (mut a, mut b) = started();
        let guess = a.fire(0, 0).unwrap();
        let first = b.handle(guess.clone()).unwrap();
        assert!(matches!(first, Delivery::Reply(_)));
        assert!(matches!(b.handle(guess).unwrap(), Delivery::StaleNonceIgnored { .. }));
        assert_eq!(b.channel().state().nonce, 2);
    }

    #[test]
    fn test_repeated_cell_refused() {
        let (mut a, mut b) = started();
        let guess = a.fire(9, 9).unwrap();
        run(&mut a, &mut b, vec![guess]);
        let guess = b.fire(0, 0).unwrap();
        run(&mut a, &mut b, vec![guess]);
        assert_eq!(a.fire(9, 9).unwrap_err(), SessionError::RepeatedGuess { x: 9, y: 9 });
    }

    #[test]
    fn test_lied_hit_bit_escalates() {
        let (mut a, mut b) = started();
        let guess = a.fire(0, 0).unwrap();
        let Delivery::Reply(mut out) = b.handle(guess).unwrap() else { panic!("expected reply") };
        let mut result = out.remove(0);
        if let PeerMessage::MoveResult { ref mut mv, .. } = result.message {
            mv.is_hit = !mv.is_hit;
        }
        let err = a.handle(result).unwrap_err();
        assert_eq!(err, SessionError::InvalidHitResult { claimed: false, proved: true });
        assert_eq!(err.dispute_type(), Some(DisputeType::InvalidHitResult));
        assert_eq!(a.channel().phase(), Phase::Disputed);
        assert_eq!(a.channel().state().nonce, 1);
    }

    #[test]
    fn test_forged_signature_escalates() {
        let (mut a, mut b) = started();
        let guess = a.fire(0, 0).unwrap();
        let Delivery::Reply(mut out) = b.handle(guess).unwrap() else { panic!("expected reply") };
        let mut result = out.remove(0);
        let forged = LocalSigner::random().sign_digest(&[7; 32]).unwrap();
        if let PeerMessage::MoveResult { ref mut signature, .. } = result.message {
            *signature = forged;
        }
        let err = a.handle(result).unwrap_err();
        assert!(matches!(err, SessionError::InvalidSignature { .. }));
        assert_eq!(a.channel().phase(), Phase::Disputed);
        assert_eq!(a.channel().state().move_count, 0);
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let (mut a, _) = started();
        let stranger = Envelope::new(Address::new([0xee; 20]), 1, PeerMessage::Guess { x: 0, y: 0 });
        assert!(matches!(a.handle(stranger), Err(SessionError::UnknownSender { .. })));
    }

    #[test]
    fn test_events_reach_sink() {
        let (mut a, mut b) = started();
        let (tx, mut rx) = mpsc::unbounded_channel();
        a.set_event_sink(tx);
        let guess = a.fire(9, 0).unwrap();
        run(&mut a, &mut b, vec![guess]);

        let mut kinds = Vec::new();
        while let Ok((who, event)) = rx.try_recv() {
            assert_eq!(who, a.address());
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["move_applied", "turn_switched"]);
        assert!(a.flush_events().is_empty());
        assert!(b.flush_events().is_empty());
    }

    #[test]
    fn test_replayed_answer_is_reused_move() {
        let (mut a, mut b) = started();
        let guess = a.fire(9, 0).unwrap();
        let Delivery::Reply(first) = b.handle(guess).unwrap() else { panic!("expected reply") };
        let PeerMessage::MoveResult { proof: old_proof, .. } = first[0].message.clone() else {
            panic!("expected move result")
        };
        run(&mut a, &mut b, first);
        let guess = b.fire(0, 0).unwrap();
        run(&mut a, &mut b, vec![guess]);

        let guess = a.fire(9, 1).unwrap();
        let Delivery::Reply(mut out) = b.handle(guess).unwrap() else { panic!("expected reply") };
        let mut result = out.remove(0);
        if let PeerMessage::MoveResult { ref mut proof, .. } = result.message {
            *proof = old_proof;
        }
        let err = a.handle(result).unwrap_err();
        assert_eq!(err.dispute_type(), Some(DisputeType::ReusedMove));
        assert_eq!(a.channel().phase(), Phase::Disputed);
        assert_eq!(a.channel().state().move_count, 2);
    }

    #[test]
    fn test_turn_switch_overtaking_counter_signature() {
        let (mut a, mut b) = started();
        let guess = a.fire(9, 0).unwrap();
        let Delivery::Reply(result) = b.handle(guess).unwrap() else { panic!("expected reply") };
        let Delivery::Reply(mut out) = a.handle(result[0].clone()).unwrap() else { panic!("expected reply") };
        assert_eq!(out.len(), 2);
        let switch = out.pop().unwrap();
        let counter = out.pop().unwrap();

        assert_eq!(b.handle(switch.clone()).unwrap(), Delivery::Deferred { nonce: 3 });
        assert_eq!(b.channel().phase(), Phase::MoveProposed);
        run(&mut a, &mut b, vec![counter]);

        for replica in [&a, &b] {
            assert_eq!(replica.channel().state().nonce, 3);
            assert_eq!(replica.channel().phase(), Phase::Active);
            assert_eq!(replica.channel().history().len(), 1);
        }
        assert_eq!(
            a.channel().latest().unwrap().state_hash,
            b.channel().latest().unwrap().state_hash
        );
        assert!(matches!(b.handle(switch).unwrap(), Delivery::StaleNonceIgnored { .. }));
    }

    #[test]
    fn test_state_sync_catches_up() {
        let (mut a, mut b) = started();
        let guess = a.fire(9, 0).unwrap();
        run(&mut a, &mut b, vec![guess]);

        let sync = a.state_sync_message().unwrap();
        // Same nonce, same content: nothing to do.
        assert!(matches!(b.handle(sync).unwrap(), Delivery::StaleNonceIgnored { .. }));
    }
}
