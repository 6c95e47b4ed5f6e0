//! Synchronization & Authority Resolver
//!
//! Decides which of two candidate states is canonical. The nonce is the
//! only ordering: a strictly higher nonce wins if, and only if, both
//! participants signed it. Lower or equal nonces are ignored. An equal
//! nonce with different content means someone signed two histories and is
//! escalated, never resolved locally.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::address::Address;
use crate::core::hash::{to_hex, StateHash};
use crate::dispute::DisputeType;
use crate::game::channel::Channel;
use crate::game::state::{Seat, SignedState};

/// Synchronization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A signature on the peer state is missing or recovers to someone else.
    #[error("invalid peer signature for {signer}: {reason}")]
    InvalidPeerSignature {
        /// Participant whose signature failed.
        signer: Address,
        /// Why.
        reason: String,
    },

    /// Two different dual-signed states share a nonce.
    #[error("equivocation at nonce {nonce}: local {} vs peer {}", to_hex(.local), to_hex(.peer))]
    Equivocation {
        /// Contested nonce.
        nonce: u64,
        /// Local digest.
        local: StateHash,
        /// Peer digest.
        peer: StateHash,
    },

    /// Peer state belongs to another game or other participants.
    #[error("peer state is for a different channel: {reason}")]
    ForeignState {
        /// What differed.
        reason: String,
    },
}

/// What `synchronize` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Peer state became canonical.
    Adopted {
        /// Nonce before.
        from: u64,
        /// Nonce after.
        to: u64,
    },
    /// Peer nonce not ahead of ours; nothing changed.
    StaleNonceIgnored {
        /// Local nonce.
        local: u64,
        /// Peer nonce.
        peer: u64,
    },
    /// Another synchronization was running; nothing changed.
    InFlight,
}

/// Resolver with a re-entrancy guard.
#[derive(Debug, Default)]
pub struct Synchronizer {
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on drop.
#[derive(Debug)]
pub struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Synchronizer {
    /// New resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the in-flight flag, or `None` if already claimed.
    pub fn try_begin(&self) -> Option<SyncGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard { flag: &self.in_flight })
    }

    /// Reconcile `channel` with a state received from the peer.
    pub fn synchronize(&self, channel: &mut Channel, peer: &SignedState) -> Result<SyncOutcome, SyncError> {
        let Some(_guard) = self.try_begin() else {
            debug!("Synchronization already in flight, skipping");
            return Ok(SyncOutcome::InFlight);
        };

        let local_nonce = channel.state().nonce;
        let peer_nonce = peer.state.nonce;

        if channel.is_initialized() {
            check_same_channel(channel, peer)?;
        }

        if peer_nonce < local_nonce {
            debug!("Ignoring stale peer state (nonce {} < {})", peer_nonce, local_nonce);
            return Ok(SyncOutcome::StaleNonceIgnored { local: local_nonce, peer: peer_nonce });
        }

        if peer_nonce == local_nonce {
            let peer_hash = channel.state_hash(&peer.state);
            let local_hash = channel.latest().map(|l| l.state_hash);
            if local_hash.is_none() || local_hash == Some(peer_hash) {
                return Ok(SyncOutcome::StaleNonceIgnored { local: local_nonce, peer: peer_nonce });
            }
            // Same nonce, different content: only a problem if both really signed it.
            verify_both(channel, peer)?;
            let local = local_hash.unwrap_or_default();
            warn!(
                "Equivocation at nonce {}: local {} peer {}",
                peer_nonce,
                to_hex(&local),
                to_hex(&peer_hash)
            );
            channel.mark_disputed(
                DisputeType::InvalidStateChain,
                format!("two signed states at nonce {}", peer_nonce),
            );
            return Err(SyncError::Equivocation { nonce: peer_nonce, local, peer: peer_hash });
        }

        verify_both(channel, peer)?;
        if peer.state.seat_of(&channel.address()).is_none() {
            return Err(SyncError::ForeignState {
                reason: format!("{} is not a participant", channel.address()),
            });
        }

        let mut canonical = peer.clone();
        canonical.state_hash = channel.state_hash(&peer.state);
        channel.adopt(canonical);
        info!("Synchronized to peer state: nonce {} -> {}", local_nonce, peer_nonce);
        Ok(SyncOutcome::Adopted { from: local_nonce, to: peer_nonce })
    }
}

fn check_same_channel(channel: &Channel, peer: &SignedState) -> Result<(), SyncError> {
    let local = channel.state();
    if local.game_id != peer.state.game_id || local.channel_id != peer.state.channel_id {
        return Err(SyncError::ForeignState {
            reason: format!("game {} vs {}", local.game_id, peer.state.game_id),
        });
    }
    if local.player1 != peer.state.player1 || local.player2 != peer.state.player2 {
        return Err(SyncError::ForeignState { reason: "participants differ".into() });
    }
    Ok(())
}

fn verify_both(channel: &Channel, peer: &SignedState) -> Result<(), SyncError> {
    for seat in [Seat::Player1, Seat::Player2] {
        let signer = peer.state.player(seat);
        let Some(signature) = peer.signature(seat) else {
            return Err(SyncError::InvalidPeerSignature {
                signer,
                reason: "signature missing".into(),
            });
        };
        let check = channel.verify_state_signature(signature, &signer, &peer.state);
        if !check.is_valid {
            return Err(SyncError::InvalidPeerSignature {
                signer,
                reason: check.error.unwrap_or_else(|| "signer mismatch".into()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::config::ChannelConfig;
    use crate::core::clock::ManualClock;
    use crate::game::state::{GameSetup, Move, Phase, PlayerSetup};
    use crate::network::signing::{LocalSigner, StateSigner};
    use crate::proof::public_inputs::{FieldElement, Groth16Proof, PlacementSignals, ProofBundle};

    fn placement() -> ProofBundle<PlacementSignals> {
        let zero = FieldElement::ZERO;
        ProofBundle {
            proof: Groth16Proof { pi_a: [zero; 2], pi_b: [[zero; 2]; 2], pi_c: [zero; 2] },
            signals: PlacementSignals { commitment: zero, merkle_root: zero },
        }
    }

    struct Fixture {
        c1: Channel,
        c2: Channel,
        a: LocalSigner,
        b: LocalSigner,
    }

    fn fixture() -> Fixture {
        let a = LocalSigner::random();
        let b = LocalSigner::random();
        let setup = GameSetup {
            game_id: "g".into(),
            room_id: "r".into(),
            player1: PlayerSetup { address: a.address(), commitment: [1; 32], merkle_root: [2; 32], proof: placement() },
            player2: PlayerSetup { address: b.address(), commitment: [3; 32], merkle_root: [4; 32], proof: placement() },
        };
        let clock = Arc::new(ManualClock::new(0));
        let mut c1 = Channel::new(ChannelConfig::default(), Arc::new(a.clone()), clock.clone());
        let mut c2 = Channel::new(ChannelConfig::default(), Arc::new(b.clone()), clock);
        c1.create_game(setup.clone()).unwrap();
        c2.create_game(setup).unwrap();
        let (_, s1) = c1.sign_state().unwrap();
        let (_, s2) = c2.sign_state().unwrap();
        c1.add_counter_signature(s2).unwrap();
        c2.add_counter_signature(s1).unwrap();
        Fixture { c1, c2, a, b }
    }

    /// `channel` plays a move and `counter` signs the result.
    fn dual_signed_move(channel: &mut Channel, counter: &LocalSigner, mv: Move) -> SignedState {
        let signed = channel.make_move(mv).unwrap();
        let signature = counter.sign_digest(&signed.state_hash).unwrap();
        channel.add_counter_signature(signature).unwrap()
    }

    fn miss() -> Move {
        Move { x: 0, y: 0, is_hit: false, timestamp: 0 }
    }

    fn hit() -> Move {
        Move { x: 0, y: 0, is_hit: true, timestamp: 0 }
    }

    #[test]
    fn test_adopts_higher_dual_signed_state() {
        let Fixture { mut c1, mut c2, b, .. } = fixture();
        let peer = dual_signed_move(&mut c1, &b, hit());
        let sync = Synchronizer::new();
        assert_eq!(sync.synchronize(&mut c2, &peer), Ok(SyncOutcome::Adopted { from: 1, to: 2 }));
        assert_eq!(c2.state().player1_hits, 1);
        assert_eq!(c2.latest().unwrap().state_hash, peer.state_hash);
    }

    #[test]
    fn test_single_signed_rejected() {
        let Fixture { mut c1, mut c2, .. } = fixture();
        let half = c1.make_move(hit()).unwrap();
        let before = c2.state().clone();
        let result = Synchronizer::new().synchronize(&mut c2, &half);
        assert!(matches!(result, Err(SyncError::InvalidPeerSignature { .. })));
        assert_eq!(c2.state(), &before);
    }

    #[test]
    fn test_forged_signature_rejected() {
        let Fixture { mut c1, mut c2, a, .. } = fixture();
        let signed = c1.make_move(hit()).unwrap();
        // Player 1 signs in player 2's seat.
        let mut forged = signed.clone();
        forged.player2_signature = Some(a.sign_digest(&signed.state_hash).unwrap());
        let result = Synchronizer::new().synchronize(&mut c2, &forged);
        assert!(matches!(
            result,
            Err(SyncError::InvalidPeerSignature { signer, .. }) if signer == c2.address()
        ));
        assert_eq!(c2.state().nonce, 1);
    }

    #[test]
    fn test_lower_or_equal_idempotent() {
        let Fixture { mut c1, mut c2, b, .. } = fixture();
        let genesis = c2.latest().unwrap().clone();
        let peer = dual_signed_move(&mut c1, &b, miss());
        let sync = Synchronizer::new();
        sync.synchronize(&mut c2, &peer).unwrap();
        let before = c2.state().clone();

        for _ in 0..2 {
            assert!(matches!(sync.synchronize(&mut c2, &genesis), Ok(SyncOutcome::StaleNonceIgnored { .. })));
            assert!(matches!(sync.synchronize(&mut c2, &peer), Ok(SyncOutcome::StaleNonceIgnored { .. })));
            assert_eq!(c2.state(), &before);
        }
    }

    #[test]
    fn test_in_flight_is_silent_noop() {
        let Fixture { mut c1, mut c2, b, .. } = fixture();
        let peer = dual_signed_move(&mut c1, &b, miss());
        let sync = Synchronizer::new();
        let guard = sync.try_begin().unwrap();
        assert_eq!(sync.synchronize(&mut c2, &peer), Ok(SyncOutcome::InFlight));
        assert_eq!(c2.state().nonce, 1);
        drop(guard);
        assert!(matches!(sync.synchronize(&mut c2, &peer), Ok(SyncOutcome::Adopted { .. })));
    }

    #[test]
    fn test_equivocation_escalates() {
        let Fixture { mut c1, mut c2, a, b } = fixture();
        let mut fork = Channel::new(ChannelConfig::default(), Arc::new(a), Arc::new(ManualClock::new(0)));
        fork.adopt(c1.latest().unwrap().clone());

        let honest = dual_signed_move(&mut c1, &b, miss());
        let forked = dual_signed_move(&mut fork, &b, hit());
        assert_eq!(honest.state.nonce, forked.state.nonce);

        let sync = Synchronizer::new();
        sync.synchronize(&mut c2, &honest).unwrap();
        let result = sync.synchronize(&mut c2, &forked);
        assert!(matches!(result, Err(SyncError::Equivocation { nonce: 2, .. })));
        assert_eq!(c2.state().player1_hits, 0);
        assert_eq!(c2.phase(), Phase::Disputed);
    }

    #[test]
    fn test_foreign_game_rejected() {
        let Fixture { mut c1, mut c2, b, .. } = fixture();
        let mut other = dual_signed_move(&mut c1, &b, miss());
        other.state.game_id = "other".into();
        assert!(matches!(
            Synchronizer::new().synchronize(&mut c2, &other),
            Err(SyncError::ForeignState { .. })
        ));
    }
}
