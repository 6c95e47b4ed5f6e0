//! Dispute Coordinator
//!
//! Local side of the on-chain escalation path. Evidence is re-verified
//! against the replica's own signing domain before anything is sent to
//! the arbiter, so a dispute that would be rejected never costs a call.
//!
//! Every call works from the replica's last dual-signed snapshot, not its
//! latest one: mid-turn the latest state carries only the local signature
//! and proves nothing on-chain.

use tracing::{debug, info, warn};

use crate::dispute::arbiter::{Arbiter, Dispute, DisputeError, DisputeEvidence, DisputeType, Resolution};
use crate::game::channel::Channel;
use crate::game::state::{Phase, Seat};
use crate::proof::public_inputs::{MoveProof, WinProof};

/// Builds, checks and submits dispute calls for one replica.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisputeCoordinator;

impl DisputeCoordinator {
    /// New coordinator.
    pub fn new() -> Self {
        Self
    }

    /// Evidence from the replica's last dual-signed snapshot and the move
    /// history up to it, with both signatures re-verified locally.
    pub fn prepare(&self, channel: &Channel, dispute_type: DisputeType) -> Result<DisputeEvidence, DisputeError> {
        let agreed = channel.last_agreed().ok_or_else(|| DisputeError::InvalidDisputeEvidence {
            reason: "no dual-signed state".into(),
        })?;
        if let Some(latest) = channel.latest().filter(|l| l.state.nonce > agreed.state.nonce) {
            debug!(
                "Latest nonce {} is single-signed, disputing from nonce {}",
                latest.state.nonce, agreed.state.nonce
            );
        }
        let evidence = DisputeEvidence::from_signed(dispute_type, agreed, channel.history())?;

        if channel.state_hash(&evidence.state) != evidence.state_hash {
            return Err(DisputeError::InvalidDisputeEvidence {
                reason: "state hash does not match state".into(),
            });
        }
        for seat in [Seat::Player1, Seat::Player2] {
            let signer = evidence.state.player(seat);
            let signature = match seat {
                Seat::Player1 => &evidence.player1_signature,
                Seat::Player2 => &evidence.player2_signature,
            };
            let check = channel.verify_state_signature(signature, &signer, &evidence.state);
            if !check.is_valid {
                return Err(DisputeError::InvalidDisputeEvidence {
                    reason: format!(
                        "signature of {}: {}",
                        signer,
                        check.error.unwrap_or_else(|| "signer mismatch".into())
                    ),
                });
            }
        }
        Ok(evidence)
    }

    /// Verify and submit a dispute, freezing local play.
    pub fn initiate(
        &self,
        arbiter: &mut dyn Arbiter,
        channel: &mut Channel,
        dispute_type: DisputeType,
    ) -> Result<Dispute, DisputeError> {
        let evidence = self.prepare(channel, dispute_type)?;
        let dispute = arbiter.initiate_dispute(channel.address(), &evidence)?;
        if channel.phase() != Phase::Disputed {
            channel.mark_disputed(dispute_type, format!("dispute opened at nonce {}", evidence.state.nonce));
        }
        info!(
            "Dispute {:?} submitted for nonce {}, respond by {}",
            dispute_type, evidence.state.nonce, dispute.deadline
        );
        Ok(dispute)
    }

    /// Rebut the active dispute with the replica's last dual-signed state
    /// and the proofs of every move after the disputed nonce.
    pub fn respond(&self, arbiter: &mut dyn Arbiter, channel: &Channel) -> Result<Resolution, DisputeError> {
        let channel_id = channel.state().channel_id.clone();
        let dispute = arbiter.get_dispute(&channel_id)?;
        let counter = channel.last_agreed().ok_or_else(|| DisputeError::InvalidDisputeEvidence {
            reason: "no dual-signed state".into(),
        })?;
        let disputed = dispute.disputed_state.nonce;
        if counter.state.nonce <= disputed {
            warn!(
                "No rebuttal for dispute at nonce {}: last agreed nonce {}",
                disputed, counter.state.nonce
            );
            return Err(DisputeError::StaleCounterState {
                disputed,
                offered: counter.state.nonce,
            });
        }
        let proofs: Vec<MoveProof> = channel
            .history()
            .since(disputed)
            .iter()
            .filter(|r| r.nonce <= counter.state.nonce)
            .map(|r| r.proof.clone())
            .collect();
        info!(
            "Rebutting dispute at nonce {} with nonce {} and {} move proofs",
            disputed,
            counter.state.nonce,
            proofs.len()
        );
        let resolution = arbiter.respond_to_dispute(&channel_id, channel.address(), counter, &proofs)?;
        if let Some(finding) = arbiter.get_dispute(&channel_id)?.finding {
            info!("Dispute at nonce {} recorded as {:?}", disputed, finding);
        }
        Ok(resolution)
    }

    /// Claim the challenger's win after the response window.
    pub fn claim_timeout(&self, arbiter: &mut dyn Arbiter, channel: &mut Channel) -> Result<Resolution, DisputeError> {
        let resolution = arbiter.claim_timeout(&channel.state().channel_id, channel.address())?;
        channel.mark_settled();
        Ok(resolution)
    }

    /// Settle on the replica's final dual-signed state.
    pub fn settle(
        &self,
        arbiter: &mut dyn Arbiter,
        channel: &mut Channel,
        win_proof: &WinProof,
    ) -> Result<Resolution, DisputeError> {
        let final_state = channel.last_agreed().cloned().ok_or_else(|| DisputeError::InvalidSettlement {
            reason: "no dual-signed state".into(),
        })?;
        if final_state.state.winner.is_none() {
            return Err(DisputeError::InvalidSettlement {
                reason: format!("nonce {} has no winner", final_state.state.nonce),
            });
        }
        let resolution = arbiter.settle_channel(&final_state.state.channel_id, &final_state, win_proof)?;
        channel.mark_settled();
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::config::ChannelConfig;
    use crate::core::clock::ManualClock;
    use crate::dispute::arbiter::{ChannelStatus, InMemoryArbiter};
    use crate::game::board::{Board, Ship};
    use crate::game::state::{GameSetup, PlayerSetup};
    use crate::network::signing::{LocalSigner, StateSigner};
    use crate::proof::commitment::CommittedBoard;
    use crate::proof::simulated::SimulatedProofSystem;
    use crate::proof::verify::ProofGateway;

    fn board() -> CommittedBoard {
        let ships: Vec<Ship> = [[0, 0, 3, 0], [0, 1, 3, 0], [0, 2, 2, 0], [0, 3, 2, 0], [0, 4, 2, 0]]
            .iter()
            .map(|t| Ship::from_tuple(*t))
            .collect();
        CommittedBoard::new(Board::from_ships(&ships))
    }

    fn game_setup(gateway: &ProofGateway, room_id: &str, a: &LocalSigner, b: &LocalSigner) -> GameSetup {
        let (b1, b2) = (board(), board());
        let player = |signer: &LocalSigner, board: &CommittedBoard| PlayerSetup {
            address: signer.address(),
            commitment: board.public.commitment,
            merkle_root: board.public.merkle_root,
            proof: gateway.prove_ship_placement(&board.board, &board.salt).unwrap(),
        };
        GameSetup {
            game_id: "coordinator".into(),
            room_id: room_id.into(),
            player1: player(a, &b1),
            player2: player(b, &b2),
        }
    }

    fn setup_pair() -> (InMemoryArbiter, Channel, Channel) {
        let gateway = ProofGateway::new(Arc::new(SimulatedProofSystem::default()));
        let mut arbiter = InMemoryArbiter::new(ChannelConfig::default(), gateway.clone());
        let a = LocalSigner::random();
        let b = LocalSigner::random();
        let id = arbiter.open_channel(a.address(), b.address()).unwrap();
        let setup = game_setup(&gateway, &id, &a, &b);
        let clock = Arc::new(ManualClock::new(0));
        let mut c1 = Channel::new(ChannelConfig::default(), Arc::new(a.clone()), clock.clone());
        let mut c2 = Channel::new(ChannelConfig::default(), Arc::new(b.clone()), clock);
        c1.create_game(setup.clone()).unwrap();
        c2.create_game(setup.clone()).unwrap();
        let (_, s1) = c1.sign_state().unwrap();
        let (_, s2) = c2.sign_state().unwrap();
        c1.add_counter_signature(s2).unwrap();
        c2.add_counter_signature(s1).unwrap();
        let genesis = c1.latest().unwrap().clone();
        arbiter
            .submit_initial_state(&id, a.address(), &genesis.state, &s1, &setup.player1.proof)
            .unwrap();
        arbiter
            .submit_initial_state(&id, b.address(), &genesis.state, &s2, &setup.player2.proof)
            .unwrap();
        (arbiter, c1, c2)
    }

    #[test]
    fn test_prepare_falls_back_to_last_agreed() {
        let (_, mut c1, _) = setup_pair();
        c1.switch_turn().unwrap();
        assert_eq!(c1.latest().unwrap().state.nonce, 2);
        let evidence = DisputeCoordinator::new().prepare(&c1, DisputeType::InvalidMove).unwrap();
        assert_eq!(evidence.state.nonce, 1);
        assert_eq!(evidence.dispute_type, DisputeType::InvalidMove);
    }

    #[test]
    fn test_prepare_requires_dual_signature() {
        let gateway = ProofGateway::new(Arc::new(SimulatedProofSystem::default()));
        let a = LocalSigner::random();
        let b = LocalSigner::random();
        let setup = game_setup(&gateway, "room", &a, &b);
        let mut c1 = Channel::new(ChannelConfig::default(), Arc::new(a), Arc::new(ManualClock::new(0)));
        c1.create_game(setup).unwrap();
        let result = DisputeCoordinator::new().prepare(&c1, DisputeType::InvalidMove);
        assert!(matches!(result, Err(DisputeError::InvalidDisputeEvidence { .. })));
    }

    #[test]
    fn test_initiate_then_timeout() {
        let (mut arbiter, mut c1, _) = setup_pair();
        let coordinator = DisputeCoordinator::new();
        let dispute = coordinator.initiate(&mut arbiter, &mut c1, DisputeType::InvalidMove).unwrap();
        assert_eq!(c1.phase(), Phase::Disputed);
        assert!(matches!(
            coordinator.claim_timeout(&mut arbiter, &mut c1),
            Err(DisputeError::ResponseWindowOpen { .. })
        ));
        arbiter.advance_time(dispute.deadline);
        assert_eq!(
            coordinator.claim_timeout(&mut arbiter, &mut c1),
            Ok(Resolution::ChallengeTimedOut { winner: c1.address() })
        );
        assert_eq!(c1.phase(), Phase::Ended);
        assert_eq!(
            arbiter.get_channel(&c1.state().channel_id).unwrap().status,
            ChannelStatus::Settled
        );
    }

    #[test]
    fn test_respond_uses_last_agreed_state() {
        let (mut arbiter, mut c1, mut c2) = setup_pair();
        let coordinator = DisputeCoordinator::new();
        coordinator.initiate(&mut arbiter, &mut c1, DisputeType::InvalidMove).unwrap();
        // Single-signed nonce 2 is not a rebuttal.
        c2.switch_turn().unwrap();
        assert_eq!(
            coordinator.respond(&mut arbiter, &c2),
            Err(DisputeError::StaleCounterState { disputed: 1, offered: 1 })
        );
    }
}
