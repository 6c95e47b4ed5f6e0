//! Battleship Channel Demo
//!
//! Plays one full game between two in-process replicas over the in-memory
//! transport, settles it on the reference arbiter, then walks a second
//! channel through a dispute that ends in a timeout. Channel events from
//! every replica stream to a printer task as JSON.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use battleship_channel::{
    config::ChannelConfig,
    core::clock::SystemClock,
    dispute::{Arbiter, DisputeCoordinator, DisputeType, InMemoryArbiter},
    game::{board::Ship, channel::Channel, state::Seat},
    network::{
        session::{Delivery, EventSink, Invite, Replica},
        signing::{LocalSigner, StateSigner},
        transport::MemoryTransport,
    },
    proof::{commitment::{generate_salt, SaltRegistry}, simulated::SimulatedProofSystem, verify::ProofGateway},
    VERSION,
};

const ALICE_FLEET: [[u8; 4]; 5] = [[3, 1, 3, 0], [5, 4, 3, 1], [7, 5, 2, 0], [1, 8, 2, 1], [8, 8, 2, 0]];
const BOB_FLEET: [[u8; 4]; 5] = [[0, 0, 3, 0], [0, 2, 3, 1], [4, 6, 2, 0], [9, 0, 2, 1], [6, 9, 2, 0]];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    info!("Battleship Channel v{}", VERSION);

    let config = ChannelConfig::from_env()?;
    let proofs = ProofGateway::new(Arc::new(SimulatedProofSystem::default()));
    let mut arbiter = InMemoryArbiter::new(config.clone(), proofs.clone());
    let mut salts = SaltRegistry::new();

    let (events, mut feed): (EventSink, _) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some((replica, event)) = feed.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(replica = %replica.short(), "event {}", json),
                Err(e) => warn!("Unprintable {} event: {}", event.kind(), e),
            }
            seen += 1;
        }
        seen
    });

    demo_settled_game(&config, &proofs, &mut arbiter, &mut salts, &events)?;
    demo_timeout(&config, &proofs, &mut arbiter, &mut salts, &events)?;
    drop(events);

    let seen = printer.await.context("event printer panicked")?;
    info!("{} channel events observed", seen);
    Ok(())
}

fn fleet(tuples: &[[u8; 4]]) -> Vec<Ship> {
    tuples.iter().map(|t| Ship::from_tuple(*t)).collect()
}

/// Open a channel and build both replicas for it.
fn seat_table(
    config: &ChannelConfig,
    proofs: &ProofGateway,
    arbiter: &mut InMemoryArbiter,
    salts: &mut SaltRegistry,
    events: &EventSink,
) -> anyhow::Result<(Replica, Replica)> {
    let alice = LocalSigner::random();
    let bob = LocalSigner::random();
    let room_id = arbiter.open_channel(alice.address(), bob.address())?;
    let invite = Invite {
        game_id: Uuid::new_v4().to_string(),
        room_id,
        player1: alice.address(),
        player2: bob.address(),
    };
    info!("Game {} in channel {}", invite.game_id, invite.room_id);

    let mut replica = |signer: LocalSigner, ships: &[[u8; 4]]| -> anyhow::Result<Replica> {
        let salt = generate_salt();
        salts.register(signer.address(), salt)?;
        let channel = Channel::new(config.clone(), Arc::new(signer), Arc::new(SystemClock));
        let mut replica = Replica::new(channel, proofs.clone(), invite.clone(), &fleet(ships), salt)?;
        replica.set_event_sink(events.clone());
        Ok(replica)
    };
    Ok((replica(alice, &ALICE_FLEET)?, replica(bob, &BOB_FLEET)?))
}

/// Deliver queued envelopes in both directions until the link is quiet.
fn drain(
    alice: &mut Replica,
    alice_link: &mut MemoryTransport,
    bob: &mut Replica,
    bob_link: &mut MemoryTransport,
) -> anyhow::Result<()> {
    loop {
        let mut idle = true;
        while let Some(envelope) = bob_link.try_recv()? {
            idle = false;
            if let Delivery::Reply(out) = bob.handle(envelope)? {
                bob_link.send_all(&out)?;
            }
        }
        while let Some(envelope) = alice_link.try_recv()? {
            idle = false;
            if let Delivery::Reply(out) = alice.handle(envelope)? {
                alice_link.send_all(&out)?;
            }
        }
        if idle {
            return Ok(());
        }
    }
}

/// Placement, genesis and arbiter registration.
fn start_game(
    arbiter: &mut InMemoryArbiter,
    alice: &mut Replica,
    alice_link: &mut MemoryTransport,
    bob: &mut Replica,
    bob_link: &mut MemoryTransport,
) -> anyhow::Result<()> {
    alice_link.send_all(&alice.publish_placement()?)?;
    bob_link.send_all(&bob.publish_placement()?)?;
    drain(alice, alice_link, bob, bob_link)?;

    let genesis = alice.channel().latest().cloned().context("genesis missing")?;
    let setup = alice.channel().setup().cloned().context("setup missing")?;
    for (seat, proof) in [(Seat::Player1, &setup.player1.proof), (Seat::Player2, &setup.player2.proof)] {
        let signature = genesis.signature(seat).context("genesis not dual-signed")?;
        arbiter.submit_initial_state(
            &genesis.state.channel_id,
            genesis.state.player(seat),
            &genesis.state,
            signature,
            proof,
        )?;
    }
    info!("Genesis registered on the arbiter");
    Ok(())
}

fn demo_settled_game(
    config: &ChannelConfig,
    proofs: &ProofGateway,
    arbiter: &mut InMemoryArbiter,
    salts: &mut SaltRegistry,
    events: &EventSink,
) -> anyhow::Result<()> {
    info!("=== Cooperative game ===");
    let (mut alice, mut bob) = seat_table(config, proofs, arbiter, salts, events)?;
    let (mut alice_link, mut bob_link) = MemoryTransport::pair();
    start_game(arbiter, &mut alice, &mut alice_link, &mut bob, &mut bob_link)?;

    let targets: Vec<(u8, u8)> = fleet(&BOB_FLEET)
        .iter()
        .flat_map(|s| s.cells())
        .map(|(x, y)| (x as u8, y as u8))
        .collect();
    let mut misses = (0..10u8).flat_map(|y| (0..10u8).map(move |x| (x, y)));

    for target in targets {
        let guess = alice.fire(target.0, target.1)?;
        alice_link.send(&guess)?;
        drain(&mut alice, &mut alice_link, &mut bob, &mut bob_link)?;
        if alice.is_game_over() {
            break;
        }
        let open_water = misses
            .find(|&(x, y)| !alice.board().board.is_occupied(x, y))
            .context("ran out of open water")?;
        let guess = bob.fire(open_water.0, open_water.1)?;
        bob_link.send(&guess)?;
        drain(&mut alice, &mut alice_link, &mut bob, &mut bob_link)?;
    }

    let state = alice.channel().state().clone();
    if !state.game_ended {
        bail!("game did not finish");
    }
    info!(
        "Game over after {} moves at nonce {}: winner {}",
        state.move_count,
        state.nonce,
        state.winner.map(|w| w.short()).unwrap_or_default()
    );

    let win_proof = alice.win_proof().cloned().context("winner holds no win proof")?;
    let resolution = DisputeCoordinator::new().settle(arbiter, alice.channel_mut(), &win_proof)?;
    alice.flush_events();
    info!("Settled: {:?}", resolution);
    Ok(())
}

fn demo_timeout(
    config: &ChannelConfig,
    proofs: &ProofGateway,
    arbiter: &mut InMemoryArbiter,
    salts: &mut SaltRegistry,
    events: &EventSink,
) -> anyhow::Result<()> {
    info!("=== Unresponsive opponent ===");
    let (mut alice, mut bob) = seat_table(config, proofs, arbiter, salts, events)?;
    let (mut alice_link, mut bob_link) = MemoryTransport::pair();
    start_game(arbiter, &mut alice, &mut alice_link, &mut bob, &mut bob_link)?;

    // Bob never answers this guess.
    let _unanswered = alice.fire(4, 4)?;

    let coordinator = DisputeCoordinator::new();
    let dispute = coordinator.initiate(arbiter, alice.channel_mut(), DisputeType::InvalidMove)?;
    alice.flush_events();
    info!("Dispute open until t={}", dispute.deadline);

    arbiter.advance_time(config.response_period);
    let resolution = coordinator.claim_timeout(arbiter, alice.channel_mut())?;
    alice.flush_events();
    info!("Resolved: {:?}", resolution);
    Ok(())
}
