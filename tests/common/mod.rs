//! Shared harness for end-to-end channel tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use battleship_channel::config::ChannelConfig;
use battleship_channel::core::address::Address;
use battleship_channel::core::clock::ManualClock;
use battleship_channel::dispute::{Arbiter, InMemoryArbiter};
use battleship_channel::game::board::Ship;
use battleship_channel::game::channel::Channel;
use battleship_channel::game::state::Seat;
use battleship_channel::network::protocol::Envelope;
use battleship_channel::network::session::{Delivery, Invite, Replica};
use battleship_channel::network::signing::{LocalSigner, StateSigner};
use battleship_channel::proof::commitment::{generate_salt, Salt};
use battleship_channel::proof::simulated::SimulatedProofSystem;
use battleship_channel::proof::verify::ProofGateway;

/// Ship list shared by both boards in the reference scenario.
pub const SCENARIO_FLEET: [[u8; 4]; 5] = [[3, 1, 3, 0], [5, 4, 3, 1], [7, 5, 2, 0], [1, 8, 2, 1], [8, 8, 2, 0]];

pub fn fleet(tuples: &[[u8; 4]]) -> Vec<Ship> {
    tuples.iter().map(|t| Ship::from_tuple(*t)).collect()
}

/// Every ship cell of a fleet, in declaration order.
pub fn ship_cells(tuples: &[[u8; 4]]) -> Vec<(u8, u8)> {
    fleet(tuples)
        .iter()
        .flat_map(|s| s.cells())
        .map(|(x, y)| (x as u8, y as u8))
        .collect()
}

pub fn gateway() -> ProofGateway {
    ProofGateway::new(Arc::new(SimulatedProofSystem::default()))
}

/// Two replicas on one channel plus the arbiter that opened it.
pub struct Table {
    pub arbiter: InMemoryArbiter,
    pub alice: Replica,
    pub bob: Replica,
    pub alice_signer: LocalSigner,
    pub bob_signer: LocalSigner,
    pub invite: Invite,
    pub salts: (Salt, Salt),
}

impl Table {
    pub fn new() -> Self {
        let config = ChannelConfig::default();
        let mut arbiter = InMemoryArbiter::new(config.clone(), gateway());
        let alice_signer = LocalSigner::random();
        let bob_signer = LocalSigner::random();
        let room_id = arbiter
            .open_channel(alice_signer.address(), bob_signer.address())
            .unwrap();
        let invite = Invite {
            game_id: "e2e-game".into(),
            room_id,
            player1: alice_signer.address(),
            player2: bob_signer.address(),
        };
        let salts = (generate_salt(), generate_salt());
        let alice = replica(&alice_signer, &invite, salts.0);
        let bob = replica(&bob_signer, &invite, salts.1);
        Self { arbiter, alice, bob, alice_signer, bob_signer, invite, salts }
    }

    /// A second pair of replicas with the same keys, invite and boards.
    pub fn fork(&self) -> (Replica, Replica) {
        (
            replica(&self.alice_signer, &self.invite, self.salts.0),
            replica(&self.bob_signer, &self.invite, self.salts.1),
        )
    }

    /// Placement, genesis, and registration of the genesis on the arbiter.
    pub fn start(&mut self) {
        start_pair(&mut self.alice, &mut self.bob);
        let genesis = self.alice.channel().latest().cloned().unwrap();
        let setup = self.alice.channel().setup().cloned().unwrap();
        for (seat, proof) in [(Seat::Player1, &setup.player1.proof), (Seat::Player2, &setup.player2.proof)] {
            self.arbiter
                .submit_initial_state(
                    &genesis.state.channel_id,
                    genesis.state.player(seat),
                    &genesis.state,
                    genesis.signature(seat).unwrap(),
                    proof,
                )
                .unwrap();
        }
    }

    pub fn alice_fires(&mut self, x: u8, y: u8) {
        let guess = self.alice.fire(x, y).unwrap();
        deliver(&mut self.alice, &mut self.bob, vec![guess]);
    }

    pub fn bob_fires(&mut self, x: u8, y: u8) {
        let guess = self.bob.fire(x, y).unwrap();
        deliver(&mut self.alice, &mut self.bob, vec![guess]);
    }
}

pub fn replica(signer: &LocalSigner, invite: &Invite, salt: Salt) -> Replica {
    let channel = Channel::new(
        ChannelConfig::default(),
        Arc::new(signer.clone()),
        Arc::new(ManualClock::new(1_700_000_000_000)),
    );
    Replica::new(channel, gateway(), invite.clone(), &fleet(&SCENARIO_FLEET), salt).unwrap()
}

pub fn start_pair(alice: &mut Replica, bob: &mut Replica) {
    let out = alice.publish_placement().unwrap();
    deliver(alice, bob, out);
    let out = bob.publish_placement().unwrap();
    deliver(alice, bob, out);
}

/// Deliver envelopes between the two replicas until no replies remain.
pub fn deliver(alice: &mut Replica, bob: &mut Replica, initial: Vec<Envelope>) {
    let mut queue: VecDeque<Envelope> = initial.into();
    let alice_address: Address = alice.address();
    while let Some(envelope) = queue.pop_front() {
        let target = if envelope.from == alice_address { &mut *bob } else { &mut *alice };
        if let Delivery::Reply(out) = target.handle(envelope).unwrap() {
            queue.extend(out);
        }
    }
}
