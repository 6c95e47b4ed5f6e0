//! Benchmarks for board commitments and state signing
//!
//! Covers the per-move hot path: Merkle roots and cell inclusion over the
//! 128-leaf board tree, salted commitments, and typed-data sign/recover.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use battleship_channel::core::address::Address;
use battleship_channel::game::board::{Board, Ship};
use battleship_channel::game::state::GameState;
use battleship_channel::network::signing::{
    typed_data_hash, verify_state_signature, LocalSigner, SigningDomain, StateSigner,
};
use battleship_channel::proof::commitment::{commit, generate_salt};
use battleship_channel::proof::merkle::{board_root, cell_proof, verify_cell};

fn scenario_board() -> Board {
    let ships: Vec<Ship> = [[3, 1, 3, 0], [5, 4, 3, 1], [7, 5, 2, 0], [1, 8, 2, 1], [8, 8, 2, 0]]
        .iter()
        .map(|t| Ship::from_tuple(*t))
        .collect();
    Board::from_ships(&ships)
}

fn bench_merkle(c: &mut Criterion) {
    let mut group = c.benchmark_group("board_merkle");
    let board = scenario_board();

    group.bench_function("root", |b| b.iter(|| black_box(board_root(&board))));

    let root = board_root(&board);
    for (x, y) in [(0u8, 0u8), (3, 1), (9, 9)] {
        let id = format!("{}_{}", x, y);
        group.bench_with_input(BenchmarkId::new("prove_cell", &id), &(x, y), |b, &(x, y)| {
            b.iter(|| black_box(cell_proof(&board, x, y)))
        });

        let Some(proof) = cell_proof(&board, x, y) else { continue };
        let value = board.is_occupied(x, y) as u8;
        group.bench_with_input(BenchmarkId::new("verify_cell", &id), &proof, |b, proof| {
            b.iter(|| black_box(verify_cell(&root, proof, value)))
        });
    }

    group.finish();
}

fn bench_commitment(c: &mut Criterion) {
    let mut group = c.benchmark_group("commitment");
    let root = board_root(&scenario_board());
    let salt = generate_salt();

    group.bench_function("commit", |b| b.iter(|| black_box(commit(&root, &salt))));
    group.bench_function("generate_salt", |b| b.iter(|| black_box(generate_salt())));

    group.finish();
}

fn bench_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("typed_data");
    let domain = SigningDomain::default();
    let signer = LocalSigner::random();
    let state = GameState {
        game_id: "bench".into(),
        channel_id: "bench".into(),
        nonce: 7,
        player1: signer.address(),
        player2: Address::new([2; 20]),
        current_turn: signer.address(),
        ..GameState::empty()
    };

    group.bench_function("hash", |b| b.iter(|| black_box(typed_data_hash(&domain, &state))));

    let digest = typed_data_hash(&domain, &state);
    group.bench_function("sign", |b| b.iter(|| black_box(signer.sign_digest(&digest))));

    if let Ok(signature) = signer.sign_digest(&digest) {
        let address = signer.address();
        group.bench_function("recover", |b| {
            b.iter(|| black_box(verify_state_signature(&domain, &signature, &address, &state)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merkle, bench_commitment, bench_signing);
criterion_main!(benches);
