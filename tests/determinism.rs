//! Determinism tests - golden-master verification.
//!
//! The matcher must produce identical trades and identical final state
//! across runs when given the same command sequence.

use matchbook::{AddOrder, Command, Matcher, ModifyOrder, Side};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Generate a deterministic mixed command sequence.
fn generate_commands(seed: u64, count: usize) -> Vec<Command> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut commands = Vec::with_capacity(count);
    let mut active: Vec<u64> = Vec::new();
    let mut next_id = 1u64;

    for _ in 0..count {
        let roll: f64 = rng.gen();
        if active.is_empty() || roll < 0.6 {
            let id = next_id;
            next_id += 1;

            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let price = rng.gen_range(9_500..10_500) * 100;
            let qty = rng.gen_range(1..500);
            let kind_roll: f64 = rng.gen();
            let order = if kind_roll < 0.85 {
                AddOrder::limit(id, side, price, qty)
            } else if kind_roll < 0.9 {
                AddOrder::market(id, side, qty)
            } else if kind_roll < 0.95 {
                AddOrder::fill_and_kill(id, side, price, qty)
            } else {
                AddOrder::fill_or_kill(id, side, price, qty)
            };
            commands.push(Command::Add(order));
            active.push(id);
        } else if roll < 0.85 {
            let idx = rng.gen_range(0..active.len());
            let id = active.swap_remove(idx);
            commands.push(Command::Cancel(id));
        } else {
            let idx = rng.gen_range(0..active.len());
            let id = active[idx];
            commands.push(Command::Modify(ModifyOrder {
                id,
                side: if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell },
                price: rng.gen_range(9_500..10_500) * 100,
                quantity: rng.gen_range(1..500),
            }));
        }
    }

    commands
}

/// Run a command sequence and hash everything observable.
fn run_trace(commands: &[Command]) -> (u64, u64) {
    let mut matcher = Matcher::new(100_000);
    let mut hasher = DefaultHasher::new();

    for command in commands {
        matcher.apply(command, 0);
        for trade in matcher.trades() {
            trade.buyer.hash(&mut hasher);
            trade.seller.hash(&mut hasher);
            trade.price.hash(&mut hasher);
            trade.quantity.hash(&mut hasher);
        }
    }

    (hasher.finish(), matcher.state_hash())
}

#[test]
fn test_determinism_small() {
    const SEED: u64 = 0xDEADBEEF;
    const COUNT: usize = 1_000;
    const RUNS: usize = 10;

    let commands = generate_commands(SEED, COUNT);
    let (first_trades, first_state) = run_trace(&commands);

    for run in 1..RUNS {
        let (trades, state) = run_trace(&commands);
        assert_eq!(trades, first_trades, "trade hash mismatch on run {}", run);
        assert_eq!(state, first_state, "state hash mismatch on run {}", run);
    }
}

#[test]
fn test_determinism_large() {
    const SEED: u64 = 0xCAFEBABE;
    const COUNT: usize = 100_000;
    const RUNS: usize = 3;

    let commands = generate_commands(SEED, COUNT);
    let (first_trades, first_state) = run_trace(&commands);

    for run in 1..RUNS {
        let (trades, state) = run_trace(&commands);
        assert_eq!(trades, first_trades, "trade hash mismatch on run {}", run);
        assert_eq!(state, first_state, "state hash mismatch on run {}", run);
    }
}

#[test]
fn test_different_seeds_produce_different_results() {
    let commands1 = generate_commands(1, 1_000);
    let commands2 = generate_commands(2, 1_000);

    let (trades1, _) = run_trace(&commands1);
    let (trades2, _) = run_trace(&commands2);

    assert_ne!(trades1, trades2, "different seeds should diverge");
}
