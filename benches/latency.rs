//! Benchmark harness using Criterion for latency measurement.
//!
//! Measures:
//! - Add order (no match)
//! - Add order (full match) at varying book depth
//! - Cancel order at varying book size
//! - Mixed workload

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use matchbook::{AddOrder, Command, Matcher, Side};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Generate a random limit order command
fn random_add(rng: &mut ChaCha8Rng, id: u64) -> Command {
    Command::Add(AddOrder::limit(
        id,
        if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell },
        rng.gen_range(9_900..10_100) * 100,
        rng.gen_range(1..1_000),
    ))
}

/// Benchmark: add that rests (no matching)
fn bench_add_no_match(c: &mut Criterion) {
    let mut matcher = Matcher::new(100_000);
    matcher.warm_up();

    let mut id = 0u64;

    c.bench_function("add_no_match", |b| {
        b.iter(|| {
            id += 1;
            // Below any asks
            let cmd = Command::Add(AddOrder::limit(id, Side::Buy, 9_000, 100));
            black_box(matcher.apply(&cmd, 0))
        })
    });
}

/// Benchmark: add that fully matches against resting depth
fn bench_add_full_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_full_match");

    for depth in [1, 10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
            let mut matcher = Matcher::new(100_000);
            matcher.warm_up();

            for i in 0..depth {
                matcher.apply(
                    &Command::Add(AddOrder::limit(i as u64, Side::Sell, 10_000, 100)),
                    0,
                );
            }

            let mut id = 1_000u64;

            b.iter(|| {
                id += 1;
                let cmd = Command::Add(AddOrder::limit(id, Side::Buy, 10_000, 100));
                let outcome = matcher.apply(&cmd, 0);

                // Replenish the consumed maker
                matcher.apply(
                    &Command::Add(AddOrder::limit(
                        id + 1_000_000,
                        Side::Sell,
                        10_000,
                        100,
                    )),
                    0,
                );

                black_box(outcome)
            })
        });
    }

    group.finish();
}

/// Benchmark: cancel at varying book size
fn bench_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel");

    for book_size in [100, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(book_size),
            book_size,
            |b, &book_size| {
                let mut matcher = Matcher::new(100_000);
                matcher.warm_up();

                for i in 0..book_size {
                    matcher.apply(
                        &Command::Add(AddOrder::limit(
                            i as u64,
                            if i % 2 == 0 { Side::Buy } else { Side::Sell },
                            if i % 2 == 0 {
                                8_000 + (i as i64 % 100) * 10
                            } else {
                                10_000 + (i as i64 % 100) * 10
                            },
                            100,
                        )),
                        0,
                    );
                }

                let mut cancel_id = 0u64;
                let mut next_id = book_size as u64;

                b.iter(|| {
                    let outcome = matcher.apply(&Command::Cancel(cancel_id), 0);

                    // Replenish in the same non-crossing band
                    matcher.apply(
                        &Command::Add(AddOrder::limit(
                            next_id,
                            if cancel_id % 2 == 0 { Side::Buy } else { Side::Sell },
                            if cancel_id % 2 == 0 {
                                8_000 + (cancel_id as i64 % 100) * 10
                            } else {
                                10_000 + (cancel_id as i64 % 100) * 10
                            },
                            100,
                        )),
                        0,
                    );

                    cancel_id = next_id;
                    next_id += 1;

                    black_box(outcome)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark: mixed workload (realistic trading scenario)
fn bench_mixed_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_workload");

    // 70% add, 30% cancel
    group.bench_function("70_add_30_cancel", |b| {
        let mut matcher = Matcher::new(100_000);
        matcher.warm_up();

        let mut rng = ChaCha8Rng::seed_from_u64(0xDEADBEEF);
        let mut id = 0u64;

        for _ in 0..1_000 {
            id += 1;
            let cmd = random_add(&mut rng, id);
            matcher.apply(&cmd, 0);
        }

        b.iter(|| {
            if rng.gen_bool(0.7) {
                id += 1;
                let cmd = random_add(&mut rng, id);
                black_box(matcher.apply(&cmd, 0))
            } else {
                let cancel_id = rng.gen_range(1..=id);
                black_box(matcher.apply(&Command::Cancel(cancel_id), 0))
            }
        })
    });

    group.finish();
}

/// Benchmark: throughput (orders per second)
fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");
    group.throughput(criterion::Throughput::Elements(1_000));

    group.bench_function("1000_orders", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(0xCAFEBABE);
        let mut next_id = 0u64;

        b.iter(|| {
            let mut matcher = Matcher::new(10_000);
            for _ in 0..1_000 {
                next_id += 1;
                let cmd = random_add(&mut rng, next_id);
                black_box(matcher.apply(&cmd, 0));
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_add_no_match,
    bench_add_full_match,
    bench_cancel,
    bench_mixed_workload,
    bench_throughput,
);

criterion_main!(benches);
