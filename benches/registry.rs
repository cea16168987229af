use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use tickslot::{ManualClock, RunLimit, TimerRegistry};

type BenchRegistry = TimerRegistry<ManualClock, 64>;

fn bench_registry() -> (BenchRegistry, ManualClock) {
    let clock = ManualClock::new(0);
    (TimerRegistry::with_preallocated(clock.clone()), clock)
}

// ==================== Register Benchmarks ====================

fn bench_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("register");

    for live in [0usize, 16, 63] {
        group.bench_with_input(BenchmarkId::new("timeout", live), &live, |b, &live| {
            let (reg, _clock) = bench_registry();
            for _ in 0..live {
                reg.set_interval(1_000, || {}).unwrap();
            }

            b.iter(|| {
                let id = reg.set_timeout(black_box(10), || {}).unwrap();
                reg.remove(id);
            });
        });
    }

    group.finish();
}

// ==================== Poll Benchmarks ====================

fn bench_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll");

    for timers in [1usize, 16, 64] {
        group.bench_with_input(BenchmarkId::new("idle", timers), &timers, |b, &timers| {
            let (reg, _clock) = bench_registry();
            for _ in 0..timers {
                reg.set_interval(u64::MAX, || {}).unwrap();
            }

            b.iter(|| black_box(reg.poll()));
        });

        group.bench_with_input(BenchmarkId::new("all_due", timers), &timers, |b, &timers| {
            let (reg, clock) = bench_registry();
            for _ in 0..timers {
                reg.set_interval(1, || {}).unwrap();
            }

            b.iter(|| {
                clock.advance(1);
                black_box(reg.poll())
            });
        });
    }

    group.bench_function("finite_churn", |b| {
        let (reg, clock) = bench_registry();

        b.iter(|| {
            for _ in 0..16 {
                reg.register(1, RunLimit::from_count(2), || {}).unwrap();
            }
            clock.advance(1);
            reg.poll();
            clock.advance(1);
            black_box(reg.poll())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_register, bench_poll);
criterion_main!(benches);
