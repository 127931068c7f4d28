// Proof-of-work benchmarks.
//
// Single-hash cost of both constructions (the fixed-cost SHA-256 challenge
// and Argon2id at several memory sizes), plus a full fixed-cost search at
// the cheapest tiers.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use moniker_protocol::config::unix_millis;
use moniker_protocol::pow::fixed::required_nibbles;
use moniker_protocol::pow::{
    DifficultyParams, FixedCostPow, MemoryHardPow, MemoryHardSchedule, PowStrategy, SearchControl,
};

const OWNER: [u8; 32] = [7u8; 32];

fn bench_fixed_hash(c: &mut Criterion) {
    let params = DifficultyParams::Fixed {
        leading_zero_nibbles: 2,
    };
    let now = unix_millis();
    let mut nonce: u128 = 0;
    c.bench_function("pow/fixed/hash", |b| {
        b.iter(|| {
            nonce = nonce.wrapping_add(1);
            FixedCostPow
                .compute_hash("alice", &OWNER, nonce, now, &params)
                .unwrap()
        });
    });
}

fn bench_memory_hard_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("pow/memory_hard/hash");
    group.sample_size(10);
    for memory_kib in [1024u32, 8 * 1024, 16 * 1024] {
        let params = DifficultyParams::MemoryHard {
            leading_zero_bits: 8,
            memory_kib,
            iterations: 1,
        };
        let pow = MemoryHardPow::new(MemoryHardSchedule::uniform(params));
        let now = unix_millis();
        group.throughput(Throughput::Bytes(u64::from(memory_kib) * 1024));
        group.bench_with_input(BenchmarkId::from_parameter(memory_kib), &params, |b, params| {
            b.iter(|| pow.compute_hash("alice", &OWNER, 1, now, params).unwrap());
        });
    }
    group.finish();
}

fn bench_fixed_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("pow/fixed/search");
    group.sample_size(10);
    for name in ["monikers", "moniker-benchmark"] {
        let params = DifficultyParams::Fixed {
            leading_zero_nibbles: required_nibbles(name.len()),
        };
        group.bench_with_input(BenchmarkId::from_parameter(name), &params, |b, params| {
            b.iter(|| {
                FixedCostPow
                    .generate(name, &OWNER, params, &SearchControl::default())
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fixed_hash,
    bench_memory_hard_hash,
    bench_fixed_search,
);
criterion_main!(benches);
