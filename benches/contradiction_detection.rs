//! Benchmarks for contradiction detection throughput.
//!
//! Benchmark targets:
//! - Single-fact detection against a short prior list: sub-millisecond
//! - Detection scaling with the number of prior memories in scope

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use subcog_memory::detect;
use subcog_memory::models::{ExtractedFact, Memory};
use subcog_memory::normalize::SlotCatalog;

fn prior_memories(count: usize) -> Vec<Memory> {
    (0..count)
        .map(|i| Memory::new("bench-thread", "bench-session", format!("I work at company {i}"), i as i64).with_slot_value("employer", format!("company {i}"), format!("company {i}")))
        .collect()
}

fn bench_revision_detection(c: &mut Criterion) {
    let catalog = SlotCatalog::new();
    let snapshot = catalog.snapshot();
    let fact = ExtractedFact::assertion("employer", "amazon", "Actually, I work at Amazon, not Microsoft.", 0..42).with_correction(subcog_memory::models::IntentTag::CorrectDirect, "microsoft");
    let prior = vec![Memory::new("t", "s", "I work at Microsoft", 0).with_slot_value("employer", "microsoft", "Microsoft")];

    let mut group = c.benchmark_group("contradiction_detection");
    group.bench_function("single_revision", |b| {
        b.iter(|| detect::detect(black_box(&snapshot), black_box(&fact), black_box(&prior), black_box(None)));
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("throughput", |b| {
        b.iter(|| detect::detect(&snapshot, &fact, &prior, None));
    });
    group.finish();
}

fn bench_detection_scaling(c: &mut Criterion) {
    let catalog = SlotCatalog::new();
    let snapshot = catalog.snapshot();
    let fact = ExtractedFact::assertion("employer", "amazon", "I work at Amazon", 0..16);

    let mut group = c.benchmark_group("contradiction_detection_scaling");
    for size in [1usize, 10, 50, 200] {
        let prior = prior_memories(size);
        group.bench_with_input(BenchmarkId::new("prior_memories", size), &prior, |b, prior| {
            b.iter(|| detect::detect(black_box(&snapshot), black_box(&fact), black_box(prior), black_box(None)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_revision_detection, bench_detection_scaling);
criterion_main!(benches);
