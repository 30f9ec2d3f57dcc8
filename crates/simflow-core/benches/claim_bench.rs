//! # Claim Benchmarks
//!
//! Cost of claiming input files from a populated registry.
//!
//! Run with: `cargo bench -p simflow-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use simflow_core::{DatasetRegistry, FileType, MemoryRegistry, RedbRegistry};
use std::hint::black_box;
use std::path::PathBuf;

/// Register gen -> reco and declare `size` primary files in gen.
fn populate<R: DatasetRegistry>(registry: &mut R, size: u64) {
    registry.create_dataset("gen", None).expect("gen");
    registry.create_dataset("reco", Some("gen")).expect("reco");
    for i in 0..size {
        registry
            .declare_file(
                "gen",
                &PathBuf::from(format!("/data/gen/{i}.root")),
                FileType::Primary,
                Some(100),
            )
            .expect("declare");
    }
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_memory_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_claim");

    for size in [100u64, 1000, 10000].iter() {
        let mut registry = MemoryRegistry::new();
        populate(&mut registry, *size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let claimed = registry.claim("reco", 10).expect("claim");
                registry.reset("reco").expect("reset");
                black_box(claimed)
            });
        });
    }

    group.finish();
}

fn bench_redb_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("redb_claim");
    group.sample_size(20);

    for size in [100u64, 1000].iter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = RedbRegistry::open(dir.path().join("bench.redb")).expect("open");
        populate(&mut registry, *size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let claimed = registry.claim("reco", 10).expect("claim");
                registry.reset("reco").expect("reset");
                black_box(claimed)
            });
        });
    }

    group.finish();
}

fn bench_sum_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum_events");

    for size in [100u64, 1000].iter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = RedbRegistry::open(dir.path().join("bench.redb")).expect("open");
        populate(&mut registry, *size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(registry.sum_events("gen", FileType::Primary)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_memory_claim, bench_redb_claim, bench_sum_events);
criterion_main!(benches);
