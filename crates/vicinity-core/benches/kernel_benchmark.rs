//! Float kernel benchmarks.
//!
//! Run with: `cargo bench --bench kernel_benchmark`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vicinity_core::{simd, Similarity};

/// Generates a deterministic pseudo-random vector.
fn generate_vector(dim: usize, seed: u64) -> Vec<f32> {
    (0..dim)
        .map(|i| ((seed as f32 * 0.1 + i as f32 * 0.01).sin() + 1.0) / 2.0)
        .collect()
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernels");

    for dim in [128usize, 768, 1536] {
        let a = generate_vector(dim, 1);
        let b = generate_vector(dim, 2);

        group.bench_with_input(BenchmarkId::new("dot", dim), &dim, |bench, _| {
            bench.iter(|| black_box(simd::dot_product(&a, &b)));
        });
        group.bench_with_input(BenchmarkId::new("squared_l2", dim), &dim, |bench, _| {
            bench.iter(|| black_box(simd::squared_l2(&a, &b)));
        });
        group.bench_with_input(BenchmarkId::new("cosine", dim), &dim, |bench, _| {
            bench.iter(|| black_box(simd::cosine_similarity(&a, &b)));
        });
    }

    group.finish();
}

fn bench_compare_multi(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare_multi");

    let dim = 768;
    let query = generate_vector(dim, 7);
    for count in [8usize, 64] {
        let packed: Vec<f32> = (0..count)
            .flat_map(|i| generate_vector(dim, i as u64))
            .collect();
        let mut results = vec![0.0f32; count];

        group.bench_with_input(BenchmarkId::new("euclidean", count), &count, |bench, _| {
            bench.iter(|| {
                Similarity::Euclidean.compare_multi(&query, &packed, &mut results);
                black_box(results[0])
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kernels, bench_compare_multi);
criterion_main!(benches);
