//! Graph build and search benchmarks.
//!
//! Run with: `cargo bench --bench search_benchmark`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use vicinity_core::{
    AcceptAll, BuilderParams, ExactBuildScoreProvider, GraphBuilder, GraphSearcher, Similarity,
    SliceVectorSource, VectorSource,
};
use vicinity_core::score::BuildScoreProvider;

/// Generates a deterministic pseudo-random vector.
fn generate_vector(dim: usize, seed: u64) -> Vec<f32> {
    (0..dim)
        .map(|i| ((seed as f32 * 0.37 + i as f32 * 0.11).sin() + 1.0) / 2.0)
        .collect()
}

fn make_source(count: usize, dim: usize) -> Arc<SliceVectorSource> {
    let data: Vec<f32> = (0..count)
        .flat_map(|i| generate_vector(dim, i as u64))
        .collect();
    Arc::new(SliceVectorSource::from_packed(data, dim).unwrap())
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_insert");
    group.sample_size(10);

    for count in [1_000usize] {
        let dim = 128;
        let source = make_source(count, dim);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(
            BenchmarkId::new("vectors", format!("{count}x{dim}d")),
            &count,
            |b, _| {
                b.iter(|| {
                    let provider = Arc::new(ExactBuildScoreProvider::new(
                        source.clone() as Arc<dyn VectorSource>,
                        Similarity::Euclidean,
                    ));
                    let builder =
                        GraphBuilder::new(provider, BuilderParams::default()).unwrap();
                    let graph = builder.build(source.as_ref()).unwrap();
                    black_box(graph.size())
                });
            },
        );
    }

    group.finish();
}

fn bench_search_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_search_latency");

    let dim = 128;
    let source = make_source(10_000, dim);
    let provider = Arc::new(ExactBuildScoreProvider::new(
        source.clone() as Arc<dyn VectorSource>,
        Similarity::Euclidean,
    ));
    let builder = GraphBuilder::new(provider.clone(), BuilderParams::default()).unwrap();
    let graph = builder.build(source.as_ref()).unwrap();

    let query = generate_vector(dim, 424_242);
    for k in [10usize, 100] {
        group.bench_with_input(BenchmarkId::new("top_k", k), &k, |b, &k| {
            b.iter(|| {
                let scorer = provider.scorer_for_vector(&query).unwrap();
                let mut searcher = GraphSearcher::new(graph.as_ref());
                black_box(searcher.search(scorer, None, k, k, &AcceptAll).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_search_latency);
criterion_main!(benches);
