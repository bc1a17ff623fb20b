//! Searcher behavior: boundaries, determinism, resume, threshold mode.

use super::builder::{BuilderParams, GraphBuilder};
use super::search::{GraphSearcher, SearcherParams};
use super::{AcceptAll, AcceptNotDeleted, OnHeapGraph};
use crate::bitset::FixedBitSet;
use crate::score::{BuildScoreProvider, ExactBuildScoreProvider};
use crate::similarity::Similarity;
use crate::vectors::{SliceVectorSource, VectorSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn random_source(count: usize, dim: usize, seed: u64) -> Arc<SliceVectorSource> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f32> = (0..count * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Arc::new(SliceVectorSource::from_packed(data, dim).unwrap())
}

fn built(
    count: usize,
    seed: u64,
) -> (Arc<OnHeapGraph>, Arc<ExactBuildScoreProvider>, Arc<SliceVectorSource>) {
    let source = random_source(count, 6, seed);
    let provider = Arc::new(ExactBuildScoreProvider::new(
        source.clone() as Arc<dyn VectorSource>,
        Similarity::Euclidean,
    ));
    let params = BuilderParams {
        max_degree: 10,
        beam_width: 40,
        ..BuilderParams::default()
    };
    let builder = GraphBuilder::new(provider.clone(), params).unwrap();
    let graph = builder.build(source.as_ref()).unwrap();
    (graph, provider, source)
}

#[test]
fn test_empty_graph_returns_empty_result() {
    let source = random_source(4, 6, 0);
    let provider = Arc::new(ExactBuildScoreProvider::new(
        source.clone() as Arc<dyn VectorSource>,
        Similarity::Euclidean,
    ));
    let builder = GraphBuilder::new(provider.clone(), BuilderParams::default()).unwrap();
    let graph = Arc::clone(builder.graph());

    let scorer = provider.scorer_for_vector(&source.get(0).unwrap()).unwrap();
    let mut searcher = GraphSearcher::new(graph.as_ref());
    let result = searcher.search(scorer, None, 5, 5, &AcceptAll).unwrap();
    assert!(result.nodes.is_empty());
    assert_eq!(result.visited_count, 0);
    assert_eq!(result.worst_in_topk, f32::NEG_INFINITY);
}

#[test]
fn test_topk_larger_than_live_count_returns_all() {
    let (graph, provider, source) = built(5, 1);
    let scorer = provider.scorer_for_vector(&source.get(0).unwrap()).unwrap();
    let mut searcher = GraphSearcher::new(graph.as_ref());
    let result = searcher.search(scorer, None, 50, 50, &AcceptAll).unwrap();
    assert_eq!(result.nodes.len(), 5);
}

#[test]
fn test_results_sorted_and_deterministic() {
    let (graph, provider, source) = built(150, 2);
    let query = source.get(31).unwrap();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let scorer = provider.scorer_for_vector(&query).unwrap();
        let mut searcher = GraphSearcher::new(graph.as_ref());
        let result = searcher.search(scorer, None, 10, 20, &AcceptAll).unwrap();
        for window in result.nodes.windows(2) {
            let ((node_a, score_a), (node_b, score_b)) = (window[0], window[1]);
            assert!(
                score_a > score_b || (score_a == score_b && node_a < node_b),
                "ordering violated"
            );
        }
        assert_eq!(result.worst_in_topk, result.nodes.last().unwrap().1);
        runs.push(result.nodes);
    }
    assert_eq!(runs[0], runs[1], "same graph and query must be deterministic");
}

#[test]
fn test_accept_bits_filter_results_not_traversal() {
    let (graph, provider, source) = built(100, 3);
    let query = source.get(0).unwrap();

    // Accept only even ordinals
    let mut accept = FixedBitSet::new(100);
    for i in (0..100).step_by(2) {
        accept.set(i);
    }
    let scorer = provider.scorer_for_vector(&query).unwrap();
    let mut searcher = GraphSearcher::new(graph.as_ref());
    let result = searcher.search(scorer, None, 10, 20, &accept).unwrap();

    assert!(!result.nodes.is_empty());
    for &(node, _) in &result.nodes {
        assert_eq!(node % 2, 0, "odd ordinal {node} slipped through");
    }
}

#[test]
fn test_resume_extends_without_repeats() {
    let (graph, provider, source) = built(200, 4);
    let query = source.get(77).unwrap();

    let scorer = provider.scorer_for_vector(&query).unwrap();
    let mut searcher = GraphSearcher::new(graph.as_ref());
    let first = searcher.search(scorer, None, 5, 20, &AcceptAll).unwrap();
    let second = searcher.resume(5).unwrap();

    assert_eq!(first.nodes.len(), 5);
    assert!(!second.nodes.is_empty());

    let first_ids: std::collections::HashSet<u32> =
        first.nodes.iter().map(|&(n, _)| n).collect();
    for &(node, _) in &second.nodes {
        assert!(!first_ids.contains(&node), "resume repeated node {node}");
    }
    // The continuation cannot beat what the first batch already returned
    assert!(second.nodes[0].1 <= first.worst_in_topk + 1e-6);
}

#[test]
fn test_resume_without_search_is_empty() {
    let (graph, _, _) = built(10, 5);
    let mut searcher = GraphSearcher::new(graph.as_ref());
    assert!(searcher.resume(3).unwrap().nodes.is_empty());
}

#[test]
fn test_search_threshold_returns_all_above() {
    let (graph, provider, source) = built(150, 6);
    let query = source.get(42).unwrap();
    let threshold = 0.5f32;

    let scorer = provider.scorer_for_vector(&query).unwrap();
    let mut searcher =
        GraphSearcher::with_params(graph.as_ref(), SearcherParams { patience: 64 });
    let result = searcher
        .search_threshold(scorer, threshold, None, &AcceptAll)
        .unwrap();

    for &(_, score) in &result.nodes {
        assert!(score >= threshold);
    }
    // Cross-check against brute force: the threshold set must be found
    let brute: Vec<u32> = (0..150u32)
        .filter(|&ord| {
            Similarity::Euclidean.score(&query, &source.get(ord).unwrap()) >= threshold
        })
        .collect();
    let got: std::collections::HashSet<u32> = result.nodes.iter().map(|&(n, _)| n).collect();
    for ord in brute {
        assert!(got.contains(&ord), "threshold search missed {ord}");
    }
}

#[test]
fn test_deletion_mask_composition() {
    let source = random_source(30, 6, 7);
    let provider = Arc::new(ExactBuildScoreProvider::new(
        source.clone() as Arc<dyn VectorSource>,
        Similarity::Euclidean,
    ));
    let builder = GraphBuilder::new(provider.clone(), BuilderParams::default()).unwrap();
    for ord in 0..30u32 {
        builder
            .add_graph_node(ord, &source.get(ord).unwrap())
            .unwrap();
    }
    // Tombstone a node but do not clean up: traversal may cross it, the
    // composed accept mask keeps it out of results
    builder.mark_node_deleted(5).unwrap();
    let graph = Arc::clone(builder.graph());

    let query = source.get(5).unwrap();
    let scorer = provider.scorer_for_vector(&query).unwrap();
    let accept = AcceptNotDeleted(graph.deleted());
    let mut searcher = GraphSearcher::new(graph.as_ref());
    let result = searcher.search(scorer, None, 10, 10, &accept).unwrap();
    for &(node, _) in &result.nodes {
        assert_ne!(node, 5, "tombstoned node escaped the accept mask");
    }
}
