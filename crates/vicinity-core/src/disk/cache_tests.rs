//! Tests for the BFS graph cache.

use super::cache::{CachedGraphView, GraphCache, DEFAULT_CACHE_DEPTH};
use super::features::Feature;
use super::reader::OnDiskGraph;
use super::writer::write_graph;
use crate::graph::{AcceptAll, BuilderParams, GraphBuilder, GraphSearcher, GraphView};
use crate::score::ExactBuildScoreProvider;
use crate::similarity::Similarity;
use crate::vectors::{SliceVectorSource, VectorSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn write_index(count: usize, dir: &std::path::Path) -> (std::path::PathBuf, Arc<SliceVectorSource>) {
    let mut rng = StdRng::seed_from_u64(13);
    let data: Vec<f32> = (0..count * 8).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let source = Arc::new(SliceVectorSource::from_packed(data, 8).unwrap());
    let provider = Arc::new(ExactBuildScoreProvider::new(
        source.clone() as Arc<dyn VectorSource>,
        Similarity::Euclidean,
    ));
    let params = BuilderParams {
        max_degree: 6,
        beam_width: 24,
        ..BuilderParams::default()
    };
    let builder = GraphBuilder::new(provider, params).unwrap();
    let graph = builder.build(source.as_ref()).unwrap();

    let path = dir.join("cache.vcx");
    write_graph(
        &graph,
        source.as_ref(),
        &path,
        &[Feature::InlineVectors {
            source: source.as_ref(),
        }],
        None,
    )
    .unwrap();
    (path, source)
}

#[test]
fn test_preload_covers_entry_neighborhood() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_index(200, dir.path());
    let graph = OnDiskGraph::load(&path).unwrap();

    let cache = GraphCache::preload(&graph, DEFAULT_CACHE_DEPTH).unwrap();
    assert!(!cache.is_empty());
    assert_eq!(cache.depth(), DEFAULT_CACHE_DEPTH);

    let view = graph.view();
    let (entry, _) = view.entry().unwrap();
    let entry_neighbors = cache.neighbors(entry).expect("entry must be cached");

    // Depth >= 1 pulls in the entry's whole first ring
    for &n in entry_neighbors {
        assert!(cache.neighbors(n).is_some(), "ring node {n} missing");
        assert!(cache.vector(n).is_some());
    }

    // Depth 0 caches exactly the entry
    let shallow = GraphCache::preload(&graph, 0).unwrap();
    assert_eq!(shallow.len(), 1);
}

#[test]
fn test_cached_view_matches_uncached_search() {
    let dir = tempfile::tempdir().unwrap();
    let (path, source) = write_index(200, dir.path());
    let graph = OnDiskGraph::load(&path).unwrap();
    let cache = GraphCache::preload(&graph, DEFAULT_CACHE_DEPTH).unwrap();

    let view = graph.view();
    let cached_view = CachedGraphView::new(view, &cache);
    let query = source.get(42).unwrap();

    let plain_scorer = view.reranker_for(&query, Similarity::Euclidean).unwrap();
    let mut plain = GraphSearcher::new(&view);
    let plain_result = plain.search(plain_scorer, None, 10, 20, &AcceptAll).unwrap();

    let cached_scorer = view.reranker_for(&query, Similarity::Euclidean).unwrap();
    let mut cached = GraphSearcher::new(&cached_view);
    let cached_result = cached
        .search(cached_scorer, None, 10, 20, &AcceptAll)
        .unwrap();

    assert_eq!(plain_result.nodes, cached_result.nodes);
    assert_eq!(plain_result.visited_count, cached_result.visited_count);

    // Cache-first vector reads agree with the mapping
    let (entry, _) = view.entry().unwrap();
    assert_eq!(
        cached_view.get_vector(entry).unwrap(),
        view.get_vector(entry).unwrap()
    );
}

#[test]
fn test_preload_on_empty_graph() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(SliceVectorSource::from_vecs(&[vec![0.0f32; 4]]).unwrap());
    let provider = Arc::new(ExactBuildScoreProvider::new(
        source.clone() as Arc<dyn VectorSource>,
        Similarity::Euclidean,
    ));
    let builder = GraphBuilder::new(provider, BuilderParams::default()).unwrap();
    let path = dir.path().join("empty.vcx");
    write_graph(
        builder.graph(),
        source.as_ref(),
        &path,
        &[Feature::InlineVectors {
            source: source.as_ref(),
        }],
        None,
    )
    .unwrap();

    let graph = OnDiskGraph::load(&path).unwrap();
    let cache = GraphCache::preload(&graph, DEFAULT_CACHE_DEPTH).unwrap();
    assert!(cache.is_empty());
}
