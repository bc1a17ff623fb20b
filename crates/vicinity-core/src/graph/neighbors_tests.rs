//! Tests for published neighbor sets.

use super::diversity::Pruner;
use super::neighbors::NeighborSet;
use crate::bitset::AtomicBitSet;
use crate::node_array::NodeArray;
use crate::score::ExactBuildScoreProvider;
use crate::similarity::Similarity;
use crate::vectors::SliceVectorSource;
use std::sync::Arc;

/// Points on a line: score from node 0 decreases with the ordinal.
fn line_provider(count: usize) -> ExactBuildScoreProvider {
    let vectors: Vec<Vec<f32>> = (0..count).map(|i| vec![i as f32, 0.0]).collect();
    let source = Arc::new(SliceVectorSource::from_vecs(&vectors).unwrap());
    ExactBuildScoreProvider::new(source, Similarity::Euclidean)
}

#[test]
fn test_insert_publishes_sorted() {
    let provider = line_provider(16);
    let pruner = Pruner {
        provider: &provider,
        alpha: 1.2,
        max_degree: 4,
    };
    let set = NeighborSet::new(4, 1.5);

    set.insert(0, 3, 0.4, &pruner).unwrap();
    set.insert(0, 1, 0.9, &pruner).unwrap();
    set.insert(0, 2, 0.6, &pruner).unwrap();

    let snapshot = set.snapshot();
    assert_eq!(snapshot.nodes(), &[1, 2, 3]);
    // Re-offering an existing neighbor is a no-op
    set.insert(0, 2, 0.1, &pruner).unwrap();
    assert_eq!(set.len(), 3);
}

#[test]
fn test_insert_prunes_past_overflow_cap() {
    let provider = line_provider(16);
    let pruner = Pruner {
        provider: &provider,
        alpha: 2.0,
        max_degree: 3,
    };
    // Cap = ceil(1.2 * 3) = 4: the fifth insert triggers a prune
    let set = NeighborSet::new(3, 1.2);
    for (node, score) in [(1u32, 0.9f32), (2, 0.8), (3, 0.7), (4, 0.6)] {
        set.insert(0, node, score, &pruner).unwrap();
    }
    assert_eq!(set.len(), 4, "transient overflow up to the cap is allowed");

    set.insert(0, 5, 0.5, &pruner).unwrap();
    assert!(
        set.len() <= 3,
        "crossing the cap must prune back to max_degree, got {}",
        set.len()
    );
}

#[test]
fn test_insert_diverse_merges_all_sources() {
    let provider = line_provider(16);
    let pruner = Pruner {
        provider: &provider,
        alpha: 4.0,
        max_degree: 8,
    };
    let set = NeighborSet::new(8, 1.2);
    set.insert(0, 9, 0.05, &pruner).unwrap();

    let mut natural = NodeArray::new();
    natural.add_in_order(1, 0.9);
    natural.add_in_order(2, 0.6);
    let mut concurrent = NodeArray::new();
    concurrent.add_in_order(3, 0.5);

    set.insert_diverse(0, &natural, &concurrent, &pruner).unwrap();
    let snapshot = set.snapshot();
    for node in [1, 2, 3, 9] {
        assert!(snapshot.contains(node), "missing node {node}");
    }
}

#[test]
fn test_mark_dangling_reports_removed() {
    let provider = line_provider(16);
    let pruner = Pruner {
        provider: &provider,
        alpha: 2.0,
        max_degree: 8,
    };
    let set = NeighborSet::new(8, 1.2);
    for (node, score) in [(1u32, 0.9f32), (2, 0.8), (3, 0.7)] {
        set.insert(0, node, score, &pruner).unwrap();
    }

    let removed = AtomicBitSet::with_capacity(16);
    removed.set(2);
    assert_eq!(set.mark_dangling(&removed), 1);
    assert!(!set.snapshot().contains(2));
    assert_eq!(set.mark_dangling(&removed), 0, "second pass removes nothing");
}

#[test]
fn test_concurrent_inserts_never_exceed_cap() {
    let provider = Arc::new(line_provider(80));
    let set = Arc::new(NeighborSet::new(4, 1.2));

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let provider = Arc::clone(&provider);
            let set = Arc::clone(&set);
            std::thread::spawn(move || {
                let pruner = Pruner {
                    provider: provider.as_ref(),
                    alpha: 1.2,
                    max_degree: 4,
                };
                for i in 0..16u32 {
                    let node = t * 16 + i + 1;
                    let score = 1.0 / (1.0 + node as f32);
                    set.insert(0, node, score, &pruner).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    let snapshot = set.snapshot();
    assert!(snapshot.len() <= 5, "published length {} above cap", snapshot.len());
    // No duplicates and sorted
    for i in 1..snapshot.len() {
        assert!(snapshot.score(i - 1) >= snapshot.score(i));
    }
}
