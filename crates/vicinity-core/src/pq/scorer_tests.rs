//! Tests for the approximate PQ scorers.

use super::{LazyPqScorer, PqParams, PrecomputedPqScorer, ProductQuantizer};
use crate::score::ScoreFn;
use crate::similarity::Similarity;
use crate::vectors::{SliceVectorSource, VectorSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn gaussian_source(count: usize, dim: usize, seed: u64) -> SliceVectorSource {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(count * dim);
    for _ in 0..count * dim {
        let u1: f32 = rng.gen_range(1e-6..1.0);
        let u2: f32 = rng.gen_range(0.0..1.0);
        data.push((-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos());
    }
    SliceVectorSource::from_packed(data, dim).unwrap()
}

fn setup(center: bool) -> (Arc<ProductQuantizer>, Arc<super::PqCodeStore>, SliceVectorSource) {
    let source = gaussian_source(512, 16, 20);
    let params = PqParams {
        subspaces: 8,
        centroids: 32,
        iterations: 12,
        seed: 99,
        center_globally: center,
    };
    let pq = Arc::new(ProductQuantizer::train(&source, &params).unwrap());
    let codes = Arc::new(pq.encode_all(&source).unwrap());
    (pq, codes, source)
}

fn assert_tracks_exact(similarity: Similarity, center: bool, tolerance: f32) {
    let (pq, codes, source) = setup(center);
    let query = source.get(0).unwrap();
    let scorer =
        PrecomputedPqScorer::new(Arc::clone(&pq), Arc::clone(&codes), similarity, &query).unwrap();

    let mut total_err = 0.0f32;
    for ord in 0..100u32 {
        let exact = similarity.score(&query, &source.get(ord).unwrap());
        let approx = scorer.similarity_to(ord).unwrap();
        total_err += (exact - approx).abs();
    }
    let mean_err = total_err / 100.0;
    assert!(
        mean_err < tolerance,
        "{similarity:?} mean |exact-approx| = {mean_err}, tolerance {tolerance}"
    );
}

#[test]
fn test_precomputed_tracks_exact_dot() {
    // Dot scores are unbounded, so quantization noise is largest here
    assert_tracks_exact(Similarity::Dot, false, 0.6);
}

#[test]
fn test_precomputed_tracks_exact_euclidean() {
    assert_tracks_exact(Similarity::Euclidean, false, 0.25);
}

#[test]
fn test_precomputed_tracks_exact_cosine() {
    assert_tracks_exact(Similarity::Cosine, false, 0.25);
}

#[test]
fn test_precomputed_tracks_exact_with_global_centroid() {
    assert_tracks_exact(Similarity::Euclidean, true, 0.25);
    assert_tracks_exact(Similarity::Dot, true, 0.6);
}

#[test]
fn test_dot_with_global_centroid_on_shifted_data() {
    // Far-from-origin data makes the global-centroid bias term dominant;
    // any mishandling of the bias shows up as a gross relative error
    let base = gaussian_source(512, 16, 21);
    let shifted: Vec<Vec<f32>> = (0..512)
        .map(|i| base.get(i).unwrap().iter().map(|x| x + 10.0).collect())
        .collect();
    let source = SliceVectorSource::from_vecs(&shifted).unwrap();
    let params = PqParams {
        subspaces: 8,
        centroids: 32,
        iterations: 12,
        seed: 99,
        center_globally: true,
    };
    let pq = Arc::new(ProductQuantizer::train(&source, &params).unwrap());
    let codes = Arc::new(pq.encode_all(&source).unwrap());

    let query = source.get(0).unwrap();
    let precomputed =
        PrecomputedPqScorer::new(Arc::clone(&pq), Arc::clone(&codes), Similarity::Dot, &query)
            .unwrap();
    let lazy = LazyPqScorer::new(Arc::clone(&pq), Arc::clone(&codes), Similarity::Dot, &query)
        .unwrap();

    for ord in [1u32, 50, 300] {
        let exact = Similarity::Dot.score(&query, &source.get(ord).unwrap());
        for (name, approx) in [
            ("precomputed", precomputed.similarity_to(ord).unwrap()),
            ("lazy", lazy.similarity_to(ord).unwrap()),
        ] {
            let relative = (exact - approx).abs() / exact.abs().max(1.0);
            assert!(
                relative < 0.05,
                "{name} ord {ord}: exact {exact} vs approx {approx}"
            );
        }
    }
}

#[test]
fn test_lazy_matches_precomputed() {
    for similarity in [Similarity::Dot, Similarity::Cosine, Similarity::Euclidean] {
        let (pq, codes, source) = setup(false);
        let query = source.get(3).unwrap();
        let precomputed =
            PrecomputedPqScorer::new(Arc::clone(&pq), Arc::clone(&codes), similarity, &query)
                .unwrap();
        let lazy =
            LazyPqScorer::new(Arc::clone(&pq), Arc::clone(&codes), similarity, &query).unwrap();

        for ord in [0u32, 17, 140, 511] {
            let a = precomputed.similarity_to(ord).unwrap();
            let b = lazy.similarity_to(ord).unwrap();
            assert!(
                (a - b).abs() < 1e-4,
                "{similarity:?} lazy {b} != precomputed {a} at ord {ord}"
            );
        }
    }
}

#[test]
fn test_scorer_reports_approximate() {
    let (pq, codes, source) = setup(false);
    let query = source.get(1).unwrap();
    let scorer = PrecomputedPqScorer::new(pq, codes, Similarity::Cosine, &query).unwrap();
    assert!(!scorer.is_exact());
    assert!(scorer.supports_bulk());

    let mut out = vec![0.0; 3];
    scorer.bulk_similarity_to(&[5, 6, 7], &mut out).unwrap();
    for (i, &node) in [5u32, 6, 7].iter().enumerate() {
        assert_eq!(out[i], scorer.similarity_to(node).unwrap());
    }
}

#[test]
fn test_scorer_out_of_range() {
    let (pq, codes, source) = setup(false);
    let query = source.get(0).unwrap();
    let scorer = PrecomputedPqScorer::new(pq, codes, Similarity::Dot, &query).unwrap();
    assert!(scorer.similarity_to(512).is_err());
}

/// Recall of PQ candidate selection plus exact rerank against brute force.
///
/// d=128 Gaussian vectors, M=16, K=256 per the canonical scenario; the
/// reranked top 10 out of the approximate top 100 must hit at least 0.85
/// recall against exact search.
#[test]
#[ignore = "trains a full 16x256 codebook; run with --ignored"]
fn test_recall_at_10_with_rerank() {
    let source = gaussian_source(10_000, 128, 77);
    let params = PqParams {
        subspaces: 16,
        centroids: 256,
        iterations: 15,
        seed: 7,
        center_globally: false,
    };
    let pq = Arc::new(ProductQuantizer::train(&source, &params).unwrap());
    let codes = Arc::new(pq.encode_all(&source).unwrap());

    let query = gaussian_source(1, 128, 123).get(0).unwrap();
    let scorer =
        PrecomputedPqScorer::new(Arc::clone(&pq), Arc::clone(&codes), Similarity::Euclidean, &query)
            .unwrap();

    // Approximate top 100
    let mut approx: Vec<(u32, f32)> = (0..10_000u32)
        .map(|ord| (ord, scorer.similarity_to(ord).unwrap()))
        .collect();
    approx.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    approx.truncate(100);

    // Exact rerank of the candidates
    let mut reranked: Vec<(u32, f32)> = approx
        .iter()
        .map(|&(ord, _)| {
            (
                ord,
                Similarity::Euclidean.score(&query, &source.get(ord).unwrap()),
            )
        })
        .collect();
    reranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    reranked.truncate(10);

    // Brute-force exact top 10
    let mut exact: Vec<(u32, f32)> = (0..10_000u32)
        .map(|ord| {
            (
                ord,
                Similarity::Euclidean.score(&query, &source.get(ord).unwrap()),
            )
        })
        .collect();
    exact.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    exact.truncate(10);

    let exact_set: std::collections::HashSet<u32> = exact.iter().map(|&(o, _)| o).collect();
    let hits = reranked
        .iter()
        .filter(|&&(o, _)| exact_set.contains(&o))
        .count();
    assert!(hits >= 9, "recall@10 = {}/10, expected >= 0.85", hits);
}
