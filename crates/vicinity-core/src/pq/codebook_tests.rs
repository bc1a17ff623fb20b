//! Tests for product quantizer training, encoding and persistence.

use super::{PqParams, ProductQuantizer};
use crate::vectors::{SliceVectorSource, VectorSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn gaussian_source(count: usize, dim: usize, seed: u64) -> SliceVectorSource {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(count * dim);
    for _ in 0..count * dim {
        // Box-Muller
        let u1: f32 = rng.gen_range(1e-6..1.0);
        let u2: f32 = rng.gen_range(0.0..1.0);
        data.push((-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos());
    }
    SliceVectorSource::from_packed(data, dim).unwrap()
}

fn small_params() -> PqParams {
    PqParams {
        subspaces: 4,
        centroids: 16,
        iterations: 10,
        seed: 42,
        center_globally: false,
    }
}

#[test]
fn test_train_shapes() {
    let source = gaussian_source(256, 10, 1);
    let pq = ProductQuantizer::train(&source, &small_params()).unwrap();
    assert_eq!(pq.dimension(), 10);
    assert_eq!(pq.subspaces(), 4);
    assert_eq!(pq.centroids_per_subspace(), 16);
    assert_eq!(pq.code_len(), 4);
    // 10 over 4 subspaces: sizes 3,3,2,2
    assert_eq!(pq.centroid(0, 0).len(), 3);
    assert_eq!(pq.centroid(3, 0).len(), 2);
}

#[test]
fn test_encode_decode_encode_is_identity() {
    let source = gaussian_source(300, 8, 2);
    let pq = ProductQuantizer::train(&source, &small_params()).unwrap();

    // For any valid code bytes, decode then re-encode yields the original
    for trial in 0..64u8 {
        let code = vec![trial % 16, (trial * 7) % 16, (trial * 3) % 16, trial % 16];
        let mut decoded = vec![0.0f32; 8];
        pq.decode_into(&code, &mut decoded).unwrap();
        let recoded = pq.encode(&decoded).unwrap();
        assert_eq!(recoded, code, "code bytes drifted through decode/encode");
    }
}

#[test]
fn test_encode_all_keys_by_ordinal() {
    let source = gaussian_source(120, 8, 3);
    let pq = ProductQuantizer::train(&source, &small_params()).unwrap();
    let codes = pq.encode_all(&source).unwrap();
    assert_eq!(codes.len(), 120);

    let direct = pq.encode(&source.get(57).unwrap()).unwrap();
    assert_eq!(codes.get(57).unwrap(), &direct[..]);
    assert!(codes.get(120).is_none());
}

#[test]
fn test_global_centering_round_trip() {
    let mut params = small_params();
    params.center_globally = true;
    // Shift the whole dataset away from the origin
    let base = gaussian_source(256, 8, 4);
    let shifted: Vec<Vec<f32>> = (0..256)
        .map(|i| {
            base.get(i)
                .unwrap()
                .iter()
                .map(|x| x + 100.0)
                .collect()
        })
        .collect();
    let source = SliceVectorSource::from_vecs(&shifted).unwrap();

    let pq = ProductQuantizer::train(&source, &params).unwrap();
    assert!(pq.global_centroid().is_some());
    let centroid_mean = pq.global_centroid().unwrap()[0];
    assert!((centroid_mean - 100.0).abs() < 1.0);

    // Reconstruction lands near the original, not near the origin
    let v = source.get(0).unwrap();
    let code = pq.encode(&v).unwrap();
    let mut decoded = vec![0.0f32; 8];
    pq.decode_into(&code, &mut decoded).unwrap();
    assert!((decoded[0] - v[0]).abs() < 10.0);
}

#[test]
fn test_save_load_is_bit_exact() {
    let source = gaussian_source(256, 12, 5);
    let pq = ProductQuantizer::train(&source, &small_params()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codebook.pq");
    pq.save(&path).unwrap();
    let loaded = ProductQuantizer::load(&path).unwrap();

    assert_eq!(pq, loaded);
}

#[test]
fn test_header_bytes_round_trip() {
    let source = gaussian_source(256, 12, 6);
    let mut params = small_params();
    params.center_globally = true;
    let pq = ProductQuantizer::train(&source, &params).unwrap();

    let bytes = pq.to_bytes();
    assert_eq!(bytes.len(), pq.header_len());
    let parsed = ProductQuantizer::from_bytes(&bytes).unwrap();
    assert_eq!(pq, parsed);
}

#[test]
fn test_rejects_bad_params() {
    let source = gaussian_source(64, 8, 7);
    let mut params = small_params();
    params.subspaces = 0;
    assert!(ProductQuantizer::train(&source, &params).is_err());

    params = small_params();
    params.centroids = 257;
    assert!(ProductQuantizer::train(&source, &params).is_err());

    // Fewer training vectors than centroids
    let tiny = gaussian_source(8, 8, 8);
    assert!(ProductQuantizer::train(&tiny, &small_params()).is_err());
}

#[test]
fn test_encode_rejects_wrong_dimension() {
    let source = gaussian_source(256, 8, 9);
    let pq = ProductQuantizer::train(&source, &small_params()).unwrap();
    assert!(pq.encode(&[0.0; 7]).is_err());
}
