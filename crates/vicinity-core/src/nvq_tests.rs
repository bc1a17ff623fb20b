//! Tests for the `nvq` module.

use crate::nvq::NvqQuantizer;
use crate::vectors::{SliceVectorSource, VectorSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn uniform_source(count: usize, dim: usize, seed: u64) -> SliceVectorSource {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f32> = (0..count * dim).map(|_| rng.gen_range(-2.0..2.0)).collect();
    SliceVectorSource::from_packed(data, dim).unwrap()
}

#[test]
fn test_encoded_len_follows_bit_config() {
    let source = uniform_source(50, 10, 1);
    // 10 dims, 2 subvectors of 5 dims at 8 bits: 5 + 5 bytes
    let nvq = NvqQuantizer::train(&source, 2, 8).unwrap();
    assert_eq!(nvq.encoded_len(), 10);

    // 4 bits per dim: ceil(5*4/8) * 2 = 3 + 3 bytes
    let nvq4 = NvqQuantizer::train(&source, 2, 4).unwrap();
    assert_eq!(nvq4.encoded_len(), 6);

    // 1 bit per dim: ceil(5/8) * 2
    let nvq1 = NvqQuantizer::train(&source, 2, 1).unwrap();
    assert_eq!(nvq1.encoded_len(), 2);
}

#[test]
fn test_round_trip_error_is_bounded_by_grid_step() {
    let source = uniform_source(200, 16, 2);
    let nvq = NvqQuantizer::train(&source, 4, 8).unwrap();

    let mut decoded = vec![0.0f32; 16];
    for ord in 0..200u32 {
        let v = source.get(ord).unwrap();
        let code = nvq.encode(&v).unwrap();
        nvq.decode_into(&code, &mut decoded).unwrap();
        for d in 0..16 {
            // Range is about 4.0 over 255 levels; half a step of slack
            assert!(
                (decoded[d] - v[d]).abs() <= 4.0 / 255.0,
                "ord {ord} dim {d}: {} vs {}",
                decoded[d],
                v[d]
            );
        }
    }
}

#[test]
fn test_quantize_is_stable_on_reencode() {
    let source = uniform_source(100, 8, 3);
    let nvq = NvqQuantizer::train(&source, 2, 6).unwrap();

    let v = source.get(42).unwrap();
    let code = nvq.encode(&v).unwrap();
    let mut decoded = vec![0.0f32; 8];
    nvq.decode_into(&code, &mut decoded).unwrap();
    let recoded = nvq.encode(&decoded).unwrap();
    assert_eq!(code, recoded, "grid points must re-encode to themselves");
}

#[test]
fn test_header_bytes_round_trip() {
    let source = uniform_source(64, 12, 4);
    let nvq = NvqQuantizer::train(&source, 3, 5).unwrap();

    let bytes = nvq.to_bytes();
    assert_eq!(bytes.len(), nvq.header_len());
    let parsed = NvqQuantizer::from_bytes(&bytes).unwrap();
    assert_eq!(nvq, parsed);
}

#[test]
fn test_rejects_bad_config() {
    let source = uniform_source(10, 8, 5);
    assert!(NvqQuantizer::train(&source, 0, 8).is_err());
    assert!(NvqQuantizer::train(&source, 9, 8).is_err());
    assert!(NvqQuantizer::train(&source, 2, 0).is_err());
    assert!(NvqQuantizer::train(&source, 2, 9).is_err());
}

#[test]
fn test_constant_dimension_survives() {
    let vectors: Vec<Vec<f32>> = (0..20).map(|i| vec![5.0, i as f32]).collect();
    let source = SliceVectorSource::from_vecs(&vectors).unwrap();
    let nvq = NvqQuantizer::train(&source, 1, 8).unwrap();

    let code = nvq.encode(&[5.0, 7.0]).unwrap();
    let mut decoded = vec![0.0f32; 2];
    nvq.decode_into(&code, &mut decoded).unwrap();
    assert!((decoded[0] - 5.0).abs() < 1e-5);
    assert!((decoded[1] - 7.0).abs() < 0.1);
}
