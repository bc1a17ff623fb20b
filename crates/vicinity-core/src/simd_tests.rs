//! Tests for the SIMD kernel facade.
//!
//! Each dispatched kernel is compared against a naive scalar reference on
//! lengths that exercise the full-lane and remainder paths.

use crate::simd;

fn scalar_dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn scalar_sqdist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-5 * a.abs().max(b.abs()).max(1.0)
}

fn test_vectors(len: usize) -> (Vec<f32>, Vec<f32>) {
    let a: Vec<f32> = (0..len).map(|i| (i as f32 * 0.37).sin()).collect();
    let b: Vec<f32> = (0..len).map(|i| (i as f32 * 0.11).cos()).collect();
    (a, b)
}

#[test]
fn test_dot_matches_scalar_reference() {
    for len in [1, 7, 8, 15, 16, 33, 128, 769] {
        let (a, b) = test_vectors(len);
        assert!(
            close(simd::dot_product(&a, &b), scalar_dot(&a, &b)),
            "dot mismatch at len {len}"
        );
    }
}

#[test]
fn test_squared_l2_matches_scalar_reference() {
    for len in [1, 7, 8, 15, 16, 33, 128, 769] {
        let (a, b) = test_vectors(len);
        assert!(
            close(simd::squared_l2(&a, &b), scalar_sqdist(&a, &b)),
            "sqdist mismatch at len {len}"
        );
    }
}

#[test]
fn test_cosine_matches_scalar_reference() {
    for len in [3, 8, 17, 128] {
        let (a, b) = test_vectors(len);
        let expected =
            scalar_dot(&a, &b) / (scalar_dot(&a, &a).sqrt() * scalar_dot(&b, &b).sqrt());
        assert!(
            close(simd::cosine_similarity(&a, &b), expected),
            "cosine mismatch at len {len}"
        );
    }
}

#[test]
fn test_cosine_zero_vector_is_zero() {
    let zero = vec![0.0; 16];
    let other = vec![1.0; 16];
    assert_eq!(simd::cosine_similarity(&zero, &other), 0.0);
}

#[test]
fn test_l2_normalize() {
    let mut v: Vec<f32> = (1..20).map(|i| i as f32).collect();
    simd::l2_normalize(&mut v);
    assert!(close(simd::norm(&v), 1.0));

    let mut zero = vec![0.0; 9];
    simd::l2_normalize(&mut zero);
    assert_eq!(zero, vec![0.0; 9]);
}

#[test]
fn test_elementwise_ops() {
    let mut v = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    simd::add_in_place(&mut v, &[1.0; 9]);
    assert_eq!(v[0], 2.0);
    assert_eq!(v[8], 10.0);

    simd::sub_in_place(&mut v, &[2.0; 9]);
    assert_eq!(v[0], 0.0);
    assert_eq!(v[8], 8.0);

    simd::scale(&mut v, 0.5);
    assert_eq!(v[8], 4.0);
}

#[test]
fn test_reductions() {
    let v: Vec<f32> = (1..=100).map(|i| i as f32).collect();
    assert!(close(simd::sum(&v), 5050.0));
    assert_eq!(simd::min(&v), 1.0);
    assert_eq!(simd::max(&v), 100.0);

    assert_eq!(simd::min(&[]), f32::INFINITY);
    assert_eq!(simd::max(&[]), f32::NEG_INFINITY);
}

#[test]
#[should_panic(expected = "Vector dimensions must match")]
fn test_dot_panics_on_length_mismatch() {
    let _ = simd::dot_product(&[1.0, 2.0], &[1.0]);
}
