//! Float vector kernels with runtime backend selection.
//!
//! Public facade over [`crate::simd_dispatch`] (runtime-selected AVX-512 /
//! AVX2 / portable kernels) and [`crate::simd_explicit`] (portable `wide`
//! kernels for the operations that never dominate a profile).
//!
//! All kernels operate on IEEE-754 binary32 values; summation order is
//! implementation-defined, so callers comparing against a scalar reference
//! must tolerate about 1e-5 relative error.

/// Computes the dot product of two vectors.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    crate::simd_dispatch::dot_product(a, b)
}

/// Computes the squared Euclidean distance between two vectors.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    crate::simd_dispatch::squared_l2(a, b)
}

/// Computes the cosine similarity of two vectors.
///
/// Returns 0.0 if either vector has zero norm.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    crate::simd_dispatch::cosine_similarity(a, b)
}

/// Computes the L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    crate::simd_explicit::norm_simd(v)
}

/// Normalizes a vector in place to unit L2 length.
///
/// A zero vector is left unchanged.
#[inline]
pub fn l2_normalize(v: &mut [f32]) {
    crate::simd_explicit::normalize_inplace_simd(v);
}

/// Adds `other` into `dst` element-wise.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
pub fn add_in_place(dst: &mut [f32], other: &[f32]) {
    crate::simd_explicit::add_in_place_simd(dst, other);
}

/// Subtracts `other` from `dst` element-wise.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
pub fn sub_in_place(dst: &mut [f32], other: &[f32]) {
    crate::simd_explicit::sub_in_place_simd(dst, other);
}

/// Multiplies every element of `v` by `factor`.
#[inline]
pub fn scale(v: &mut [f32], factor: f32) {
    crate::simd_explicit::scale_simd(v, factor);
}

/// Sums the elements of a vector.
#[inline]
#[must_use]
pub fn sum(v: &[f32]) -> f32 {
    crate::simd_explicit::sum_simd(v)
}

/// Returns the smallest element of a vector, or `f32::INFINITY` when empty.
#[inline]
#[must_use]
pub fn min(v: &[f32]) -> f32 {
    v.iter().copied().fold(f32::INFINITY, f32::min)
}

/// Returns the largest element of a vector, or `f32::NEG_INFINITY` when empty.
#[inline]
#[must_use]
pub fn max(v: &[f32]) -> f32 {
    v.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}
