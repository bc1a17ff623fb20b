//! Zero-overhead SIMD kernel dispatch using `OnceLock`.
//!
//! CPU features are detected once at first use and cached as plain function
//! pointers, so hot loops never pay for `is_x86_feature_detected!`. The
//! selection ladder on `x86_64` is AVX-512F, then AVX2+FMA, then the
//! portable [`crate::simd_explicit`] kernels; other architectures go
//! straight to the portable kernels (which lower to NEON on `aarch64`).
//!
//! Selection is idempotent and thread-safe; the arithmetic contract of each
//! kernel is identical across backends up to floating-point summation order.

use std::sync::OnceLock;

/// Type alias for binary float kernel function pointers.
type KernelFn = fn(&[f32], &[f32]) -> f32;

/// Dispatched dot product function.
static DOT_PRODUCT_FN: OnceLock<KernelFn> = OnceLock::new();

/// Dispatched squared L2 distance function.
static SQUARED_L2_FN: OnceLock<KernelFn> = OnceLock::new();

/// Dispatched cosine similarity function.
static COSINE_FN: OnceLock<KernelFn> = OnceLock::new();

// =============================================================================
// Feature detection and dispatch selection
// =============================================================================

fn select_dot_product() -> KernelFn {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            return dot_product_avx512;
        }
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return dot_product_avx2;
        }
    }
    crate::simd_explicit::dot_product_simd
}

fn select_squared_l2() -> KernelFn {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            return squared_l2_avx512;
        }
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return squared_l2_avx2;
        }
    }
    crate::simd_explicit::squared_l2_simd
}

fn select_cosine() -> KernelFn {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return cosine_avx2;
        }
    }
    crate::simd_explicit::cosine_similarity_simd
}

// =============================================================================
// Public dispatched entry points
// =============================================================================

/// Computes the dot product with the best kernel for this CPU.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    DOT_PRODUCT_FN.get_or_init(select_dot_product)(a, b)
}

/// Computes the squared L2 distance with the best kernel for this CPU.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    SQUARED_L2_FN.get_or_init(select_squared_l2)(a, b)
}

/// Computes cosine similarity with the best kernel for this CPU.
///
/// # Panics
///
/// Panics if vectors have different lengths.
#[inline]
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    COSINE_FN.get_or_init(select_cosine)(a, b)
}

// =============================================================================
// AVX2 kernels (x86_64)
// =============================================================================

#[cfg(target_arch = "x86_64")]
fn dot_product_avx2(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    // SAFETY: this function pointer is only installed after avx2+fma detection
    unsafe { dot_product_avx2_impl(a, b) }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn dot_product_avx2_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::{_mm256_fmadd_ps, _mm256_loadu_ps, _mm256_setzero_ps, _mm256_storeu_ps};

    let simd_len = a.len() / 8;
    let mut acc = _mm256_setzero_ps();
    for i in 0..simd_len {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        acc = _mm256_fmadd_ps(va, vb, acc);
    }

    let mut lanes = [0.0f32; 8];
    _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
    let mut result: f32 = lanes.iter().sum();

    for i in simd_len * 8..a.len() {
        result += a[i] * b[i];
    }
    result
}

#[cfg(target_arch = "x86_64")]
fn squared_l2_avx2(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    // SAFETY: this function pointer is only installed after avx2+fma detection
    unsafe { squared_l2_avx2_impl(a, b) }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn squared_l2_avx2_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::{
        _mm256_fmadd_ps, _mm256_loadu_ps, _mm256_setzero_ps, _mm256_storeu_ps, _mm256_sub_ps,
    };

    let simd_len = a.len() / 8;
    let mut acc = _mm256_setzero_ps();
    for i in 0..simd_len {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        let diff = _mm256_sub_ps(va, vb);
        acc = _mm256_fmadd_ps(diff, diff, acc);
    }

    let mut lanes = [0.0f32; 8];
    _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
    let mut result: f32 = lanes.iter().sum();

    for i in simd_len * 8..a.len() {
        let diff = a[i] - b[i];
        result += diff * diff;
    }
    result
}

#[cfg(target_arch = "x86_64")]
fn cosine_avx2(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    // SAFETY: this function pointer is only installed after avx2+fma detection
    unsafe { cosine_avx2_impl(a, b) }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn cosine_avx2_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::{_mm256_fmadd_ps, _mm256_loadu_ps, _mm256_setzero_ps, _mm256_storeu_ps};

    let simd_len = a.len() / 8;
    let mut dot = _mm256_setzero_ps();
    let mut norm_a = _mm256_setzero_ps();
    let mut norm_b = _mm256_setzero_ps();

    for i in 0..simd_len {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        dot = _mm256_fmadd_ps(va, vb, dot);
        norm_a = _mm256_fmadd_ps(va, va, norm_a);
        norm_b = _mm256_fmadd_ps(vb, vb, norm_b);
    }

    let mut lanes = [0.0f32; 8];
    _mm256_storeu_ps(lanes.as_mut_ptr(), dot);
    let mut dot_sum: f32 = lanes.iter().sum();
    _mm256_storeu_ps(lanes.as_mut_ptr(), norm_a);
    let mut norm_a_sum: f32 = lanes.iter().sum();
    _mm256_storeu_ps(lanes.as_mut_ptr(), norm_b);
    let mut norm_b_sum: f32 = lanes.iter().sum();

    for i in simd_len * 8..a.len() {
        dot_sum += a[i] * b[i];
        norm_a_sum += a[i] * a[i];
        norm_b_sum += b[i] * b[i];
    }

    let denom = norm_a_sum.sqrt() * norm_b_sum.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot_sum / denom
}

// =============================================================================
// AVX-512 kernels (x86_64)
// =============================================================================

#[cfg(target_arch = "x86_64")]
fn dot_product_avx512(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    // SAFETY: this function pointer is only installed after avx512f detection
    unsafe { dot_product_avx512_impl(a, b) }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn dot_product_avx512_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::{
        _mm512_fmadd_ps, _mm512_loadu_ps, _mm512_reduce_add_ps, _mm512_setzero_ps,
    };

    let simd_len = a.len() / 16;
    let mut acc = _mm512_setzero_ps();
    for i in 0..simd_len {
        let va = _mm512_loadu_ps(a.as_ptr().add(i * 16));
        let vb = _mm512_loadu_ps(b.as_ptr().add(i * 16));
        acc = _mm512_fmadd_ps(va, vb, acc);
    }

    let mut result = _mm512_reduce_add_ps(acc);
    for i in simd_len * 16..a.len() {
        result += a[i] * b[i];
    }
    result
}

#[cfg(target_arch = "x86_64")]
fn squared_l2_avx512(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    // SAFETY: this function pointer is only installed after avx512f detection
    unsafe { squared_l2_avx512_impl(a, b) }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn squared_l2_avx512_impl(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::{
        _mm512_fmadd_ps, _mm512_loadu_ps, _mm512_reduce_add_ps, _mm512_setzero_ps, _mm512_sub_ps,
    };

    let simd_len = a.len() / 16;
    let mut acc = _mm512_setzero_ps();
    for i in 0..simd_len {
        let va = _mm512_loadu_ps(a.as_ptr().add(i * 16));
        let vb = _mm512_loadu_ps(b.as_ptr().add(i * 16));
        let diff = _mm512_sub_ps(va, vb);
        acc = _mm512_fmadd_ps(diff, diff, acc);
    }

    let mut result = _mm512_reduce_add_ps(acc);
    for i in simd_len * 16..a.len() {
        let diff = a[i] - b[i];
        result += diff * diff;
    }
    result
}
