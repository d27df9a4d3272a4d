//! Dense vector kernels.
//!
//! Portable implementations of the inner loops that dominate scoring cost.
//! Everything in the pipeline that touches raw `&[f32]` distance math goes
//! through this module, so an accelerated execution context (SIMD intrinsics,
//! GPU offload) only needs to replace these four functions. Swapping the
//! implementation changes latency, never results.

const NORM_EPSILON: f32 = 1e-9;

/// Dot product of two vectors.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// L2 (Euclidean) distance between two vectors.
#[inline]
#[must_use]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}

/// L2 distance squared (faster when only comparing distances).
#[inline]
#[must_use]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Whether a vector is effectively zero-length.
#[inline]
#[must_use]
pub fn is_degenerate(v: &[f32]) -> bool {
    norm(v) < NORM_EPSILON
}
