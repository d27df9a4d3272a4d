//! L2 distance helpers for dense patch embeddings.
//!
//! The whole pipeline is built on Euclidean geometry: coreset selection,
//! index search, and the reweighting correction all compare squared L2
//! distances and take the square root only where a true distance is reported.
//! This module is the single shared definition of those comparisons.
//!
//! Mismatched dimensions return `f32::INFINITY` so a malformed pair is never
//! selected as a nearest neighbor.

use crate::simd;

/// L2 (Euclidean) distance.
#[inline]
#[must_use]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    simd::l2_distance(a, b)
}

/// L2 distance squared (monotonic in [`l2_distance`], cheaper to compare).
#[inline]
#[must_use]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    simd::l2_distance_squared(a, b)
}
