//! Greedy coreset selection and whitening statistics.
//!
//! # Intuition
//!
//! The embedding bank holds one vector per spatial location per training
//! image; storing and searching all of it is wasteful because neighboring
//! patches are highly redundant. Greedy farthest-point (k-center) sampling
//! picks a subset that covers the bank's geometry: after selection no bank
//! point is farther from its nearest selected center than the achieved
//! covering radius, and greedy selection is a 2-approximation of the optimal
//! radius for that subset size.
//!
//! Selection is O(n*k) with incremental bookkeeping: a running
//! min-distance-to-selected-set array is updated after each pick instead of
//! being recomputed from scratch. Ties break toward the first-encountered
//! index, so a fixed seed point and bank give a fully reproducible order.
//!
//! # References
//!
//! - Gonzalez (1985) "Clustering to minimize the maximum intercluster
//!   distance"
//! - Sener, Savarese (2018) "Active learning for CNNs: a core-set approach"

use log::debug;
use serde::{Deserialize, Serialize};

use crate::distance;
use crate::error::{AnomalyError, Result};

/// Result of a greedy k-center pass.
#[derive(Debug, Clone)]
pub struct CoresetSelection {
    /// Bank indices of the selected centers, in selection order. The seed
    /// point is always first.
    pub indices: Vec<usize>,
    /// Maximum distance from any bank point to its nearest center at
    /// termination.
    pub covering_radius: f32,
}

/// Number of points to select for a bank of `n` points: `ceil(ratio * n)`,
/// clamped to `1..=n`.
pub fn selection_size(n: usize, ratio: f32) -> Result<usize> {
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(AnomalyError::InvalidParameter(format!(
            "coreset sampling ratio must be in (0, 1], got {ratio}"
        )));
    }
    if n == 0 {
        return Err(AnomalyError::EmptyBank);
    }
    Ok(((ratio as f64 * n as f64).ceil() as usize).clamp(1, n))
}

/// Greedy farthest-point sampling over `points`, starting from
/// `seed_index`, until `n_select` centers are chosen.
///
/// Distances are compared squared; the reported covering radius is a true
/// L2 distance.
pub fn select_coreset(
    points: &[Vec<f32>],
    n_select: usize,
    seed_index: usize,
) -> Result<CoresetSelection> {
    let n = points.len();
    if n == 0 {
        return Err(AnomalyError::EmptyBank);
    }
    if n_select == 0 || n_select > n {
        return Err(AnomalyError::InvalidParameter(format!(
            "cannot select {n_select} centers from a bank of {n}"
        )));
    }
    if seed_index >= n {
        return Err(AnomalyError::InvalidParameter(format!(
            "seed index {seed_index} out of range for bank of {n}"
        )));
    }

    let mut indices = Vec::with_capacity(n_select);
    indices.push(seed_index);

    // Squared distance from each point to its nearest selected center.
    // Selected points are masked with NEG_INFINITY so they can never win the
    // argmax again, even when every remaining candidate is a duplicate of a
    // center (distance 0 across the board).
    let mut min_d2: Vec<f32> = points
        .iter()
        .map(|p| distance::l2_distance_squared(p, &points[seed_index]))
        .collect();
    min_d2[seed_index] = f32::NEG_INFINITY;

    while indices.len() < n_select {
        // Strictly-greater comparison keeps the first-encountered index on
        // ties.
        let mut best_idx = 0;
        let mut best_d2 = f32::NEG_INFINITY;
        for (i, &d2) in min_d2.iter().enumerate() {
            if d2 > best_d2 {
                best_d2 = d2;
                best_idx = i;
            }
        }
        indices.push(best_idx);
        let center = &points[best_idx];
        for (i, d2) in min_d2.iter_mut().enumerate() {
            let cand = distance::l2_distance_squared(&points[i], center);
            if cand < *d2 {
                *d2 = cand;
            }
        }
        min_d2[best_idx] = f32::NEG_INFINITY;
    }

    let covering_radius = min_d2.iter().fold(0.0_f32, |a, &b| a.max(b)).sqrt();
    debug!(
        "coreset selection: {} of {} points, covering radius {:.4}",
        n_select, n, covering_radius
    );
    Ok(CoresetSelection { indices, covering_radius })
}

/// Per-dimension whitening statistics.
///
/// Computed from the coreset, not the full bank (deliberate: the coreset is
/// what the index stores, and its spread is what queries are compared
/// against). Applied as `(x - mean) / (offset + std)`; the offset keeps
/// near-constant dimensions from exploding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhiteningStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
    pub offset: f32,
}

impl WhiteningStats {
    /// Fit mean and (population) standard deviation over `vectors`.
    pub fn fit(vectors: &[Vec<f32>], offset: f32) -> Result<Self> {
        if vectors.is_empty() {
            return Err(AnomalyError::EmptyBank);
        }
        if offset < 0.0 {
            return Err(AnomalyError::InvalidParameter(format!(
                "whitening offset must be non-negative, got {offset}"
            )));
        }
        let dim = vectors[0].len();
        let n = vectors.len() as f64;

        let mut mean = vec![0.0_f64; dim];
        for v in vectors {
            if v.len() != dim {
                return Err(AnomalyError::DimensionMismatch {
                    query_dim: v.len(),
                    index_dim: dim,
                });
            }
            for (m, &x) in mean.iter_mut().zip(v.iter()) {
                *m += f64::from(x);
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0_f64; dim];
        for v in vectors {
            for ((s, &m), &x) in var.iter_mut().zip(mean.iter()).zip(v.iter()) {
                let d = f64::from(x) - m;
                *s += d * d;
            }
        }
        let std: Vec<f32> = var.iter().map(|&s| ((s / n).sqrt()) as f32).collect();
        let mean: Vec<f32> = mean.iter().map(|&m| m as f32).collect();

        Ok(Self { mean, std, offset })
    }

    /// Whiten a vector in place.
    pub fn apply_in_place(&self, v: &mut [f32]) -> Result<()> {
        if v.len() != self.mean.len() {
            return Err(AnomalyError::DimensionMismatch {
                query_dim: v.len(),
                index_dim: self.mean.len(),
            });
        }
        for ((x, &m), &s) in v.iter_mut().zip(self.mean.iter()).zip(self.std.iter()) {
            *x = (*x - m) / (self.offset + s);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clusters() -> Vec<Vec<f32>> {
        // 50 points around the origin, 50 around (10, 10).
        let mut points = Vec::new();
        for i in 0..50 {
            let t = i as f32 * 0.01;
            points.push(vec![t, -t]);
        }
        for i in 0..50 {
            let t = i as f32 * 0.01;
            points.push(vec![10.0 + t, 10.0 - t]);
        }
        points
    }

    #[test]
    fn selection_size_rounds_up_and_clamps() {
        assert_eq!(selection_size(100, 0.01).unwrap(), 1);
        assert_eq!(selection_size(100, 0.1).unwrap(), 10);
        assert_eq!(selection_size(3, 0.5).unwrap(), 2);
        assert_eq!(selection_size(10, 1.0).unwrap(), 10);
        assert!(selection_size(10, 0.0).is_err());
        assert!(selection_size(10, 1.5).is_err());
        assert!(selection_size(0, 0.5).is_err());
    }

    #[test]
    fn seed_point_is_selected_first() {
        let points = two_clusters();
        let sel = select_coreset(&points, 5, 3).unwrap();
        assert_eq!(sel.indices[0], 3);
        assert_eq!(sel.indices.len(), 5);
    }

    #[test]
    fn selection_is_deterministic() {
        let points = two_clusters();
        let a = select_coreset(&points, 10, 0).unwrap();
        let b = select_coreset(&points, 10, 0).unwrap();
        assert_eq!(a.indices, b.indices);
        assert_eq!(a.covering_radius, b.covering_radius);
    }

    #[test]
    fn second_pick_is_the_farthest_point() {
        let points = vec![vec![0.0], vec![1.0], vec![5.0], vec![2.0]];
        let sel = select_coreset(&points, 2, 0).unwrap();
        assert_eq!(sel.indices, vec![0, 2]);
    }

    #[test]
    fn covers_both_clusters() {
        let points = two_clusters();
        let sel = select_coreset(&points, 10, 0).unwrap();
        let near = sel.indices.iter().filter(|&&i| i < 50).count();
        let far = sel.indices.iter().filter(|&&i| i >= 50).count();
        assert!(near >= 1 && far >= 1);
        // Every point is within the covering radius of some center.
        for p in &points {
            let d = sel
                .indices
                .iter()
                .map(|&i| crate::distance::l2_distance(p, &points[i]))
                .fold(f32::INFINITY, f32::min);
            assert!(d <= sel.covering_radius + 1e-5);
        }
    }

    #[test]
    fn no_duplicate_selections() {
        let points = two_clusters();
        let sel = select_coreset(&points, 20, 0).unwrap();
        let mut sorted = sel.indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), sel.indices.len());
    }

    #[test]
    fn duplicate_bank_still_selects_distinct_indices() {
        // All candidates sit at distance 0 from the selected set; the argmax
        // must still move on to unselected indices.
        let points = vec![vec![1.0, 2.0]; 5];
        let sel = select_coreset(&points, 3, 1).unwrap();
        assert_eq!(sel.indices.len(), 3);
        let mut sorted = sel.indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
        assert_eq!(sel.indices[0], 1);
        assert_eq!(sel.covering_radius, 0.0);
    }

    #[test]
    fn near_duplicate_bank_exhausts_distinct_points_first() {
        // Two distinct locations, many copies of each. Selecting three
        // centers must take both locations before reusing either.
        let mut points = vec![vec![0.0, 0.0]; 4];
        points.extend(vec![vec![5.0, 5.0]; 4]);
        let sel = select_coreset(&points, 3, 0).unwrap();
        let mut sorted = sel.indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
        assert!(sel.indices.iter().any(|&i| i >= 4));
        assert_eq!(sel.covering_radius, 0.0);
    }

    #[test]
    fn whitening_centers_and_scales() {
        let vectors = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let stats = WhiteningStats::fit(&vectors, 0.0).unwrap();
        assert!((stats.mean[0] - 2.0).abs() < 1e-6);
        assert!((stats.std[0] - 1.0).abs() < 1e-6);
        // Constant dimension has zero std; the offset keeps it finite.
        assert!((stats.std[1] - 0.0).abs() < 1e-6);

        let stats = WhiteningStats::fit(&vectors, 0.5).unwrap();
        let mut v = vec![3.0, 10.0];
        stats.apply_in_place(&mut v).unwrap();
        assert!((v[0] - 1.0 / 1.5).abs() < 1e-6);
        assert!((v[1] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn whitening_rejects_mismatched_vector() {
        let stats = WhiteningStats::fit(&[vec![0.0, 1.0]], 0.1).unwrap();
        let mut v = vec![1.0];
        assert!(stats.apply_in_place(&mut v).is_err());
    }
}
