//! The patch-coreset anomaly detector.
//!
//! A detector is an explicit two-phase state machine:
//!
//! - **Collecting**: [`PatchDetector::train_step`] extracts patch embeddings
//!   from normal images and appends them to an in-memory bank. The bank is
//!   never deduplicated; its size (one vector per spatial location per
//!   image) is the main memory budget of a run.
//! - **Finalized**: [`PatchDetector::finalize`] fits the selection-time
//!   random projection, runs greedy coreset selection, optionally whitens
//!   the coreset, builds the exact L2 index, and discards the bank. From
//!   here the detector is read-only and [`PatchDetector::score`] may run.
//!
//! Calling `score` while collecting, or `train_step` once finalized, fails
//! immediately with a phase error instead of silently returning nonsense.
//!
//! # Image-level score
//!
//! The worst patch distance alone over-fires when the nearest normal patch
//! sits in a dense neighborhood of near-identical coreset members (the match
//! carries little evidence either way). The reweighting factor
//! `w = 1 - 1 / sum(exp(d_i - d_max))` over the neighborhood of the closest
//! match corrects for that local density before the max distance becomes the
//! image score.

use log::{debug, info};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::path::{Path, PathBuf};

use crate::anomaly_map;
use crate::coreset::{self, WhiteningStats};
use crate::embedding::{self, BlockIndex};
use crate::error::{AnomalyError, Result};
use crate::extractor::FeatureExtractor;
use crate::index::persistence;
use crate::index::FlatL2Index;
use crate::projection::SparseRandomProjection;

/// Detector configuration. `Default` reproduces the reference settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Fraction of the embedding bank kept as the coreset.
    pub coreset_sampling_ratio: f32,
    /// Which backbone stages are hooked.
    pub block_index: BlockIndex,
    /// Whiten the coreset (and all queries) with coreset-derived stats.
    pub whitening: bool,
    /// Stabilizing offset added to the per-dimension std when whitening.
    /// Must be strictly positive when `whitening` is set: a constant
    /// embedding dimension has zero std, and without the offset the divide
    /// would turn every patch score into NaN.
    pub whitening_offset: f32,
    /// Neighborhood size for the reweighting correction.
    pub n_neighbors: usize,
    /// Distortion tolerance for the selection-time random projection.
    pub projection_eps: f32,
    /// Side length of the (square) network input, in pixels.
    pub input_size: usize,
    /// Gaussian sigma for anomaly-map smoothing.
    pub smoothing_sigma: f32,
    /// Seed for the projection matrix and the coreset seed point.
    pub seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            coreset_sampling_ratio: 0.01,
            block_index: BlockIndex::Stage2Plus3,
            whitening: false,
            whitening_offset: 1e-2,
            n_neighbors: 9,
            projection_eps: 0.9,
            input_size: 224,
            smoothing_sigma: 4.0,
            seed: 42,
        }
    }
}

impl DetectorConfig {
    /// Validate parameter ranges once, at construction time.
    pub fn validate(&self) -> Result<()> {
        if !(self.coreset_sampling_ratio > 0.0 && self.coreset_sampling_ratio <= 1.0) {
            return Err(AnomalyError::InvalidParameter(format!(
                "coreset_sampling_ratio must be in (0, 1], got {}",
                self.coreset_sampling_ratio
            )));
        }
        if !(self.projection_eps > 0.0 && self.projection_eps < 1.0) {
            return Err(AnomalyError::InvalidParameter(format!(
                "projection_eps must be in (0, 1), got {}",
                self.projection_eps
            )));
        }
        if self.n_neighbors == 0 {
            return Err(AnomalyError::InvalidParameter(
                "n_neighbors must be at least 1".to_string(),
            ));
        }
        if self.whitening_offset < 0.0 {
            return Err(AnomalyError::InvalidParameter(format!(
                "whitening_offset must be non-negative, got {}",
                self.whitening_offset
            )));
        }
        if self.whitening && !(self.whitening_offset > 0.0) {
            return Err(AnomalyError::InvalidParameter(format!(
                "whitening_offset must be positive when whitening is enabled \
                 (a zero-variance dimension would divide by zero), got {}",
                self.whitening_offset
            )));
        }
        if self.input_size == 0 {
            return Err(AnomalyError::InvalidParameter(
                "input_size must be positive".to_string(),
            ));
        }
        if let Some(stride) = self.block_index.stride() {
            if self.input_size % stride != 0 {
                return Err(AnomalyError::InvalidParameter(format!(
                    "input_size {} is not a multiple of the block stride {}",
                    self.input_size, stride
                )));
            }
        }
        Ok(())
    }
}

/// Summary of a finalization pass, for logging and diagnostics.
#[derive(Debug, Clone)]
pub struct FinalizeSummary {
    /// Bank size before selection.
    pub bank_size: usize,
    /// Coreset size after selection.
    pub coreset_size: usize,
    /// Embedding dimensionality (stored vectors).
    pub embedding_dim: usize,
    /// Dimensionality of the selection-time projected space.
    pub projected_dim: usize,
    /// Covering radius achieved in projected space.
    pub covering_radius: f32,
}

/// Scoring output for one test image.
#[derive(Debug, Clone)]
pub struct ImageScore {
    /// Image-level anomaly score: `reweighting * max_dist_score`.
    pub score: f32,
    /// Maximum per-patch nearest-neighbor distance.
    pub max_dist_score: f32,
    /// Mean per-patch nearest-neighbor distance (simplified alternative
    /// image score; reported, never used for `score`).
    pub mean_dist_score: f32,
    /// Neighborhood reweighting factor `w`.
    pub reweighting: f32,
    /// Per-patch distances in the row-major grid order.
    pub score_patches: Vec<f32>,
    /// Smoothed per-pixel anomaly map at input resolution.
    pub anomaly_map: Array2<f32>,
}

enum Phase {
    Collecting {
        bank: Vec<Vec<f32>>,
    },
    Finalized {
        index: FlatL2Index,
        whitening: Option<WhiteningStats>,
    },
}

/// Patch-coreset anomaly detector over a frozen feature extractor.
pub struct PatchDetector<E> {
    extractor: E,
    config: DetectorConfig,
    phase: Phase,
}

impl<E: FeatureExtractor> PatchDetector<E> {
    /// Create a detector in the collecting phase.
    pub fn new(extractor: E, config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor,
            config,
            phase: Phase::Collecting { bank: Vec::new() },
        })
    }

    /// Load a finalized detector from the persisted index for `category`.
    pub fn load(extractor: E, config: DetectorConfig, dir: &Path, category: &str) -> Result<Self> {
        config.validate()?;
        let (index, whitening) = persistence::load_index(dir, category)?;
        Ok(Self {
            extractor,
            config,
            phase: Phase::Finalized { index, whitening },
        })
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        matches!(self.phase, Phase::Finalized { .. })
    }

    /// Number of embeddings collected so far (collecting phase only).
    #[must_use]
    pub fn bank_len(&self) -> usize {
        match &self.phase {
            Phase::Collecting { bank } => bank.len(),
            Phase::Finalized { .. } => 0,
        }
    }

    /// The built index (finalized phase only).
    pub fn index(&self) -> Result<&FlatL2Index> {
        match &self.phase {
            Phase::Finalized { index, .. } => Ok(index),
            Phase::Collecting { .. } => Err(AnomalyError::NotFinalized),
        }
    }

    /// Extract patch embeddings from a normal training image and append
    /// them to the bank. Returns the number of patches added.
    pub fn train_step(&mut self, image: &Array3<f32>) -> Result<usize> {
        let bank = match &mut self.phase {
            Phase::Collecting { bank } => bank,
            Phase::Finalized { .. } => return Err(AnomalyError::AlreadyFinalized),
        };
        let maps = self.extractor.extract(image)?;
        let mut patches = embedding::build_patch_embeddings(&maps, self.config.block_index)?;
        if let Some(first) = bank.first() {
            if patches.first().map(Vec::len) != Some(first.len()) {
                return Err(AnomalyError::DimensionMismatch {
                    query_dim: patches.first().map_or(0, Vec::len),
                    index_dim: first.len(),
                });
            }
        }
        let added = patches.len();
        bank.append(&mut patches);
        debug!("train step: +{} patches, bank size {}", added, bank.len());
        Ok(added)
    }

    /// Run coreset selection over the collected bank, build the index, and
    /// transition to the finalized phase. The bank is discarded.
    pub fn finalize(&mut self) -> Result<FinalizeSummary> {
        let bank = match &mut self.phase {
            Phase::Collecting { bank } => std::mem::take(bank),
            Phase::Finalized { .. } => return Err(AnomalyError::AlreadyFinalized),
        };
        if bank.is_empty() {
            // Stay in the collecting phase so more training steps can run.
            self.phase = Phase::Collecting { bank };
            return Err(AnomalyError::EmptyBank);
        }

        let n = bank.len();
        let dim = bank[0].len();
        let n_select = coreset::selection_size(n, self.config.coreset_sampling_ratio)?;

        let projection =
            SparseRandomProjection::fit(n, dim, self.config.projection_eps, self.config.seed)?;
        let projected = projection.transform_all(&bank)?;

        let seed_index = (self.config.seed as usize) % n;
        let selection = coreset::select_coreset(&projected, n_select, seed_index)?;

        let mut selected: Vec<Vec<f32>> = selection
            .indices
            .iter()
            .map(|&i| bank[i].clone())
            .collect();
        drop(bank);

        let whitening = if self.config.whitening {
            let stats = WhiteningStats::fit(&selected, self.config.whitening_offset)?;
            for v in &mut selected {
                stats.apply_in_place(v)?;
            }
            Some(stats)
        } else {
            None
        };

        let mut index = FlatL2Index::new(dim)?;
        for v in &selected {
            index.add(v)?;
        }

        let summary = FinalizeSummary {
            bank_size: n,
            coreset_size: index.len(),
            embedding_dim: dim,
            projected_dim: projection.output_dim(),
            covering_radius: selection.covering_radius,
        };
        info!(
            "bank finalized: {} -> {} embeddings ({} dims, projected {} dims, radius {:.4})",
            summary.bank_size,
            summary.coreset_size,
            summary.embedding_dim,
            summary.projected_dim,
            summary.covering_radius
        );
        self.phase = Phase::Finalized { index, whitening };
        Ok(summary)
    }

    /// Score one test image against the finalized coreset.
    pub fn score(&self, image: &Array3<f32>) -> Result<ImageScore> {
        let (index, whitening) = match &self.phase {
            Phase::Finalized { index, whitening } => (index, whitening),
            Phase::Collecting { .. } => return Err(AnomalyError::NotFinalized),
        };

        let maps = self.extractor.extract(image)?;
        let mut patches = embedding::build_patch_embeddings(&maps, self.config.block_index)?;
        if let Some(stats) = whitening {
            for p in &mut patches {
                stats.apply_in_place(p)?;
            }
        }

        // k=1 distance per patch; sqrt turns faiss-style squared distances
        // into true distances.
        let mut score_patches = Vec::with_capacity(patches.len());
        let mut nearest_ids = Vec::with_capacity(patches.len());
        for p in &patches {
            let hit = index.search(p, 1)?;
            let (id, d2) = hit[0];
            score_patches.push(d2.sqrt());
            nearest_ids.push(id);
        }

        let (max_idx, max_dist_score) = score_patches
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, s)| {
                if s > best.1 {
                    (i, s)
                } else {
                    best
                }
            });
        let mean_dist_score =
            score_patches.iter().sum::<f32>() / score_patches.len() as f32;

        let anomaly_max_feature = &patches[max_idx];
        let nearest_patch_feature = index.reconstruct(nearest_ids[max_idx])?.to_vec();

        // Neighborhood of the closest match; distances measured from the
        // worst patch to each reconstructed member. Equivalent to the
        // throwaway-index formulation, without the index.
        let k = self.config.n_neighbors.min(index.len());
        let neighborhood = index.search(&nearest_patch_feature, k)?;
        let mut neighbor_distances: SmallVec<[f32; 16]> = SmallVec::new();
        for (id, _) in neighborhood {
            let member = index.reconstruct(id)?;
            neighbor_distances.push(crate::distance::l2_distance(anomaly_max_feature, member));
        }

        let reweighting = reweighting_factor(&neighbor_distances, max_dist_score);
        let score = reweighting * max_dist_score;

        let side = self.config.block_index.grid_side(self.config.input_size);
        let map = anomaly_map::build_anomaly_map(
            &score_patches,
            side,
            self.config.input_size,
            self.config.smoothing_sigma,
        )?;

        debug!(
            "scored image: max {:.4}, mean {:.4}, w {:.4}, score {:.4}",
            max_dist_score, mean_dist_score, reweighting, score
        );
        Ok(ImageScore {
            score,
            max_dist_score,
            mean_dist_score,
            reweighting,
            score_patches,
            anomaly_map: map,
        })
    }

    /// Persist the finalized index (with whitening stats) for `category`.
    pub fn save(&self, dir: &Path, category: &str) -> Result<PathBuf> {
        match &self.phase {
            Phase::Finalized { index, whitening } => {
                Ok(persistence::save_index(dir, category, index, whitening.as_ref())?)
            }
            Phase::Collecting { .. } => Err(AnomalyError::NotFinalized),
        }
    }
}

/// Neighborhood reweighting factor `w = 1 - 1 / sum(exp(d_i - d_max))`.
///
/// `d_max` is the worst patch's nearest-neighbor distance; `d_i` are the
/// distances from that patch to the coreset members around its closest
/// match, so `d_i >= d_max` and the sum is at least 1. A uniquely close
/// match (all other neighbors far) drives `w` toward 1; an empty
/// neighborhood degenerates to 1 (no correction).
#[must_use]
pub fn reweighting_factor(neighbor_distances: &[f32], max_dist_score: f32) -> f32 {
    if neighbor_distances.is_empty() {
        return 1.0;
    }
    let sum: f32 = neighbor_distances
        .iter()
        .map(|&d| (d - max_dist_score).exp())
        .sum();
    1.0 - 1.0 / sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reweighting_is_zero_for_a_lone_exact_neighbor() {
        // One neighbor at exactly the max distance: sum = 1, w = 0.
        let w = reweighting_factor(&[2.5], 2.5);
        assert!(w.abs() < 1e-6);
    }

    #[test]
    fn reweighting_approaches_one_for_distant_neighbors() {
        let w = reweighting_factor(&[1.0, 3.0, 3.0, 3.0], 1.0);
        assert!(w > 0.0 && w < 1.0);
        let w_far = reweighting_factor(&[1.0, 9.0, 9.0, 9.0], 1.0);
        assert!(w_far > w);
        assert!((w_far - 1.0).abs() < 1e-3);
    }

    #[test]
    fn reweighting_stays_in_unit_interval_for_valid_neighborhoods() {
        // First neighbor at the max distance, the rest at or beyond it.
        let cases: &[&[f32]] = &[
            &[1.0, 1.0, 1.0],
            &[2.0, 2.0, 5.0],
            &[0.5, 0.6, 0.7, 10.0],
        ];
        for distances in cases {
            let max = distances[0];
            let w = reweighting_factor(distances, max);
            assert!((0.0..1.0).contains(&w), "w = {w} for {distances:?}");
        }
    }

    #[test]
    fn empty_neighborhood_means_no_correction() {
        assert_eq!(reweighting_factor(&[], 3.0), 1.0);
    }

    #[test]
    fn config_validation_catches_bad_ranges() {
        let mut config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        config.coreset_sampling_ratio = 0.0;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.projection_eps = 1.0;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.n_neighbors = 0;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig {
            input_size: 225,
            ..DetectorConfig::default()
        };
        assert!(config.validate().is_err());
        config.input_size = 224;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn whitening_requires_a_positive_offset() {
        // A zero offset is fine while whitening is off, but enabling
        // whitening with it would divide by zero on any constant dimension.
        let mut config = DetectorConfig {
            whitening_offset: 0.0,
            ..DetectorConfig::default()
        };
        assert!(config.validate().is_ok());
        config.whitening = true;
        assert!(config.validate().is_err());
        config.whitening_offset = 1e-2;
        assert!(config.validate().is_ok());
        config.whitening_offset = -1.0;
        assert!(config.validate().is_err());
    }
}
