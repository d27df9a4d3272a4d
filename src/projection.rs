//! Sparse random projection for coreset selection.
//!
//! Greedy k-center selection runs O(n*k) distance evaluations over the full
//! embedding bank, so selection happens in a compressed space: a sparse
//! random linear map whose output dimensionality is chosen automatically
//! from the Johnson-Lindenstrauss bound so that pairwise distances are
//! preserved within a distortion tolerance `eps`.
//!
//! The projection is a selection-time distance proxy only. The coreset
//! stores the original high-dimensional vectors, and the projection is
//! never persisted.
//!
//! # References
//!
//! - Achlioptas (2003) "Database-friendly random projections"
//! - Li, Hastie, Church (2006) "Very sparse random projections"

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{AnomalyError, Result};

/// Minimum output dimensionality that preserves pairwise distances of
/// `n_samples` points within distortion `eps`, per the JL lemma:
/// `4 ln n / (eps^2 / 2 - eps^3 / 3)`.
pub fn johnson_lindenstrauss_min_dim(n_samples: usize, eps: f32) -> Result<usize> {
    if !(0.0..1.0).contains(&eps) || eps <= 0.0 {
        return Err(AnomalyError::InvalidParameter(format!(
            "JL distortion eps must be in (0, 1), got {eps}"
        )));
    }
    if n_samples == 0 {
        return Err(AnomalyError::InvalidParameter(
            "JL bound requires at least one sample".to_string(),
        ));
    }
    let eps = f64::from(eps);
    let denom = eps * eps / 2.0 - eps * eps * eps / 3.0;
    let dim = (4.0 * (n_samples as f64).ln() / denom).ceil();
    Ok((dim as usize).max(1))
}

/// One output component of the sparse projection: the input coordinates it
/// reads and the signed weight applied to each.
type SparseRow = Vec<(u32, f32)>;

/// A fitted sparse random projection.
///
/// Nonzero density is `1/sqrt(d_in)`; nonzero entries take the values
/// `+-sqrt(1/density) / sqrt(d_out)` with equal probability. The matrix is
/// stored row-sparse so `transform` touches only the nonzeros.
#[derive(Debug, Clone)]
pub struct SparseRandomProjection {
    input_dim: usize,
    rows: Vec<SparseRow>,
}

impl SparseRandomProjection {
    /// Fit a projection for a bank of `n_samples` vectors of `input_dim`
    /// dimensions. The output dimensionality is the JL bound for
    /// (`n_samples`, `eps`), capped at `input_dim` (projecting up would not
    /// compress anything).
    pub fn fit(n_samples: usize, input_dim: usize, eps: f32, seed: u64) -> Result<Self> {
        if input_dim == 0 {
            return Err(AnomalyError::InvalidParameter(
                "projection input dimensionality must be positive".to_string(),
            ));
        }
        let output_dim = johnson_lindenstrauss_min_dim(n_samples, eps)?.min(input_dim);

        let density = 1.0 / (input_dim as f64).sqrt();
        let magnitude = ((1.0 / density) / output_dim as f64).sqrt() as f32;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(output_dim);
        for _ in 0..output_dim {
            let mut row: SparseRow = Vec::new();
            for col in 0..input_dim {
                if rng.gen::<f64>() < density {
                    let value = if rng.gen::<bool>() { magnitude } else { -magnitude };
                    row.push((col as u32, value));
                }
            }
            rows.push(row);
        }
        Ok(Self { input_dim, rows })
    }

    /// Dimensionality of projected vectors.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.rows.len()
    }

    /// Dimensionality the projection was fitted for.
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Project one vector into the compressed space.
    pub fn transform(&self, v: &[f32]) -> Result<Vec<f32>> {
        if v.len() != self.input_dim {
            return Err(AnomalyError::DimensionMismatch {
                query_dim: v.len(),
                index_dim: self.input_dim,
            });
        }
        let mut out = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut acc = 0.0_f32;
            for &(col, weight) in row {
                acc += v[col as usize] * weight;
            }
            out.push(acc);
        }
        Ok(out)
    }

    /// Project a whole bank.
    pub fn transform_all(&self, bank: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        bank.iter().map(|v| self.transform(v)).collect()
    }
}
