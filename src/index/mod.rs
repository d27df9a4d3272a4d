//! Exact L2 nearest-neighbor index over the coreset.
//!
//! Brute-force search over a flat `Vec<f32>` store (structure-of-arrays, no
//! per-vector allocation). The coreset is small by construction — a few
//! percent of the bank — so exact search is both simplest and fast enough;
//! approximate structures only pay off at far larger scales.
//!
//! The index is write-once: vectors are added during training finalization
//! and the structure is read-only at test time. `search` returns **squared**
//! L2 distances in ascending order; callers take the square root where a
//! true distance is reported. `reconstruct` returns the exact stored vector
//! for an id, which the persistence layer must round-trip losslessly.

pub mod persistence;

use crate::error::{AnomalyError, Result};
use crate::simd;

/// Exact (brute-force) squared-L2 index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    vectors: Vec<f32>,
    dimension: usize,
    num_vectors: usize,
}

impl FlatL2Index {
    /// Create an empty index for vectors of `dimension` dimensions.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(AnomalyError::InvalidParameter(
                "index dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            vectors: Vec::new(),
            dimension,
            num_vectors: 0,
        })
    }

    /// Rebuild an index from its raw parts (persistence path).
    pub(crate) fn from_parts(dimension: usize, vectors: Vec<f32>) -> Result<Self> {
        if dimension == 0 || vectors.len() % dimension != 0 {
            return Err(AnomalyError::InvalidParameter(format!(
                "flat storage of {} floats is not a multiple of dimension {}",
                vectors.len(),
                dimension
            )));
        }
        let num_vectors = vectors.len() / dimension;
        Ok(Self {
            vectors,
            dimension,
            num_vectors,
        })
    }

    /// Append a vector; returns its assigned id.
    pub fn add(&mut self, vector: &[f32]) -> Result<u32> {
        if vector.len() != self.dimension {
            return Err(AnomalyError::DimensionMismatch {
                query_dim: vector.len(),
                index_dim: self.dimension,
            });
        }
        self.vectors.extend_from_slice(vector);
        let id = self.num_vectors as u32;
        self.num_vectors += 1;
        Ok(id)
    }

    /// k nearest stored vectors to `query`, as `(id, squared_distance)` in
    /// ascending distance order. Ties break toward the smaller id. Returns
    /// at most `len()` results.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        if self.num_vectors == 0 {
            return Err(AnomalyError::EmptyIndex);
        }
        if k == 0 {
            return Err(AnomalyError::InvalidParameter(
                "search requires k >= 1".to_string(),
            ));
        }
        if query.len() != self.dimension {
            return Err(AnomalyError::DimensionMismatch {
                query_dim: query.len(),
                index_dim: self.dimension,
            });
        }

        let mut hits: Vec<(u32, f32)> = (0..self.num_vectors)
            .map(|i| (i as u32, simd::l2_distance_squared(query, self.vector(i))))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits.truncate(k.min(self.num_vectors));
        Ok(hits)
    }

    /// Exact retrieval of a stored vector by id.
    pub fn reconstruct(&self, id: u32) -> Result<&[f32]> {
        let i = id as usize;
        if i >= self.num_vectors {
            return Err(AnomalyError::IdOutOfRange {
                id,
                len: self.num_vectors,
            });
        }
        Ok(self.vector(i))
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_vectors
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_vectors == 0
    }

    /// Vector dimensionality.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Approximate heap footprint of the stored vectors.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.vectors.len() * std::mem::size_of::<f32>()
    }

    #[inline]
    fn vector(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimension..(i + 1) * self.dimension]
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }
}
