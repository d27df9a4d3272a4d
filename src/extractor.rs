//! Frozen backbone seam.
//!
//! The pretrained convolutional network is an external collaborator: the
//! pipeline never models its layer graph, it only consumes the activations
//! hooked at one or two intermediate stages. Any backbone that can produce
//! tensors at the documented channel/spatial shapes satisfies the contract,
//! which keeps the detector testable with purely synthetic extractors.

use ndarray::Array3;

use crate::error::{AnomalyError, Result};

/// Hooked activations for a single image, finest spatial resolution first.
///
/// Each map is channel x height x width. With two hooks the first map must
/// be the higher-resolution (earlier) stage; the embedding builder broadcasts
/// the second map onto the first map's grid.
#[derive(Debug, Clone)]
pub struct FeatureMaps {
    maps: Vec<Array3<f32>>,
}

impl FeatureMaps {
    /// Feature maps for a single-stage hook.
    pub fn single(map: Array3<f32>) -> Self {
        Self { maps: vec![map] }
    }

    /// Feature maps for a two-stage hook, finest first.
    pub fn pair(fine: Array3<f32>, coarse: Array3<f32>) -> Self {
        Self { maps: vec![fine, coarse] }
    }

    pub fn maps(&self) -> &[Array3<f32>] {
        &self.maps
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// The map at `i`, or a shape error naming the missing hook.
    pub(crate) fn get(&self, i: usize) -> Result<&Array3<f32>> {
        self.maps.get(i).ok_or_else(|| {
            AnomalyError::ShapeMismatch(format!(
                "expected feature map for hook {i}, extractor produced {}",
                self.maps.len()
            ))
        })
    }
}

/// A frozen feature extractor exposing intermediate activations.
///
/// Implementations wrap whatever inference runtime hosts the backbone; the
/// detector only requires that `extract` is deterministic for a fixed input
/// and that map shapes are constant across a run.
pub trait FeatureExtractor {
    /// Run the backbone on one image (channel x height x width) and return
    /// the hooked activations.
    fn extract(&self, image: &Array3<f32>) -> Result<FeatureMaps>;
}
