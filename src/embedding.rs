//! Patch embedding construction.
//!
//! Turns one or two hooked feature maps into a flat, row-major sequence of
//! per-location embedding vectors:
//!
//! 1. each map is smoothed with a 3x3, stride-1, zero-padded average pool
//!    (locally aware patch features), divisor fixed at 9;
//! 2. with two hooks, the coarser map is broadcast onto the finer grid
//!    (each coarse cell covers an s x s block of fine cells) and the two are
//!    concatenated per location along the channel axis;
//! 3. the resulting map is flattened row by row, then column by column.
//!
//! The row-major ordering is a correctness invariant: the anomaly map
//! builder reshapes patch scores back into a grid assuming exactly this
//! order.
//!
//! # References
//!
//! - Roth et al. (2022) "Towards Total Recall in Industrial Anomaly
//!   Detection" (locally aware patch features)
//! - Defard et al. (2021) "PaDiM" (multi-stage embedding concatenation)

use std::fmt;
use std::str::FromStr;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, Result};
use crate::extractor::FeatureMaps;

/// Which backbone stages are hooked for patch embeddings.
///
/// Higher stage pairs yield coarser grids. For a 224x224 input the
/// pre-resize anomaly grid sides are 56 / 28 / 14 / 7 / 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockIndex {
    /// Stages 1 and 2 (stride 4 grid).
    Stage1Plus2,
    /// Stages 2 and 3 (stride 8 grid).
    Stage2Plus3,
    /// Stages 3 and 4 (stride 16 grid).
    Stage3Plus4,
    /// Stage 4 alone (stride 32 grid).
    Stage4,
    /// Global-pool stage: a single 1x1 location.
    Stage5,
}

impl BlockIndex {
    /// Number of hooked maps this configuration expects.
    #[must_use]
    pub fn hook_count(self) -> usize {
        match self {
            BlockIndex::Stage1Plus2 | BlockIndex::Stage2Plus3 | BlockIndex::Stage3Plus4 => 2,
            BlockIndex::Stage4 | BlockIndex::Stage5 => 1,
        }
    }

    /// Downsampling stride of the finer hooked stage, if spatial.
    #[must_use]
    pub fn stride(self) -> Option<usize> {
        match self {
            BlockIndex::Stage1Plus2 => Some(4),
            BlockIndex::Stage2Plus3 => Some(8),
            BlockIndex::Stage3Plus4 => Some(16),
            BlockIndex::Stage4 => Some(32),
            BlockIndex::Stage5 => None,
        }
    }

    /// Side length of the pre-resize anomaly grid for a square input.
    #[must_use]
    pub fn grid_side(self, input_size: usize) -> usize {
        match self.stride() {
            Some(s) => input_size / s,
            None => 1,
        }
    }
}

impl FromStr for BlockIndex {
    type Err = AnomalyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1+2" => Ok(BlockIndex::Stage1Plus2),
            "2+3" => Ok(BlockIndex::Stage2Plus3),
            "3+4" => Ok(BlockIndex::Stage3Plus4),
            "4" => Ok(BlockIndex::Stage4),
            "5" => Ok(BlockIndex::Stage5),
            other => Err(AnomalyError::InvalidParameter(format!(
                "unknown block index {other:?}; expected one of 1+2, 2+3, 3+4, 4, 5"
            ))),
        }
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockIndex::Stage1Plus2 => "1+2",
            BlockIndex::Stage2Plus3 => "2+3",
            BlockIndex::Stage3Plus4 => "3+4",
            BlockIndex::Stage4 => "4",
            BlockIndex::Stage5 => "5",
        };
        f.write_str(s)
    }
}

/// 3x3, stride-1, zero-padded average pool over a channel x H x W map.
///
/// The divisor is fixed at 9 even at the border (padding zeros count),
/// matching the smoothing the memory bank was designed around.
#[must_use]
pub fn average_pool_3x3(map: &Array3<f32>) -> Array3<f32> {
    let (c, h, w) = map.dim();
    let mut out = Array3::<f32>::zeros((c, h, w));
    for ch in 0..c {
        for i in 0..h {
            for j in 0..w {
                let mut acc = 0.0_f32;
                for di in -1i64..=1 {
                    for dj in -1i64..=1 {
                        let ii = i as i64 + di;
                        let jj = j as i64 + dj;
                        if ii >= 0 && ii < h as i64 && jj >= 0 && jj < w as i64 {
                            acc += map[[ch, ii as usize, jj as usize]];
                        }
                    }
                }
                out[[ch, i, j]] = acc / 9.0;
            }
        }
    }
    out
}

fn validate_spatial(map: &Array3<f32>, what: &str) -> Result<()> {
    let (c, h, w) = map.dim();
    if c == 0 || h == 0 || w == 0 {
        return Err(AnomalyError::ShapeMismatch(format!(
            "{what} map has a zero-sized axis ({c}x{h}x{w})"
        )));
    }
    Ok(())
}

/// Build the row-major patch embedding sequence for one image.
///
/// With a two-stage hook both maps are smoothed, the coarse map is broadcast
/// onto the fine grid, and channels are concatenated per location. The fine
/// resolution must be an exact integer multiple of the coarse resolution,
/// with the same factor on both axes; anything else is rejected before any
/// pooling runs. A single-stage hook is flattened as-is.
pub fn build_patch_embeddings(maps: &FeatureMaps, block: BlockIndex) -> Result<Vec<Vec<f32>>> {
    if maps.len() != block.hook_count() {
        return Err(AnomalyError::ShapeMismatch(format!(
            "block index {block} hooks {} stage(s) but the extractor produced {} map(s)",
            block.hook_count(),
            maps.len()
        )));
    }

    if block.hook_count() == 1 {
        let map = maps.get(0)?;
        validate_spatial(map, "hooked")?;
        return Ok(flatten_row_major(map));
    }

    let fine = maps.get(0)?;
    let coarse = maps.get(1)?;
    validate_spatial(fine, "fine")?;
    validate_spatial(coarse, "coarse")?;

    let (_, h1, w1) = fine.dim();
    let (_, h2, w2) = coarse.dim();
    if h1 % h2 != 0 || w1 % w2 != 0 || h1 / h2 != w1 / w2 {
        return Err(AnomalyError::ShapeMismatch(format!(
            "fine grid {h1}x{w1} is not an integer multiple of coarse grid {h2}x{w2}"
        )));
    }
    let scale = h1 / h2;

    let fine = average_pool_3x3(fine);
    let coarse = average_pool_3x3(coarse);
    let (c1, _, _) = fine.dim();
    let (c2, _, _) = coarse.dim();

    let mut out = Vec::with_capacity(h1 * w1);
    for i in 0..h1 {
        for j in 0..w1 {
            let mut v = Vec::with_capacity(c1 + c2);
            for ch in 0..c1 {
                v.push(fine[[ch, i, j]]);
            }
            let (ci, cj) = (i / scale, j / scale);
            for ch in 0..c2 {
                v.push(coarse[[ch, ci, cj]]);
            }
            out.push(v);
        }
    }
    Ok(out)
}

/// Flatten a channel x H x W map into H*W channel vectors in row-major
/// (row, then column) order.
#[must_use]
pub fn flatten_row_major(map: &Array3<f32>) -> Vec<Vec<f32>> {
    let (c, h, w) = map.dim();
    let mut out = Vec::with_capacity(h * w);
    for i in 0..h {
        for j in 0..w {
            let mut v = Vec::with_capacity(c);
            for ch in 0..c {
                v.push(map[[ch, i, j]]);
            }
            out.push(v);
        }
    }
    out
}
