//! Pixel-level anomaly map reconstruction.
//!
//! Per-patch scores come out of the scorer as a flat row-major sequence;
//! this module folds them back into the 2D grid the patch embeddings were
//! read from, upsamples the grid to the network input resolution with
//! bilinear interpolation (half-pixel centers, the OpenCV convention), and
//! smooths the result with a separable Gaussian (reflect boundary,
//! radius = 4 sigma) to suppress patch-boundary artifacts.
//!
//! The grid side depends only on the hooked stage pair, e.g. a "3+4" hook
//! on a 224 input yields a 14x14 grid.

use ndarray::Array2;

use crate::error::{AnomalyError, Result};

/// Reshape flat row-major patch scores into a `side x side` grid.
pub fn patch_score_grid(scores: &[f32], side: usize) -> Result<Array2<f32>> {
    if side == 0 || scores.len() != side * side {
        return Err(AnomalyError::ShapeMismatch(format!(
            "{} patch scores cannot fill a {side}x{side} grid",
            scores.len()
        )));
    }
    Ok(Array2::from_shape_vec((side, side), scores.to_vec())
        .expect("length checked against side * side"))
}

/// Bilinear resize with half-pixel centers.
#[must_use]
pub fn resize_bilinear(map: &Array2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (h, w) = map.dim();
    let mut out = Array2::<f32>::zeros((out_h, out_w));
    if h == 0 || w == 0 || out_h == 0 || out_w == 0 {
        return out;
    }
    let sy = h as f32 / out_h as f32;
    let sx = w as f32 / out_w as f32;
    for oy in 0..out_h {
        let fy = ((oy as f32 + 0.5) * sy - 0.5).max(0.0);
        let y0 = (fy as usize).min(h - 1);
        let y1 = (y0 + 1).min(h - 1);
        let ty = fy - y0 as f32;
        for ox in 0..out_w {
            let fx = ((ox as f32 + 0.5) * sx - 0.5).max(0.0);
            let x0 = (fx as usize).min(w - 1);
            let x1 = (x0 + 1).min(w - 1);
            let tx = fx - x0 as f32;

            let top = map[[y0, x0]] * (1.0 - tx) + map[[y0, x1]] * tx;
            let bottom = map[[y1, x0]] * (1.0 - tx) + map[[y1, x1]] * tx;
            out[[oy, ox]] = top * (1.0 - ty) + bottom * ty;
        }
    }
    out
}

/// Reflect an out-of-range index into `0..len` ((d c b a | a b c d | d c b a)).
fn reflect(mut i: i64, len: i64) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * len;
    i = i.rem_euclid(period);
    if i >= len {
        i = period - 1 - i;
    }
    i as usize
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    // Radius follows the SciPy default truncation of 4 standard deviations.
    let radius = (4.0 * sigma + 0.5) as i64;
    let mut kernel = Vec::with_capacity(2 * radius as usize + 1);
    for i in -radius..=radius {
        let x = i as f32 / sigma;
        kernel.push((-0.5 * x * x).exp());
    }
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian smoothing with a reflected boundary.
#[must_use]
pub fn gaussian_smooth(map: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return map.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let (h, w) = map.dim();

    // Horizontal pass, then vertical.
    let mut tmp = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0_f32;
            for (k, &weight) in kernel.iter().enumerate() {
                let sx = reflect(x as i64 + k as i64 - radius, w as i64);
                acc += map[[y, sx]] * weight;
            }
            tmp[[y, x]] = acc;
        }
    }
    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0_f32;
            for (k, &weight) in kernel.iter().enumerate() {
                let sy = reflect(y as i64 + k as i64 - radius, h as i64);
                acc += tmp[[sy, x]] * weight;
            }
            out[[y, x]] = acc;
        }
    }
    out
}

/// Full map pipeline: reshape, resize to `output_size`, smooth.
pub fn build_anomaly_map(
    scores: &[f32],
    side: usize,
    output_size: usize,
    sigma: f32,
) -> Result<Array2<f32>> {
    let grid = patch_score_grid(scores, side)?;
    let resized = resize_bilinear(&grid, output_size, output_size);
    Ok(gaussian_smooth(&resized, sigma))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_reshape_is_row_major() {
        let grid = patch_score_grid(&[1.0, 2.0, 3.0, 4.0], 2).unwrap();
        assert_eq!(grid[[0, 0]], 1.0);
        assert_eq!(grid[[0, 1]], 2.0);
        assert_eq!(grid[[1, 0]], 3.0);
        assert_eq!(grid[[1, 1]], 4.0);
    }

    #[test]
    fn grid_reshape_rejects_wrong_length() {
        assert!(patch_score_grid(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(patch_score_grid(&[], 0).is_err());
    }

    #[test]
    fn resize_preserves_constant_maps() {
        let map = Array2::<f32>::from_elem((3, 3), 2.5);
        let out = resize_bilinear(&map, 12, 12);
        assert_eq!(out.dim(), (12, 12));
        for v in out.iter() {
            assert!((v - 2.5).abs() < 1e-6);
        }
    }

    #[test]
    fn resize_from_single_cell_broadcasts() {
        let mut map = Array2::<f32>::zeros((1, 1));
        map[[0, 0]] = 7.0;
        let out = resize_bilinear(&map, 4, 4);
        for v in out.iter() {
            assert!((v - 7.0).abs() < 1e-6);
        }
    }

    #[test]
    fn resize_interpolates_between_cells() {
        let mut map = Array2::<f32>::zeros((1, 2));
        map[[0, 1]] = 1.0;
        let out = resize_bilinear(&map, 1, 4);
        // Half-pixel centers: outputs at source coords -0.25, 0.25, 0.75, 1.25.
        assert!((out[[0, 0]] - 0.0).abs() < 1e-6);
        assert!((out[[0, 1]] - 0.25).abs() < 1e-6);
        assert!((out[[0, 2]] - 0.75).abs() < 1e-6);
        assert!((out[[0, 3]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn smoothing_preserves_total_mass_of_constant_map() {
        let map = Array2::<f32>::from_elem((8, 8), 3.0);
        let out = gaussian_smooth(&map, 2.0);
        for v in out.iter() {
            assert!((v - 3.0).abs() < 1e-4);
        }
    }

    #[test]
    fn smoothing_spreads_a_spike() {
        let mut map = Array2::<f32>::zeros((9, 9));
        map[[4, 4]] = 1.0;
        let out = gaussian_smooth(&map, 1.0);
        assert!(out[[4, 4]] < 1.0);
        assert!(out[[4, 5]] > 0.0);
        // The peak stays at the spike.
        let peak = out.iter().cloned().fold(f32::MIN, f32::max);
        assert!((out[[4, 4]] - peak).abs() < 1e-6);
    }

    #[test]
    fn zero_sigma_is_identity() {
        let mut map = Array2::<f32>::zeros((2, 2));
        map[[0, 1]] = 5.0;
        assert_eq!(gaussian_smooth(&map, 0.0), map);
    }

    #[test]
    fn reflect_indexing() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(2, 4), 2);
        assert_eq!(reflect(-3, 1), 0);
    }

    #[test]
    fn full_pipeline_upsamples_to_output_size() {
        let scores: Vec<f32> = (0..196).map(|i| i as f32).collect();
        let map = build_anomaly_map(&scores, 14, 224, 4.0).unwrap();
        assert_eq!(map.dim(), (224, 224));
    }
}
