//! Batch training and evaluation drivers.
//!
//! Thin orchestration over [`PatchDetector`]: a training pass consumes a
//! stream of normal images and finalizes the bank once at the end; an
//! evaluation pass scores test images one at a time (each step independent,
//! sharing only read-only index state) and reports image-level and
//! pixel-level AUROC on completion. Dataset loading, augmentation, and
//! artifact writing live with the caller.

use log::info;
use ndarray::{Array2, Array3};

use crate::error::{AnomalyError, Result};
use crate::extractor::FeatureExtractor;
use crate::metrics::roc_auc;
use crate::scorer::{FinalizeSummary, PatchDetector};

/// One training batch item: a normal image, channel x height x width.
#[derive(Debug, Clone)]
pub struct TrainSample {
    pub image: Array3<f32>,
}

/// One test batch item.
#[derive(Debug, Clone)]
pub struct TestSample {
    /// Input image, channel x height x width.
    pub image: Array3<f32>,
    /// Ground-truth anomaly mask at input resolution; values > 0.5 mark
    /// anomalous pixels.
    pub mask: Array2<f32>,
    /// Image-level ground truth (`true` = anomalous).
    pub label: bool,
    /// Source file name, carried through for reporting.
    pub name: String,
    /// Defect type (e.g. "good", "scratch"), carried through for reporting.
    pub kind: String,
}

/// Per-image evaluation output.
#[derive(Debug, Clone)]
pub struct ImageResult {
    pub name: String,
    pub kind: String,
    pub label: bool,
    /// Reweighted image-level anomaly score.
    pub score: f32,
    /// Smoothed per-pixel anomaly map at input resolution.
    pub anomaly_map: Array2<f32>,
}

/// Evaluation pass output.
#[derive(Debug, Clone)]
pub struct EvalReport {
    pub results: Vec<ImageResult>,
    /// AUROC over image-level scores.
    pub image_auroc: f64,
    /// AUROC over flattened anomaly maps vs. flattened masks.
    pub pixel_auroc: f64,
}

/// Run one full training pass: sequential train steps, then finalization.
pub fn run_training<E, I>(detector: &mut PatchDetector<E>, samples: I) -> Result<FinalizeSummary>
where
    E: FeatureExtractor,
    I: IntoIterator<Item = TrainSample>,
{
    let mut images = 0usize;
    for sample in samples {
        detector.train_step(&sample.image)?;
        images += 1;
    }
    let summary = detector.finalize()?;
    info!(
        "training pass complete: {} images, coreset {} of {}",
        images, summary.coreset_size, summary.bank_size
    );
    Ok(summary)
}

/// Score every test sample and compute both AUROC metrics.
///
/// Each mask must match the detector's input resolution; a mismatch aborts
/// the pass. Metric errors (e.g. an all-normal test set) propagate.
pub fn run_evaluation<E, I>(detector: &PatchDetector<E>, samples: I) -> Result<EvalReport>
where
    E: FeatureExtractor,
    I: IntoIterator<Item = TestSample>,
{
    let input_size = detector.config().input_size;

    let mut results = Vec::new();
    let mut image_labels = Vec::new();
    let mut image_scores = Vec::new();
    let mut pixel_labels = Vec::new();
    let mut pixel_scores = Vec::new();

    for sample in samples {
        if sample.mask.dim() != (input_size, input_size) {
            return Err(AnomalyError::ShapeMismatch(format!(
                "mask for {:?} is {:?}, expected {}x{}",
                sample.name,
                sample.mask.dim(),
                input_size,
                input_size
            )));
        }
        let scored = detector.score(&sample.image)?;

        image_labels.push(sample.label);
        image_scores.push(scored.score);
        for (&gt, &pred) in sample.mask.iter().zip(scored.anomaly_map.iter()) {
            pixel_labels.push(gt > 0.5);
            pixel_scores.push(pred);
        }
        results.push(ImageResult {
            name: sample.name,
            kind: sample.kind,
            label: sample.label,
            score: scored.score,
            anomaly_map: scored.anomaly_map,
        });
    }

    let image_auroc = roc_auc(&image_labels, &image_scores)?;
    let pixel_auroc = roc_auc(&pixel_labels, &pixel_scores)?;
    info!(
        "evaluation complete: {} images, image AUROC {:.4}, pixel AUROC {:.4}",
        results.len(),
        image_auroc,
        pixel_auroc
    );
    Ok(EvalReport {
        results,
        image_auroc,
        pixel_auroc,
    })
}
