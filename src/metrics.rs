//! ROC AUC for anomaly scores.
//!
//! Both reported metrics reduce to the same computation: image-level AUROC
//! over one score per image, and pixel-level AUROC over flattened anomaly
//! maps against flattened ground-truth masks. The implementation uses the
//! rank-statistic (Mann-Whitney U) form with midrank tie correction, which
//! is exact and avoids materializing the ROC curve.
//!
//! A degenerate label distribution (all-normal or all-anomalous) makes the
//! metric undefined; that is an error for the caller to handle, never a
//! silently substituted value.

use crate::error::{AnomalyError, Result};

/// Area under the ROC curve for binary `labels` (`true` = anomalous)
/// against `scores` (higher = more anomalous).
pub fn roc_auc(labels: &[bool], scores: &[f32]) -> Result<f64> {
    if labels.len() != scores.len() {
        return Err(AnomalyError::InvalidParameter(format!(
            "{} labels vs {} scores",
            labels.len(),
            scores.len()
        )));
    }
    if labels.is_empty() {
        return Err(AnomalyError::InvalidParameter(
            "cannot compute AUROC over zero samples".to_string(),
        ));
    }
    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(AnomalyError::DegenerateLabels);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Midranks: tied scores all receive the average of their rank range.
    let mut rank_sum_pos = 0.0_f64;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; the tied block spans ranks i+1 ..= j+1.
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum_pos += midrank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    let u = rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0;
    Ok(u / (n_pos * n_neg))
}
