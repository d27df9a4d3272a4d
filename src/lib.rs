//! patchfind: visual anomaly detection by coreset nearest-neighbor search.
//!
//! A test image is anomalous where its deep-feature patch embeddings sit far
//! from a memory bank of "normal" patch embeddings collected in one training
//! pass. Nothing is trained at the backbone: the method is non-parametric
//! end to end.
//!
//! Pipeline:
//!
//! - `extractor`: seam for the frozen backbone (two hookable stages)
//! - `embedding`: pool + align hooked maps into row-major patch embeddings
//! - `projection`: sparse random projection guiding coreset selection
//! - `coreset`: greedy farthest-point sampling + optional whitening
//! - `index`: exact L2 search over the coreset, persisted per category
//! - `scorer`: two-phase detector with the reweighted image score
//! - `anomaly_map`: patch scores -> smoothed per-pixel map
//! - `metrics` / `eval`: AUROC and batch drivers
//!
//! # Critical nuances
//!
//! - **Ordering invariant**: patch embeddings are flattened row-major and
//!   the anomaly-map reshape assumes exactly that order. Everything between
//!   the embedding builder and the map builder must preserve the sequence.
//! - **Memory model**: the bank is accumulated fully in memory before one
//!   coreset pass at the end of training — not streaming. One vector per
//!   spatial location per image is the budget to plan for.
//! - **Write-once state**: the coreset and index are built once per category
//!   and read-only afterward, so test steps need no synchronization.
//! - **Squared distances**: the index returns squared L2 (compare cheap,
//!   sqrt late); reported patch scores are true distances.
//!
//! # Example
//!
//! ```no_run
//! use ndarray::Array3;
//! use patchfind::{DetectorConfig, FeatureExtractor, FeatureMaps, PatchDetector, Result};
//!
//! struct Backbone; // wraps the frozen network
//!
//! impl FeatureExtractor for Backbone {
//!     fn extract(&self, _image: &Array3<f32>) -> Result<FeatureMaps> {
//!         unimplemented!("hook two intermediate stages")
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let mut detector = PatchDetector::new(Backbone, DetectorConfig::default())?;
//!     for image in Vec::<Array3<f32>>::new() {
//!         detector.train_step(&image)?;
//!     }
//!     detector.finalize()?;
//!     detector.save("banks".as_ref(), "bottle")?;
//!     Ok(())
//! }
//! ```

pub mod anomaly_map;
pub mod coreset;
pub mod distance;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod extractor;
pub mod index;
pub mod metrics;
pub mod projection;
pub mod scorer;
pub mod simd;

pub use embedding::BlockIndex;
pub use error::{AnomalyError, Result};
pub use extractor::{FeatureExtractor, FeatureMaps};
pub use index::FlatL2Index;
pub use scorer::{DetectorConfig, FinalizeSummary, ImageScore, PatchDetector};
