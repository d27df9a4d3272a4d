//! Error types for patchfind.

use std::fmt;

/// Errors that can occur in the detection pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyError {
    /// Scoring was requested before the memory bank was finalized.
    NotFinalized,
    /// A training step was attempted after the bank was finalized.
    AlreadyFinalized,
    /// The embedding bank is empty (no training steps ran).
    EmptyBank,
    /// The index holds no vectors.
    EmptyIndex,
    /// Dimension mismatch between a query and the indexed vectors.
    DimensionMismatch { query_dim: usize, index_dim: usize },
    /// Feature map or grid shapes violate the builder contract.
    ShapeMismatch(String),
    /// Invalid parameter value.
    InvalidParameter(String),
    /// A stored-vector id is out of range.
    IdOutOfRange { id: u32, len: usize },
    /// Labels contain a single class, so AUROC is undefined.
    DegenerateLabels,
    /// Feature extraction failed in the external backbone.
    Extraction(String),
    /// Index persistence failed (wraps [`PersistenceError`]).
    ///
    /// [`PersistenceError`]: crate::index::persistence::PersistenceError
    Persistence(String),
}

impl fmt::Display for AnomalyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyError::NotFinalized => {
                write!(f, "detector is still collecting; call finalize() before scoring")
            }
            AnomalyError::AlreadyFinalized => {
                write!(f, "detector is finalized; training steps are no longer accepted")
            }
            AnomalyError::EmptyBank => write!(f, "embedding bank is empty"),
            AnomalyError::EmptyIndex => write!(f, "index is empty"),
            AnomalyError::DimensionMismatch { query_dim, index_dim } => write!(
                f,
                "dimension mismatch: query has {query_dim} dimensions, index stores {index_dim}",
            ),
            AnomalyError::ShapeMismatch(msg) => write!(f, "shape mismatch: {msg}"),
            AnomalyError::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            AnomalyError::IdOutOfRange { id, len } => {
                write!(f, "vector id {id} out of range for index of size {len}")
            }
            AnomalyError::DegenerateLabels => {
                write!(f, "labels contain a single class; AUROC is undefined")
            }
            AnomalyError::Extraction(msg) => write!(f, "feature extraction failed: {msg}"),
            AnomalyError::Persistence(msg) => write!(f, "persistence error: {msg}"),
        }
    }
}

impl std::error::Error for AnomalyError {}

impl From<crate::index::persistence::PersistenceError> for AnomalyError {
    fn from(e: crate::index::persistence::PersistenceError) -> Self {
        AnomalyError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnomalyError>;
