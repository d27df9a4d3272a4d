//! On-disk index blobs, one per category.
//!
//! # File layout
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Magic bytes (4B): "PFIX"                 │
//! │ Format version (4B, LE u32)              │
//! │ Body length (8B, LE u64)                 │
//! ├──────────────────────────────────────────┤
//! │ Body (postcard):                         │
//! │   - dimension, vector count              │
//! │   - raw f32 vectors (bit-exact)          │
//! │   - optional whitening stats             │
//! ├──────────────────────────────────────────┤
//! │ CRC32 of body (4B, LE u32)               │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The body is opaque to everything outside this module; the only promise is
//! that `add` / `search` / `reconstruct` behave identically after a reload,
//! which requires bit-exact vector round-trips. Wrong magic, an unsupported
//! version, or a checksum mismatch are distinct errors; there is no recovery
//! path, a corrupt blob aborts the run for that category.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::FlatL2Index;
use crate::coreset::WhiteningStats;

/// Magic bytes for index blob files.
pub const INDEX_MAGIC: [u8; 4] = *b"PFIX";

/// Current blob format version.
pub const FORMAT_VERSION: u32 = 1;

/// File extension for persisted indexes.
pub const INDEX_EXTENSION: &str = "anidx";

/// Errors that can occur while persisting or loading an index blob.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error (file operations, disk I/O)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Format error (bad magic bytes, truncated file)
    #[error("format error: {0}")]
    Format(String),

    /// Blob was written by an unsupported format version
    #[error("unsupported format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Serialization error (postcard)
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checksum mismatch (data corruption detected)
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Blob content is internally inconsistent
    #[error("invalid blob: {0}")]
    InvalidBlob(String),
}

impl From<postcard::Error> for PersistenceError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(format!("postcard error: {e}"))
    }
}

#[derive(Serialize, Deserialize)]
struct IndexBlob {
    dimension: u32,
    count: u32,
    vectors: Vec<f32>,
    whitening: Option<WhiteningStats>,
}

/// Path of the blob file for `category` under `dir`.
#[must_use]
pub fn index_path(dir: &Path, category: &str) -> PathBuf {
    dir.join(format!("{category}.{INDEX_EXTENSION}"))
}

/// Write the index (and whitening stats, if any) for `category` under
/// `dir`, creating the directory if needed. Returns the blob path.
pub fn save_index(
    dir: &Path,
    category: &str,
    index: &FlatL2Index,
    whitening: Option<&WhiteningStats>,
) -> Result<PathBuf, PersistenceError> {
    let blob = IndexBlob {
        dimension: index.dimension() as u32,
        count: index.len() as u32,
        vectors: index.raw_vectors().to_vec(),
        whitening: whitening.cloned(),
    };
    let body = postcard::to_allocvec(&blob)?;
    let checksum = crc32fast::hash(&body);

    fs::create_dir_all(dir)?;
    let path = index_path(dir, category);
    let mut file = fs::File::create(&path)?;
    file.write_all(&INDEX_MAGIC)?;
    file.write_all(&FORMAT_VERSION.to_le_bytes())?;
    file.write_all(&(body.len() as u64).to_le_bytes())?;
    file.write_all(&body)?;
    file.write_all(&checksum.to_le_bytes())?;
    file.sync_all()?;

    info!(
        "persisted index for category {:?}: {} vectors x {} dims at {}",
        category,
        index.len(),
        index.dimension(),
        path.display()
    );
    Ok(path)
}

/// Read the index for `category` back from `dir`.
pub fn load_index(
    dir: &Path,
    category: &str,
) -> Result<(FlatL2Index, Option<WhiteningStats>), PersistenceError> {
    let path = index_path(dir, category);
    let mut file = fs::File::open(&path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    const HEADER: usize = 4 + 4 + 8;
    const FOOTER: usize = 4;
    if bytes.len() < HEADER + FOOTER {
        return Err(PersistenceError::Format(format!(
            "blob {} is truncated ({} bytes)",
            path.display(),
            bytes.len()
        )));
    }
    if bytes[0..4] != INDEX_MAGIC {
        return Err(PersistenceError::Format(format!(
            "blob {} has wrong magic bytes",
            path.display()
        )));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
    if version != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    let body_len = u64::from_le_bytes(bytes[8..16].try_into().expect("8 bytes")) as usize;
    if bytes.len() != HEADER + body_len + FOOTER {
        return Err(PersistenceError::Format(format!(
            "blob {} length {} does not match recorded body length {}",
            path.display(),
            bytes.len(),
            body_len
        )));
    }
    let body = &bytes[HEADER..HEADER + body_len];
    let expected = u32::from_le_bytes(bytes[HEADER + body_len..].try_into().expect("4 bytes"));
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(PersistenceError::ChecksumMismatch { expected, actual });
    }

    let blob: IndexBlob = postcard::from_bytes(body)?;
    if blob.vectors.len() != blob.dimension as usize * blob.count as usize {
        return Err(PersistenceError::InvalidBlob(format!(
            "vector storage holds {} floats, header claims {} x {}",
            blob.vectors.len(),
            blob.count,
            blob.dimension
        )));
    }
    let index = FlatL2Index::from_parts(blob.dimension as usize, blob.vectors)
        .map_err(|e| PersistenceError::InvalidBlob(e.to_string()))?;

    info!(
        "loaded index for category {:?}: {} vectors x {} dims",
        category,
        index.len(),
        index.dimension()
    );
    Ok((index, blob.whitening))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_path_uses_category_and_extension() {
        let p = index_path(Path::new("/tmp/banks"), "bottle");
        assert_eq!(p, PathBuf::from("/tmp/banks/bottle.anidx"));
    }
}
