mod envelope;
mod state;
mod vectors;

pub use envelope::*;
pub use state::*;
pub use vectors::*;

use quiver_error::{ErrorCodes, QuiverError};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot file '{path}' is corrupt: {reason}")]
    CorruptSnapshot { path: String, reason: String },
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("State serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SnapshotError {
    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        SnapshotError::CorruptSnapshot {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// True when the failure is a missing file rather than corruption; the
    /// facade treats this as "no snapshot" and starts empty.
    pub fn is_missing(&self) -> bool {
        matches!(self, SnapshotError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

impl QuiverError for SnapshotError {
    fn code(&self) -> ErrorCodes {
        match self {
            SnapshotError::CorruptSnapshot { .. } => ErrorCodes::DataLoss,
            SnapshotError::Io(_) => ErrorCodes::Unknown,
            SnapshotError::Serialization(_) => ErrorCodes::Internal,
        }
    }
}

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join("state.json")
}

pub fn vectors_path(dir: &Path) -> PathBuf {
    dir.join("vectors.bin")
}

pub fn index_path(dir: &Path, index_type: &str) -> PathBuf {
    dir.join(format!("index.{}.bin", index_type))
}
