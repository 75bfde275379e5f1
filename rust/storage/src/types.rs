use quiver_cache::CacheStats;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_types::{Metadata, Page};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage is not initialized")]
    NotInitialized,
    #[error("Storage is closed")]
    AlreadyClosed,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Record '{id}' is corrupt: {reason}")]
    CorruptRecord { id: String, reason: String },
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QuiverError for StorageError {
    fn code(&self) -> ErrorCodes {
        match self {
            StorageError::NotInitialized => ErrorCodes::FailedPrecondition,
            StorageError::AlreadyClosed => ErrorCodes::FailedPrecondition,
            StorageError::InvalidArgument(_) => ErrorCodes::InvalidArgument,
            StorageError::CorruptRecord { .. } => ErrorCodes::DataLoss,
            StorageError::Io(_) => ErrorCodes::Unknown,
            StorageError::Serialization(_) => ErrorCodes::Internal,
        }
    }
}

/// A retrieved record body: an owned vector plus metadata if any was
/// stored. Always a fresh copy; mutating it never touches stored state.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub vector: Vec<f64>,
    pub metadata: Option<Metadata>,
}

/// How an update treats a record's metadata: leave it alone, remove it, or
/// replace it wholesale.
#[derive(Clone, Debug, Default)]
pub enum MetadataPatch {
    #[default]
    Keep,
    Clear,
    Set(Metadata),
}

/// Stats reported by a backend. `cache` is populated by the hybrid backend
/// only.
#[derive(Clone, Debug, Serialize)]
pub struct StorageStats {
    pub backend: &'static str,
    pub record_count: usize,
    pub approximate_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

/// A lazily consumed sequence of record ids. The id set is snapshotted
/// under the backend's read lock before the stream is returned, so a
/// concurrent writer cannot race the scan.
pub type IdStream = Box<dyn Iterator<Item = Result<String, StorageError>> + Send>;

/// The uniform record-store contract. All writes defensively copy their
/// inputs, and all reads hand back owned data. One writer at a time per
/// backend instance; readers proceed concurrently.
pub trait VectorStorage {
    /// Must be called before any other operation.
    fn initialize(&self) -> Result<(), StorageError>;

    fn store(
        &self,
        id: &str,
        vector: &[f64],
        metadata: Option<&Metadata>,
    ) -> Result<(), StorageError>;

    fn retrieve(&self, id: &str) -> Result<Option<StoredRecord>, StorageError>;

    /// Returns whether the record existed.
    fn update(
        &self,
        id: &str,
        vector: Option<&[f64]>,
        metadata: MetadataPatch,
    ) -> Result<bool, StorageError>;

    /// Returns whether the record existed.
    fn delete(&self, id: &str) -> Result<bool, StorageError>;

    fn contains(&self, id: &str) -> Result<bool, StorageError>;

    /// Stores every record under one writer-lock acquisition.
    fn batch_store(
        &self,
        records: &[(String, Vec<f64>, Option<Metadata>)],
    ) -> Result<(), StorageError>;

    /// Existence checks under one read-lock acquisition; output parallel
    /// to `ids`.
    fn batch_contains(&self, ids: &[String]) -> Result<Vec<bool>, StorageError>;

    /// Retrievals under one read-lock acquisition; output parallel to
    /// `ids`.
    fn batch_retrieve(&self, ids: &[String]) -> Result<Vec<Option<StoredRecord>>, StorageError>;

    /// Vector replacements (metadata kept) under one writer-lock
    /// acquisition; per-item did-exist.
    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, StorageError>;

    /// Deletions under one writer-lock acquisition; per-item did-exist.
    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, StorageError>;

    /// All ids in ascending lexicographic order, truncated to `limit` when
    /// given.
    fn list(&self, limit: Option<usize>) -> Result<Vec<String>, StorageError>;

    fn list_paginated(&self, page_size: usize, cursor: Option<&str>) -> Result<Page, StorageError>;

    fn stream_ids(&self) -> Result<IdStream, StorageError>;

    fn count(&self) -> Result<usize, StorageError>;

    fn stats(&self) -> Result<StorageStats, StorageError>;

    /// Idempotent; operations after close fail with
    /// [`StorageError::NotInitialized`].
    fn close(&self) -> Result<(), StorageError>;
}

const STATE_NEW: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Initialization/closed fence shared by the backends. Close wins over
/// re-initialization: a closed store stays closed.
pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Lifecycle {
            state: AtomicU8::new(STATE_NEW),
        }
    }

    pub(crate) fn open(&self) -> Result<(), StorageError> {
        match self
            .state
            .compare_exchange(STATE_NEW, STATE_READY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(STATE_READY) => Ok(()),
            Err(_) => Err(StorageError::AlreadyClosed),
        }
    }

    pub(crate) fn check_ready(&self) -> Result<(), StorageError> {
        match self.state.load(Ordering::Acquire) {
            STATE_READY => Ok(()),
            _ => Err(StorageError::NotInitialized),
        }
    }

    /// Returns true on the transition, false if already closed.
    pub(crate) fn close(&self) -> bool {
        self.state.swap(STATE_CLOSED, Ordering::AcqRel) != STATE_CLOSED
    }
}

/// Shared cursor pagination over a sorted id list. A stale cursor (an id
/// that no longer exists) restarts from the beginning with a warning; the
/// caller may then see some ids twice.
pub(crate) fn paginate(
    ids: &[String],
    page_size: usize,
    cursor: Option<&str>,
) -> Result<Page, StorageError> {
    if page_size == 0 {
        return Err(StorageError::InvalidArgument(
            "page_size must be positive".to_string(),
        ));
    }
    let start = match cursor {
        None => 0,
        Some(cursor) => match ids.binary_search_by(|id| id.as_str().cmp(cursor)) {
            Ok(position) => position + 1,
            Err(_) => {
                tracing::warn!(cursor, "pagination cursor no longer exists, restarting");
                0
            }
        },
    };
    let end = (start + page_size).min(ids.len());
    let slice = &ids[start..end];
    let next_cursor = if end < ids.len() {
        slice.last().cloned()
    } else {
        None
    };
    Ok(Page {
        ids: slice.to_vec(),
        next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_paginate_walks_in_lexicographic_order() {
        let all: Vec<String> = (0..20).map(|i| format!("vec{}", i)).collect();
        let mut sorted = all.clone();
        sorted.sort();

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = paginate(&sorted, 5, cursor.as_deref()).unwrap();
            seen.extend(page.ids.clone());
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, sorted);
        assert_eq!(seen[0], "vec0");
        assert_eq!(seen[2], "vec10");
    }

    #[test]
    fn test_paginate_zero_page_size_rejected() {
        assert!(matches!(
            paginate(&ids(&["a"]), 0, None),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_paginate_stale_cursor_restarts() {
        let all = ids(&["a", "b", "c"]);
        let page = paginate(&all, 2, Some("bb")).unwrap();
        assert_eq!(page.ids, ids(&["a", "b"]));
    }

    #[test]
    fn test_paginate_final_page_has_no_cursor() {
        let all = ids(&["a", "b", "c"]);
        let page = paginate(&all, 2, Some("b")).unwrap();
        assert_eq!(page.ids, ids(&["c"]));
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_lifecycle_fences_operations() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.check_ready().is_err());
        lifecycle.open().unwrap();
        assert!(lifecycle.check_ready().is_ok());
        assert!(lifecycle.close());
        assert!(!lifecycle.close());
        assert!(lifecycle.check_ready().is_err());
        assert!(lifecycle.open().is_err());
    }
}
