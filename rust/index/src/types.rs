use quiver_distance::DistanceFunction;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_types::Neighbor;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Shape shared by every index: the database's fixed dimensionality and the
/// metric its distances are computed under.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimensionality: usize,
    pub metric: DistanceFunction,
}

impl IndexConfig {
    pub fn new(dimensionality: usize, metric: DistanceFunction) -> Self {
        IndexConfig {
            dimensionality,
            metric,
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index is not ready (state: {0})")]
    NotReady(&'static str),
    #[error("Vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Id '{0}' is not in the index")]
    NotFound(String),
    #[error("Id '{0}' is already in the index")]
    DuplicateId(String),
    #[error("Invalid index configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Index snapshot is corrupt: {0}")]
    CorruptSnapshot(String),
}

impl QuiverError for IndexError {
    fn code(&self) -> ErrorCodes {
        match self {
            IndexError::NotReady(_) => ErrorCodes::FailedPrecondition,
            IndexError::DimensionMismatch { .. } => ErrorCodes::InvalidArgument,
            IndexError::NotFound(_) => ErrorCodes::NotFound,
            IndexError::DuplicateId(_) => ErrorCodes::AlreadyExists,
            IndexError::InvalidConfiguration(_) => ErrorCodes::InvalidArgument,
            IndexError::CorruptSnapshot(_) => ErrorCodes::DataLoss,
        }
    }
}

/// Stats common to every index plus a free-form details map for
/// strategy-specific figures (layer count, posting sizes, tree count).
#[derive(Clone, Debug, Serialize)]
pub struct IndexStats {
    pub index_type: &'static str,
    pub state: &'static str,
    pub dimensionality: usize,
    pub metric: DistanceFunction,
    pub live_count: usize,
    pub total_slots: usize,
    pub tombstones: usize,
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// The index contract. Results are ordered by ascending distance with ties
/// broken by ascending slot, so identical inputs produce identical output.
pub trait VectorIndex {
    /// Bulk initial load. Transitions the index to Ready, even when empty.
    fn build(&self, vectors: Vec<(String, Vec<f64>)>) -> Result<(), IndexError>;

    /// Single insert. The first insert on an Uninitialized index also
    /// transitions it to Ready.
    fn insert(&self, id: &str, vector: &[f64]) -> Result<(), IndexError>;

    /// Replaces the vector for `id`. Fails with [`IndexError::NotFound`]
    /// when the id is absent.
    fn update(&self, id: &str, vector: &[f64]) -> Result<(), IndexError>;

    /// Tombstones `id`. Returns false (not an error) when absent.
    fn delete(&self, id: &str) -> Result<bool, IndexError>;

    /// Inserts every pair under one write-lock acquisition. On failure the
    /// pairs this call already inserted are removed again, so the index
    /// never keeps a partial batch.
    fn batch_insert(&self, items: &[(String, Vec<f64>)]) -> Result<(), IndexError>;

    /// Tombstones every id under one write-lock acquisition; per-item
    /// did-exist.
    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, IndexError>;

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>, IndexError>;

    /// One read pass over the whole batch; output order matches input.
    fn batch_search(&self, queries: &[Vec<f64>], k: usize)
        -> Result<Vec<Vec<Neighbor>>, IndexError>;

    /// One write lock for the whole batch; per-item success, a failed item
    /// never aborts its siblings.
    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, IndexError>;

    fn stats(&self) -> IndexStats;

    /// Strategy-specific maintenance (Annoy flushes pending inserts into
    /// its trees). A no-op elsewhere.
    fn optimize(&self) -> Result<(), IndexError> {
        Ok(())
    }

    /// Serializes the index state for a snapshot artifact.
    fn snapshot_bytes(&self) -> Result<Vec<u8>, IndexError>;

    /// Replaces the index state from a snapshot and transitions to Ready.
    fn restore_bytes(&self, bytes: &[u8]) -> Result<(), IndexError>;

    /// Idempotent. Operations after close fail with [`IndexError::NotReady`].
    fn close(&self);
}

const STATE_UNINITIALIZED: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// The Uninitialized → Ready → Closed fence shared by the strategies.
pub(crate) struct IndexState {
    state: AtomicU8,
}

impl IndexState {
    pub(crate) fn new() -> Self {
        IndexState {
            state: AtomicU8::new(STATE_UNINITIALIZED),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self.state.load(Ordering::Acquire) {
            STATE_READY => "ready",
            STATE_CLOSED => "closed",
            _ => "uninitialized",
        }
    }

    /// Uninitialized or Ready → Ready. Closed stays closed.
    pub(crate) fn mark_ready(&self) -> Result<(), IndexError> {
        match self.state.compare_exchange(
            STATE_UNINITIALIZED,
            STATE_READY,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) | Err(STATE_READY) => Ok(()),
            Err(_) => Err(IndexError::NotReady("closed")),
        }
    }

    pub(crate) fn check_ready(&self) -> Result<(), IndexError> {
        match self.state.load(Ordering::Acquire) {
            STATE_READY => Ok(()),
            STATE_CLOSED => Err(IndexError::NotReady("closed")),
            _ => Err(IndexError::NotReady("uninitialized")),
        }
    }

    pub(crate) fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
    }
}

pub(crate) fn check_dimensionality(expected: usize, vector: &[f64]) -> Result<(), IndexError> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Result row assembly shared by the strategies.
pub(crate) fn to_neighbors(hits: Vec<(f64, usize)>, ids: impl Fn(usize) -> String) -> Vec<Neighbor> {
    hits.into_iter()
        .map(|(distance, slot)| Neighbor {
            id: ids(slot),
            distance,
        })
        .collect()
}
