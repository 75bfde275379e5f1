use crate::QuiverConfig;
use parking_lot::RwLock;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_index::{Index, IndexConfig, IndexError, VectorIndex};
use quiver_quantization::{QuantizationError, Quantizer, VectorQuantizer};
use quiver_snapshot::{
    index_path, load_payload, load_state, load_vectors, save_payload, save_state, save_vectors,
    state_path, vectors_path, SnapshotError, StateFile, STATE_SCHEMA_VERSION,
};
use quiver_storage::{
    IdStream, MetadataPatch, Storage, StorageError, VectorStorage,
};
use quiver_types::{
    validate_dimensionality, validate_metadata, Metadata, MetadataValidationError, Neighbor, Page,
    Record, SearchResult, VectorValidationError, MAX_DIMENSIONS,
};
use std::fs;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Client is not initialized")]
    NotInitialized,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Id '{0}' already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    InvalidVector(#[from] VectorValidationError),
    #[error(transparent)]
    InvalidMetadata(#[from] MetadataValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Quantization(#[from] QuantizationError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl QuiverError for ClientError {
    fn code(&self) -> ErrorCodes {
        match self {
            ClientError::NotInitialized => ErrorCodes::FailedPrecondition,
            ClientError::InvalidArgument(_) => ErrorCodes::InvalidArgument,
            ClientError::AlreadyExists(_) => ErrorCodes::AlreadyExists,
            ClientError::InvalidVector(e) => e.code(),
            ClientError::InvalidMetadata(e) => e.code(),
            ClientError::Storage(e) => e.code(),
            ClientError::Index(e) => e.code(),
            ClientError::Quantization(e) => e.code(),
            ClientError::Snapshot(e) => e.code(),
        }
    }
}

const STATE_NEW: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// The Quiver client: one storage backend, one index, and optionally one
/// quantizer, composed behind a single handle.
///
/// The client holds no lock of its own; each component serializes its own
/// mutations. Writes go storage-first then index, deletes go index-first
/// then storage, so the index never refers to a record storage cannot
/// materialize. A search may briefly miss a record that direct retrieval
/// already sees while an insert is in flight.
pub struct Quiver {
    config: QuiverConfig,
    storage: Storage,
    index: Index,
    quantizer: Option<RwLock<VectorQuantizer>>,
    state: AtomicU8,
}

impl Quiver {
    pub fn new(config: QuiverConfig) -> Result<Self, ClientError> {
        if config.dimensions == 0 || config.dimensions > MAX_DIMENSIONS {
            return Err(ClientError::InvalidArgument(format!(
                "dimensions must be in 1..={}, got {}",
                MAX_DIMENSIONS, config.dimensions
            )));
        }
        let storage = Storage::new(&config.storage);
        let index = Index::new(
            IndexConfig::new(config.dimensions, config.metric),
            &config.index,
        )?;
        let quantizer = match &config.quantizer {
            Some(params) => Some(RwLock::new(VectorQuantizer::new(params)?)),
            None => None,
        };
        Ok(Quiver {
            config,
            storage,
            index,
            quantizer,
            state: AtomicU8::new(STATE_NEW),
        })
    }

    /// Initializes the components and rehydrates state: snapshot artifacts
    /// when configured (best-effort; a missing or corrupt file logs a
    /// warning and the affected piece starts empty), then whatever the
    /// storage backend already holds.
    pub fn initialize(&self) -> Result<(), ClientError> {
        match self
            .state
            .compare_exchange(STATE_NEW, STATE_READY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(STATE_READY) => return Ok(()),
            Err(_) => return Err(ClientError::NotInitialized),
        }

        self.storage.initialize()?;

        let mut index_restored = false;
        if let Some(dir) = self.config.snapshot_dir.clone() {
            index_restored = self.rehydrate_from_snapshot(&dir)?;
        }
        if !index_restored {
            let ids = self.storage.list(None)?;
            let fetched = self.storage.batch_retrieve(&ids)?;
            let vectors: Vec<(String, Vec<f64>)> = ids
                .into_iter()
                .zip(fetched)
                .filter_map(|(id, stored)| stored.map(|stored| (id, stored.vector)))
                .collect();
            let count = vectors.len();
            self.index.build(vectors)?;
            if count > 0 {
                tracing::debug!(count, "index rebuilt from storage");
            }
        }
        Ok(())
    }

    /// Returns whether the index was restored from its snapshot payload.
    fn rehydrate_from_snapshot(&self, dir: &std::path::Path) -> Result<bool, ClientError> {
        match load_state(&state_path(dir)) {
            Ok(state) => {
                if state.dimensions != self.config.dimensions
                    || state.metric != self.config.metric.to_string()
                    || state.index_type != self.config.index.index_type()
                {
                    tracing::warn!(
                        snapshot_dims = state.dimensions,
                        snapshot_metric = %state.metric,
                        snapshot_index = %state.index_type,
                        "snapshot state does not match configuration, ignoring snapshot"
                    );
                    return Ok(false);
                }
                if let (Some(quantizer), Some(saved)) = (&self.quantizer, &state.quantizer) {
                    match serde_json::from_value::<VectorQuantizer>(saved.clone()) {
                        Ok(restored) => *quantizer.write() = restored,
                        Err(e) => {
                            tracing::warn!(error = %e, "quantizer state in snapshot is unreadable")
                        }
                    }
                }
            }
            Err(e) if e.is_missing() => return Ok(false),
            Err(e) => {
                tracing::warn!(error = %e, "snapshot state unreadable, starting empty");
                return Ok(false);
            }
        }

        // Backfill records the storage backend does not hold (a memory
        // backend holds nothing across restarts). Metadata lives in
        // storage, not in vectors.bin, so it survives only with a durable
        // backend.
        match load_vectors(&vectors_path(dir)) {
            Ok((dim, records)) => {
                if dim as usize == self.config.dimensions {
                    let ids: Vec<String> = records.iter().map(|(id, _)| id.clone()).collect();
                    let existing = self.storage.batch_contains(&ids)?;
                    let missing: Vec<(String, Vec<f64>, Option<Metadata>)> = records
                        .into_iter()
                        .zip(existing)
                        .filter(|(_, exists)| !exists)
                        .map(|((id, vector), _)| (id, vector, None))
                        .collect();
                    self.storage.batch_store(&missing)?;
                } else {
                    tracing::warn!(dim, "vector dump dimensionality mismatch, skipping");
                }
            }
            Err(e) if e.is_missing() => {}
            Err(e) => tracing::warn!(error = %e, "vector dump unreadable, skipping"),
        }

        match load_payload(&index_path(dir, self.config.index.index_type())) {
            Ok(bytes) => match self.index.restore_bytes(&bytes) {
                Ok(()) => Ok(true),
                Err(e) => {
                    tracing::warn!(error = %e, "index snapshot unreadable, rebuilding");
                    Ok(false)
                }
            },
            Err(e) if e.is_missing() => Ok(false),
            Err(e) => {
                tracing::warn!(error = %e, "index snapshot corrupt, rebuilding");
                Ok(false)
            }
        }
    }

    fn check_ready(&self) -> Result<(), ClientError> {
        match self.state.load(Ordering::Acquire) {
            STATE_READY => Ok(()),
            _ => Err(ClientError::NotInitialized),
        }
    }

    /// The vector actually written to storage: the quantizer's
    /// reconstruction when one is configured and trained, the original
    /// otherwise. The index always receives the original.
    fn storage_vector(&self, vector: &[f64]) -> Result<Vec<f64>, ClientError> {
        if let Some(quantizer) = &self.quantizer {
            let quantizer = quantizer.read();
            if quantizer.is_trained() {
                let code = quantizer.encode(vector)?;
                return Ok(quantizer.decode(&code)?);
            }
        }
        Ok(vector.to_vec())
    }

    fn validate_record(&self, record: &Record) -> Result<(), ClientError> {
        validate_dimensionality(&record.vector, self.config.dimensions)?;
        if let Some(metadata) = &record.metadata {
            validate_metadata(metadata)?;
        }
        Ok(())
    }

    /// Inserts already-identified records. Validates everything up front,
    /// then writes the whole batch to storage and the index with one lock
    /// acquisition on each component; if the index rejects the batch, the
    /// storage writes are rolled back.
    pub fn insert_records(&self, records: Vec<Record>) -> Result<Vec<String>, ClientError> {
        self.check_ready()?;
        for record in &records {
            self.validate_record(record)?;
        }
        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        let mut seen = std::collections::HashSet::new();
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(ClientError::AlreadyExists(id.clone()));
            }
        }
        if let Some(position) = self
            .storage
            .batch_contains(&ids)?
            .iter()
            .position(|&exists| exists)
        {
            return Err(ClientError::AlreadyExists(ids[position].clone()));
        }

        let mut stored = Vec::with_capacity(records.len());
        for record in &records {
            stored.push((
                record.id.clone(),
                self.storage_vector(&record.vector)?,
                record.metadata.clone(),
            ));
        }
        self.storage.batch_store(&stored)?;

        let pairs: Vec<(String, Vec<f64>)> = records
            .into_iter()
            .map(|record| (record.id, record.vector))
            .collect();
        if let Err(e) = self.index.batch_insert(&pairs) {
            tracing::error!(error = %e, "index insert failed, rolling back storage writes");
            if let Err(rollback) = self.storage.batch_delete(&ids) {
                tracing::error!(error = %rollback, "storage rollback failed");
            }
            return Err(e.into());
        }
        Ok(ids)
    }

    /// Inserts vectors with minted ids. `metadata`, when given, must be
    /// parallel to `vectors`; ids return in input order.
    pub fn insert(
        &self,
        vectors: Vec<Vec<f64>>,
        metadata: Option<Vec<Option<Metadata>>>,
    ) -> Result<Vec<String>, ClientError> {
        if let Some(metadata) = &metadata {
            if metadata.len() != vectors.len() {
                return Err(ClientError::InvalidArgument(format!(
                    "{} metadata entries for {} vectors",
                    metadata.len(),
                    vectors.len()
                )));
            }
        }
        let mut metadata = metadata
            .unwrap_or_default()
            .into_iter()
            .chain(std::iter::repeat(None));
        let records = vectors
            .into_iter()
            .map(|vector| Record {
                id: uuid::Uuid::new_v4().to_string(),
                vector,
                metadata: metadata.next().flatten(),
            })
            .collect();
        self.insert_records(records)
    }

    pub fn batch_insert(
        &self,
        vectors: Vec<Vec<f64>>,
        metadata: Option<Vec<Option<Metadata>>>,
    ) -> Result<Vec<String>, ClientError> {
        self.insert(vectors, metadata)
    }

    pub fn retrieve(&self, id: &str) -> Result<Option<Record>, ClientError> {
        self.check_ready()?;
        Ok(self.storage.retrieve(id)?.map(|stored| Record {
            id: id.to_string(),
            vector: stored.vector,
            metadata: stored.metadata,
        }))
    }

    pub fn batch_retrieve(&self, ids: &[String]) -> Result<Vec<Option<Record>>, ClientError> {
        self.check_ready()?;
        Ok(self
            .storage
            .batch_retrieve(ids)?
            .into_iter()
            .zip(ids)
            .map(|(stored, id)| {
                stored.map(|stored| Record {
                    id: id.clone(),
                    vector: stored.vector,
                    metadata: stored.metadata,
                })
            })
            .collect())
    }

    /// Materializes metadata for search hits with one storage read pass
    /// over every hit in the batch. A hit whose record vanished mid-flight
    /// is skipped, shortening its list.
    fn materialize(
        &self,
        neighbor_lists: Vec<Vec<Neighbor>>,
    ) -> Result<Vec<Vec<SearchResult>>, ClientError> {
        let ids: Vec<String> = neighbor_lists
            .iter()
            .flatten()
            .map(|neighbor| neighbor.id.clone())
            .collect();
        let mut fetched = self.storage.batch_retrieve(&ids)?.into_iter();
        let mut all_results = Vec::with_capacity(neighbor_lists.len());
        for neighbors in neighbor_lists {
            let mut results = Vec::with_capacity(neighbors.len());
            for neighbor in neighbors {
                match fetched.next().flatten() {
                    Some(stored) => results.push(SearchResult {
                        id: neighbor.id,
                        distance: neighbor.distance,
                        metadata: stored.metadata,
                    }),
                    None => {
                        tracing::debug!(id = %neighbor.id, "hit missing from storage, skipped");
                    }
                }
            }
            all_results.push(results);
        }
        Ok(all_results)
    }

    /// Top-k search with metadata materialized from storage.
    pub fn search(&self, query: &[f64], k: usize) -> Result<Vec<SearchResult>, ClientError> {
        self.check_ready()?;
        validate_dimensionality(query, self.config.dimensions)?;
        let neighbors = self.index.search(query, k)?;
        let mut lists = self.materialize(vec![neighbors])?;
        Ok(lists.pop().unwrap_or_default())
    }

    /// One lock acquisition per component for the whole batch: the index
    /// answers every query under one read guard, then storage materializes
    /// every hit under one read lock.
    pub fn batch_search(
        &self,
        queries: &[Vec<f64>],
        k: usize,
    ) -> Result<Vec<Vec<SearchResult>>, ClientError> {
        self.check_ready()?;
        for query in queries {
            validate_dimensionality(query, self.config.dimensions)?;
        }
        let all_neighbors = self.index.batch_search(queries, k)?;
        self.materialize(all_neighbors)
    }

    /// Updates a record in place. Returns whether it existed.
    pub fn update(
        &self,
        id: &str,
        vector: Option<&[f64]>,
        metadata: MetadataPatch,
    ) -> Result<bool, ClientError> {
        self.check_ready()?;
        if let Some(vector) = vector {
            validate_dimensionality(vector, self.config.dimensions)?;
        }
        if let MetadataPatch::Set(metadata) = &metadata {
            validate_metadata(metadata)?;
        }
        let stored = match vector {
            Some(vector) => Some(self.storage_vector(vector)?),
            None => None,
        };
        let existed = self
            .storage
            .update(id, stored.as_deref(), metadata)?;
        if existed {
            if let Some(vector) = vector {
                self.index.update(id, vector)?;
            }
        }
        Ok(existed)
    }

    /// One lock acquisition per component for the whole batch; per-item
    /// outcome, a failed item never aborts its siblings.
    pub fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, ClientError> {
        self.check_ready()?;
        let mut outcomes = vec![false; updates.len()];
        let mut storage_batch = Vec::new();
        let mut positions = Vec::new();
        for (position, (id, vector)) in updates.iter().enumerate() {
            if vector.len() != self.config.dimensions {
                continue;
            }
            storage_batch.push((id.clone(), self.storage_vector(vector)?));
            positions.push(position);
        }
        for (position, existed) in positions
            .into_iter()
            .zip(self.storage.batch_update(&storage_batch)?)
        {
            outcomes[position] = existed;
        }
        let index_outcomes = self.index.batch_update(updates)?;
        Ok(outcomes
            .into_iter()
            .zip(index_outcomes)
            .map(|(s, i)| s && i)
            .collect())
    }

    /// Deletes one record: index first, then storage, so the index never
    /// points at a record storage has already lost. Absence is not an
    /// error.
    pub fn delete(&self, id: &str) -> Result<bool, ClientError> {
        self.check_ready()?;
        self.index.delete(id)?;
        Ok(self.storage.delete(id)?)
    }

    /// True iff every id was present. One lock acquisition per component,
    /// index first.
    pub fn batch_delete(&self, ids: &[String]) -> Result<bool, ClientError> {
        self.check_ready()?;
        self.index.batch_delete(ids)?;
        Ok(self
            .storage
            .batch_delete(ids)?
            .into_iter()
            .all(|present| present))
    }

    pub fn list_ids(&self, limit: Option<usize>) -> Result<Vec<String>, ClientError> {
        self.check_ready()?;
        Ok(self.storage.list(limit)?)
    }

    pub fn list_ids_paginated(
        &self,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, ClientError> {
        self.check_ready()?;
        Ok(self.storage.list_paginated(page_size, cursor)?)
    }

    pub fn stream_ids(&self) -> Result<IdStream, ClientError> {
        self.check_ready()?;
        Ok(self.storage.stream_ids()?)
    }

    pub fn count(&self) -> Result<usize, ClientError> {
        self.check_ready()?;
        Ok(self.storage.count()?)
    }

    /// Trains the configured quantizer over a representative sample.
    pub fn train_quantizer(&self, samples: &[Vec<f64>]) -> Result<(), ClientError> {
        self.check_ready()?;
        let quantizer = self.quantizer.as_ref().ok_or_else(|| {
            ClientError::InvalidArgument("no quantizer configured".to_string())
        })?;
        for sample in samples {
            validate_dimensionality(sample, self.config.dimensions)?;
        }
        quantizer.write().train(samples)?;
        Ok(())
    }

    /// Strategy-specific maintenance; see [`VectorIndex::optimize`].
    pub fn optimize(&self) -> Result<(), ClientError> {
        self.check_ready()?;
        Ok(self.index.optimize()?)
    }

    /// Writes the three snapshot artifacts to the configured directory.
    pub fn snapshot(&self) -> Result<(), ClientError> {
        self.check_ready()?;
        self.snapshot_inner()
    }

    fn snapshot_inner(&self) -> Result<(), ClientError> {
        let dir = self.config.snapshot_dir.as_ref().ok_or_else(|| {
            ClientError::InvalidArgument("snapshot_dir is not configured".to_string())
        })?;
        fs::create_dir_all(dir).map_err(StorageError::from)?;

        let ids = self.storage.list(None)?;
        let fetched = self.storage.batch_retrieve(&ids)?;
        let records: Vec<(String, Vec<f64>)> = ids
            .into_iter()
            .zip(fetched)
            .filter_map(|(id, stored)| stored.map(|stored| (id, stored.vector)))
            .collect();
        save_vectors(
            &vectors_path(dir),
            self.config.dimensions as u32,
            &records,
            self.config.snapshot_gzip,
        )?;

        let payload = self.index.snapshot_bytes()?;
        save_payload(&index_path(dir, self.config.index.index_type()), &payload)?;

        let quantizer = match &self.quantizer {
            Some(quantizer) => Some(
                serde_json::to_value(&*quantizer.read()).map_err(SnapshotError::from)?,
            ),
            None => None,
        };
        save_state(
            &state_path(dir),
            &StateFile {
                schema_version: STATE_SCHEMA_VERSION,
                dimensions: self.config.dimensions,
                metric: self.config.metric.to_string(),
                index_type: self.config.index.index_type().to_string(),
                index_params: serde_json::to_value(&self.config.index)
                    .map_err(SnapshotError::from)?,
                quantizer,
            },
        )?;
        tracing::debug!(records = records.len(), dir = %dir.display(), "snapshot written");
        Ok(())
    }

    /// Merged component stats under nested keys.
    pub fn stats(&self) -> Result<serde_json::Value, ClientError> {
        self.check_ready()?;
        let mut stats = serde_json::json!({
            "dimensions": self.config.dimensions,
            "metric": self.config.metric.to_string(),
            "storage": self.storage.stats()?,
            "index": self.index.stats(),
        });
        if let Some(quantizer) = &self.quantizer {
            stats["quantizer"] = serde_json::to_value(quantizer.read().stats())
                .map_err(SnapshotError::from)?;
        }
        Ok(stats)
    }

    /// Idempotent. Optionally snapshots first, then closes the index and
    /// storage in reverse initialization order. Only the first close after
    /// a successful initialize does any work.
    pub fn close(&self) -> Result<(), ClientError> {
        if self
            .state
            .compare_exchange(STATE_READY, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        if self.config.persist_on_close && self.config.snapshot_dir.is_some() {
            if let Err(e) = self.snapshot_inner() {
                tracing::warn!(error = %e, "snapshot on close failed");
            }
        }
        self.index.close();
        self.storage.close()?;
        Ok(())
    }
}

impl Drop for Quiver {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "close during drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QuiverConfig;
    use quiver_distance::DistanceFunction;
    use quiver_index::{HnswParams, IndexParams};
    use quiver_quantization::{QuantizerParams, ScalarQuantizerParams};
    use quiver_storage::StorageConfig;
    use quiver_types::MetadataValue;
    use tempfile::TempDir;

    fn memory_client(dimensions: usize, metric: DistanceFunction) -> Quiver {
        let client = Quiver::new(QuiverConfig::in_memory(dimensions, metric)).unwrap();
        client.initialize().unwrap();
        client
    }

    fn label(value: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("label".to_string(), MetadataValue::Str(value.to_string()));
        metadata
    }

    fn record(id: &str, vector: Vec<f64>, metadata: Option<Metadata>) -> Record {
        Record {
            id: id.to_string(),
            vector,
            metadata,
        }
    }

    #[test]
    fn test_insert_and_search_materializes_metadata() {
        let client = memory_client(3, DistanceFunction::Cosine);
        client
            .insert_records(vec![
                record("v1", vec![1.0, 0.0, 0.0], Some(label("first"))),
                record("v2", vec![0.0, 1.0, 0.0], None),
                record("v3", vec![0.0, 0.0, 1.0], None),
                record("v4", vec![0.5, 0.5, 0.0], Some(label("fourth"))),
            ])
            .unwrap();

        let results = client.search(&[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "v1");
        assert_eq!(results[0].metadata, Some(label("first")));
        assert!((results[0].distance - 0.0057).abs() < 1e-3);
        assert_eq!(results[1].id, "v4");
        assert!((results[1].distance - 0.2192).abs() < 1e-3);
    }

    #[test]
    fn test_minted_ids_are_unique_and_ordered() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        let ids = client
            .insert(vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]], None)
            .unwrap();
        assert_eq!(ids.len(), 3);
        let unique: std::collections::HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 3);
        // First id maps to the first vector.
        let first = client.retrieve(&ids[0]).unwrap().unwrap();
        assert_eq!(first.vector, vec![0.0, 0.0]);
    }

    #[test]
    fn test_delete_removes_from_both_components() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        let ids = client
            .insert(vec![vec![0.0, 0.0], vec![5.0, 5.0]], None)
            .unwrap();
        assert!(client.delete(&ids[0]).unwrap());
        assert!(client.retrieve(&ids[0]).unwrap().is_none());
        let results = client.search(&[0.0, 0.0], 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ids[1]);
        // Absent again: not an error, aggregates to false.
        assert!(!client.batch_delete(&[ids[0].clone(), ids[1].clone()]).unwrap());
    }

    #[test]
    fn test_update_vector_and_metadata() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        client
            .insert_records(vec![record("a", vec![0.0, 0.0], Some(label("x")))])
            .unwrap();

        assert!(client
            .update("a", Some(&[9.0, 9.0]), MetadataPatch::Keep)
            .unwrap());
        let results = client.search(&[9.0, 9.0], 1).unwrap();
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].metadata, Some(label("x")));

        assert!(client.update("a", None, MetadataPatch::Clear).unwrap());
        assert_eq!(client.retrieve("a").unwrap().unwrap().metadata, None);

        assert!(!client
            .update("missing", Some(&[1.0, 1.0]), MetadataPatch::Keep)
            .unwrap());
    }

    #[test]
    fn test_duplicate_ids_rejected_before_any_write() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        client
            .insert_records(vec![record("a", vec![0.0, 0.0], None)])
            .unwrap();
        let err = client
            .insert_records(vec![
                record("b", vec![1.0, 1.0], None),
                record("a", vec![2.0, 2.0], None),
            ])
            .unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists(_)));
        // Nothing from the failed batch landed.
        assert!(client.retrieve("b").unwrap().is_none());
        assert_eq!(client.count().unwrap(), 1);
    }

    #[test]
    fn test_validation_failures_surface() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        assert!(matches!(
            client.insert(vec![vec![1.0]], None),
            Err(ClientError::InvalidVector(_))
        ));
        assert!(matches!(
            client.insert(vec![vec![f64::NAN, 0.0]], None),
            Err(ClientError::InvalidVector(_))
        ));
        assert!(matches!(
            client.insert(vec![vec![1.0, 2.0]], Some(vec![])),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_lifecycle_fences() {
        let client = Quiver::new(QuiverConfig::in_memory(2, DistanceFunction::Euclidean)).unwrap();
        assert!(matches!(
            client.search(&[0.0, 0.0], 1),
            Err(ClientError::NotInitialized)
        ));
        client.initialize().unwrap();
        client.initialize().unwrap();
        client.close().unwrap();
        client.close().unwrap();
        assert!(matches!(
            client.search(&[0.0, 0.0], 1),
            Err(ClientError::NotInitialized)
        ));
    }

    #[test]
    fn test_boundary_ks() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        assert!(client.search(&[0.0, 0.0], 5).unwrap().is_empty());
        client.insert(vec![vec![1.0, 1.0]], None).unwrap();
        assert!(client.search(&[0.0, 0.0], 0).unwrap().is_empty());
        assert_eq!(client.search(&[0.0, 0.0], 100).unwrap().len(), 1);
    }

    #[test]
    fn test_durable_restart_rebuilds_index_from_storage() {
        let dir = TempDir::new().unwrap();
        let config = QuiverConfig {
            dimensions: 2,
            metric: DistanceFunction::Euclidean,
            storage: StorageConfig::Disk {
                data_dir: dir.path().to_path_buf(),
            },
            index: IndexParams::Flat,
            quantizer: None,
            snapshot_dir: None,
            persist_on_close: false,
            snapshot_gzip: false,
        };
        {
            let client = Quiver::new(config.clone()).unwrap();
            client.initialize().unwrap();
            client
                .insert_records(vec![
                    record("v1", vec![1.0, 2.0], Some(label("a"))),
                    record("v2", vec![3.0, 4.0], Some(label("b"))),
                ])
                .unwrap();
            client.close().unwrap();
        }
        let client = Quiver::new(config).unwrap();
        client.initialize().unwrap();
        assert_eq!(client.list_ids(None).unwrap().len(), 2);
        let restored = client.retrieve("v1").unwrap().unwrap();
        assert_eq!(restored.vector, vec![1.0, 2.0]);
        assert_eq!(restored.metadata, Some(label("a")));
        let results = client.search(&[1.0, 2.0], 1).unwrap();
        assert_eq!(results[0].id, "v1");
    }

    #[test]
    fn test_snapshot_round_trip_reproduces_results() {
        let data_dir = TempDir::new().unwrap();
        let snapshot_dir = TempDir::new().unwrap();
        let config = QuiverConfig {
            dimensions: 4,
            metric: DistanceFunction::Euclidean,
            storage: StorageConfig::Disk {
                data_dir: data_dir.path().to_path_buf(),
            },
            index: IndexParams::Hnsw(HnswParams {
                m: 8,
                ef_construction: 64,
                ef_search: 32,
                seed: 42,
            }),
            quantizer: None,
            snapshot_dir: Some(snapshot_dir.path().to_path_buf()),
            persist_on_close: true,
            snapshot_gzip: true,
        };
        let queries: Vec<Vec<f64>> = (0..5)
            .map(|i| vec![i as f64, 0.5, -1.0, 2.0])
            .collect();
        let expected: Vec<Vec<SearchResult>>;
        {
            let client = Quiver::new(config.clone()).unwrap();
            client.initialize().unwrap();
            let records: Vec<Record> = (0..50)
                .map(|i| {
                    record(
                        &format!("v{}", i),
                        vec![i as f64, (i % 7) as f64, -(i as f64), 0.25 * i as f64],
                        Some(label(&format!("l{}", i))),
                    )
                })
                .collect();
            client.insert_records(records).unwrap();
            expected = queries
                .iter()
                .map(|q| client.search(q, 5).unwrap())
                .collect();
            client.close().unwrap();
        }
        assert!(snapshot_dir.path().join("state.json").exists());
        assert!(snapshot_dir.path().join("vectors.bin").exists());
        assert!(snapshot_dir.path().join("index.hnsw.bin").exists());

        let client = Quiver::new(config).unwrap();
        client.initialize().unwrap();
        assert_eq!(client.count().unwrap(), 50);
        for (query, want) in queries.iter().zip(expected.iter()) {
            assert_eq!(&client.search(query, 5).unwrap(), want);
        }
        let restored = client.retrieve("v3").unwrap().unwrap();
        assert_eq!(restored.metadata, Some(label("l3")));
    }

    #[test]
    fn test_corrupt_index_snapshot_falls_back_to_rebuild() {
        let data_dir = TempDir::new().unwrap();
        let snapshot_dir = TempDir::new().unwrap();
        let config = QuiverConfig {
            dimensions: 2,
            metric: DistanceFunction::Euclidean,
            storage: StorageConfig::Disk {
                data_dir: data_dir.path().to_path_buf(),
            },
            index: IndexParams::Flat,
            quantizer: None,
            snapshot_dir: Some(snapshot_dir.path().to_path_buf()),
            persist_on_close: true,
            snapshot_gzip: false,
        };
        {
            let client = Quiver::new(config.clone()).unwrap();
            client.initialize().unwrap();
            client
                .insert_records(vec![record("a", vec![1.0, 2.0], None)])
                .unwrap();
            client.close().unwrap();
        }
        // Flip a payload byte; the load must fall back to a storage rebuild.
        let index_file = snapshot_dir.path().join("index.flat.bin");
        let mut bytes = fs::read(&index_file).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&index_file, &bytes).unwrap();

        let client = Quiver::new(config).unwrap();
        client.initialize().unwrap();
        let results = client.search(&[1.0, 2.0], 1).unwrap();
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn test_hybrid_cache_counters_through_facade() {
        let dir = TempDir::new().unwrap();
        let config = QuiverConfig {
            dimensions: 2,
            metric: DistanceFunction::Euclidean,
            storage: StorageConfig::Hybrid {
                data_dir: dir.path().to_path_buf(),
                cache_size: 2,
                cache_expire_minutes: None,
            },
            index: IndexParams::Flat,
            quantizer: None,
            snapshot_dir: None,
            persist_on_close: false,
            snapshot_gzip: false,
        };
        let client = Quiver::new(config).unwrap();
        client.initialize().unwrap();
        client
            .insert_records(vec![
                record("r1", vec![1.0, 0.0], None),
                record("r2", vec![2.0, 0.0], None),
                record("r3", vec![3.0, 0.0], None),
            ])
            .unwrap();
        client.retrieve("r1").unwrap().unwrap();
        let stats = client.stats().unwrap();
        assert_eq!(stats["storage"]["cache"]["hits"], 0);
        assert_eq!(stats["storage"]["cache"]["misses"], 1);
        client.retrieve("r1").unwrap().unwrap();
        let stats = client.stats().unwrap();
        assert_eq!(stats["storage"]["cache"]["hits"], 1);
        assert_eq!(stats["storage"]["cache"]["misses"], 1);
    }

    #[test]
    fn test_quantizer_reconstruction_within_tolerance() {
        let mut config = QuiverConfig::in_memory(4, DistanceFunction::Euclidean);
        config.quantizer = Some(QuantizerParams::Scalar(ScalarQuantizerParams { bits: 8 }));
        let client = Quiver::new(config).unwrap();
        client.initialize().unwrap();

        let samples: Vec<Vec<f64>> = (0..32)
            .map(|i| vec![i as f64 / 32.0, 1.0 - i as f64 / 32.0, 0.5, -0.5])
            .collect();
        client.train_quantizer(&samples).unwrap();

        let original = vec![0.3, 0.7, 0.5, -0.5];
        let ids = client.insert(vec![original.clone()], None).unwrap();
        let stored = client.retrieve(&ids[0]).unwrap().unwrap();
        let step = 1.0 / 255.0;
        for (a, b) in stored.vector.iter().zip(original.iter()) {
            assert!((a - b).abs() <= step, "|{} - {}| > {}", a, b, step);
        }
        let stats = client.stats().unwrap();
        assert_eq!(stats["quantizer"]["compression_ratio"], 8.0);
    }

    #[test]
    fn test_train_quantizer_requires_configuration() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        assert!(matches!(
            client.train_quantizer(&[vec![0.0, 0.0]]),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_stats_nests_component_sections() {
        let client = memory_client(2, DistanceFunction::Cosine);
        client.insert(vec![vec![1.0, 0.0]], None).unwrap();
        let stats = client.stats().unwrap();
        assert_eq!(stats["dimensions"], 2);
        assert_eq!(stats["metric"], "cosine");
        assert_eq!(stats["storage"]["record_count"], 1);
        assert_eq!(stats["index"]["live_count"], 1);
        assert!(stats.get("quantizer").is_none());
    }

    #[test]
    fn test_pagination_through_facade() {
        let client = memory_client(1, DistanceFunction::Euclidean);
        let records: Vec<Record> = (0..20)
            .map(|i| record(&format!("vec{}", i), vec![i as f64], None))
            .collect();
        client.insert_records(records).unwrap();

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = client.list_ids_paginated(5, cursor.as_deref()).unwrap();
            seen.extend(page.ids.clone());
            if !page.has_more() {
                break;
            }
            cursor = page.next_cursor;
        }
        assert_eq!(seen, client.list_ids(None).unwrap());
        assert_eq!(seen.first().map(String::as_str), Some("vec0"));
        assert_eq!(seen[2], "vec10");
    }

    #[test]
    fn test_stream_ids_matches_list() {
        let client = memory_client(1, DistanceFunction::Euclidean);
        client
            .insert_records(vec![
                record("a", vec![1.0], None),
                record("b", vec![2.0], None),
            ])
            .unwrap();
        let mut streamed: Vec<String> = client
            .stream_ids()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        streamed.sort();
        assert_eq!(streamed, client.list_ids(None).unwrap());
    }

    #[test]
    fn test_batch_search_preserves_input_order() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        client
            .insert_records(vec![
                record("near-origin", vec![0.1, 0.1], None),
                record("far", vec![9.0, 9.0], None),
            ])
            .unwrap();
        let results = client
            .batch_search(&[vec![9.0, 9.0], vec![0.0, 0.0]], 1)
            .unwrap();
        assert_eq!(results[0][0].id, "far");
        assert_eq!(results[1][0].id, "near-origin");
    }

    #[test]
    fn test_batch_update_reports_per_item() {
        let client = memory_client(2, DistanceFunction::Euclidean);
        client
            .insert_records(vec![record("a", vec![0.0, 0.0], None)])
            .unwrap();
        let outcomes = client
            .batch_update(&[
                ("a".to_string(), vec![1.0, 1.0]),
                ("missing".to_string(), vec![2.0, 2.0]),
            ])
            .unwrap();
        assert_eq!(outcomes, vec![true, false]);
        assert_eq!(client.retrieve("a").unwrap().unwrap().vector, vec![1.0, 1.0]);
    }
}
