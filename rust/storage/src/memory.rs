use crate::{
    paginate, IdStream, Lifecycle, MetadataPatch, StorageError, StorageStats, StoredRecord,
    VectorStorage,
};
use parking_lot::RwLock;
use quiver_types::{Metadata, Page};
use std::collections::HashMap;

#[derive(Default)]
struct Maps {
    vectors: HashMap<String, Vec<f64>>,
    metadata: HashMap<String, Metadata>,
}

impl Maps {
    fn store(&mut self, id: &str, vector: &[f64], metadata: Option<&Metadata>) {
        self.vectors.insert(id.to_string(), vector.to_vec());
        match metadata {
            Some(metadata) => {
                self.metadata.insert(id.to_string(), metadata.clone());
            }
            None => {
                self.metadata.remove(id);
            }
        }
    }

    fn retrieve(&self, id: &str) -> Option<StoredRecord> {
        self.vectors.get(id).map(|vector| StoredRecord {
            vector: vector.clone(),
            metadata: self.metadata.get(id).cloned(),
        })
    }

    fn update(&mut self, id: &str, vector: Option<&[f64]>, metadata: MetadataPatch) -> bool {
        if !self.vectors.contains_key(id) {
            return false;
        }
        if let Some(vector) = vector {
            self.vectors.insert(id.to_string(), vector.to_vec());
        }
        match metadata {
            MetadataPatch::Keep => {}
            MetadataPatch::Clear => {
                self.metadata.remove(id);
            }
            MetadataPatch::Set(metadata) => {
                self.metadata.insert(id.to_string(), metadata);
            }
        }
        true
    }

    fn delete(&mut self, id: &str) -> bool {
        self.metadata.remove(id);
        self.vectors.remove(id).is_some()
    }
}

/// Pure in-memory backend: two parallel maps under a single reader-writer
/// lock. Nothing survives the process.
pub struct MemoryStorage {
    maps: RwLock<Maps>,
    lifecycle: Lifecycle,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            maps: RwLock::new(Maps::default()),
            lifecycle: Lifecycle::new(),
        }
    }

    fn sorted_ids(&self) -> Vec<String> {
        let maps = self.maps.read();
        let mut ids: Vec<String> = maps.vectors.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStorage for MemoryStorage {
    fn initialize(&self) -> Result<(), StorageError> {
        self.lifecycle.open()
    }

    fn store(
        &self,
        id: &str,
        vector: &[f64],
        metadata: Option<&Metadata>,
    ) -> Result<(), StorageError> {
        self.lifecycle.check_ready()?;
        self.maps.write().store(id, vector, metadata);
        Ok(())
    }

    fn retrieve(&self, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        self.lifecycle.check_ready()?;
        Ok(self.maps.read().retrieve(id))
    }

    fn update(
        &self,
        id: &str,
        vector: Option<&[f64]>,
        metadata: MetadataPatch,
    ) -> Result<bool, StorageError> {
        self.lifecycle.check_ready()?;
        Ok(self.maps.write().update(id, vector, metadata))
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.lifecycle.check_ready()?;
        Ok(self.maps.write().delete(id))
    }

    fn contains(&self, id: &str) -> Result<bool, StorageError> {
        self.lifecycle.check_ready()?;
        Ok(self.maps.read().vectors.contains_key(id))
    }

    fn batch_store(
        &self,
        records: &[(String, Vec<f64>, Option<Metadata>)],
    ) -> Result<(), StorageError> {
        self.lifecycle.check_ready()?;
        let mut maps = self.maps.write();
        for (id, vector, metadata) in records {
            maps.store(id, vector, metadata.as_ref());
        }
        Ok(())
    }

    fn batch_contains(&self, ids: &[String]) -> Result<Vec<bool>, StorageError> {
        self.lifecycle.check_ready()?;
        let maps = self.maps.read();
        Ok(ids.iter().map(|id| maps.vectors.contains_key(id)).collect())
    }

    fn batch_retrieve(&self, ids: &[String]) -> Result<Vec<Option<StoredRecord>>, StorageError> {
        self.lifecycle.check_ready()?;
        let maps = self.maps.read();
        Ok(ids.iter().map(|id| maps.retrieve(id)).collect())
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, StorageError> {
        self.lifecycle.check_ready()?;
        let mut maps = self.maps.write();
        Ok(updates
            .iter()
            .map(|(id, vector)| maps.update(id, Some(vector), MetadataPatch::Keep))
            .collect())
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, StorageError> {
        self.lifecycle.check_ready()?;
        let mut maps = self.maps.write();
        Ok(ids.iter().map(|id| maps.delete(id)).collect())
    }

    fn list(&self, limit: Option<usize>) -> Result<Vec<String>, StorageError> {
        self.lifecycle.check_ready()?;
        let mut ids = self.sorted_ids();
        if let Some(limit) = limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    fn list_paginated(&self, page_size: usize, cursor: Option<&str>) -> Result<Page, StorageError> {
        self.lifecycle.check_ready()?;
        paginate(&self.sorted_ids(), page_size, cursor)
    }

    fn stream_ids(&self) -> Result<IdStream, StorageError> {
        self.lifecycle.check_ready()?;
        Ok(Box::new(self.sorted_ids().into_iter().map(Ok)))
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.lifecycle.check_ready()?;
        Ok(self.maps.read().vectors.len())
    }

    fn stats(&self) -> Result<StorageStats, StorageError> {
        self.lifecycle.check_ready()?;
        let maps = self.maps.read();
        let vector_bytes: u64 = maps.vectors.values().map(|v| v.len() as u64 * 8).sum();
        let mut metadata_bytes = 0u64;
        for metadata in maps.metadata.values() {
            metadata_bytes += serde_json::to_vec(metadata)?.len() as u64;
        }
        Ok(StorageStats {
            backend: "memory",
            record_count: maps.vectors.len(),
            approximate_size_bytes: vector_bytes + metadata_bytes,
            cache: None,
        })
    }

    fn close(&self) -> Result<(), StorageError> {
        if self.lifecycle.close() {
            let mut maps = self.maps.write();
            maps.vectors.clear();
            maps.metadata.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_types::MetadataValue;

    fn ready() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.initialize().unwrap();
        storage
    }

    fn label(value: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("label".to_string(), MetadataValue::Str(value.to_string()));
        metadata
    }

    #[test]
    fn test_requires_initialize() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.store("a", &[1.0], None),
            Err(StorageError::NotInitialized)
        ));
    }

    #[test]
    fn test_store_and_retrieve_round_trip() {
        let storage = ready();
        storage.store("a", &[1.0, 2.0], Some(&label("x"))).unwrap();
        let record = storage.retrieve("a").unwrap().unwrap();
        assert_eq!(record.vector, vec![1.0, 2.0]);
        assert_eq!(record.metadata, Some(label("x")));
        assert!(storage.retrieve("missing").unwrap().is_none());
    }

    #[test]
    fn test_absent_metadata_stays_absent() {
        let storage = ready();
        storage.store("a", &[1.0], None).unwrap();
        let record = storage.retrieve("a").unwrap().unwrap();
        assert_eq!(record.metadata, None);
    }

    #[test]
    fn test_retrieval_returns_fresh_copies() {
        let storage = ready();
        storage.store("a", &[1.0, 2.0], None).unwrap();
        let mut record = storage.retrieve("a").unwrap().unwrap();
        record.vector[0] = 99.0;
        assert_eq!(storage.retrieve("a").unwrap().unwrap().vector, vec![1.0, 2.0]);
    }

    #[test]
    fn test_update_patches_independently() {
        let storage = ready();
        storage.store("a", &[1.0], Some(&label("x"))).unwrap();

        assert!(storage.update("a", Some(&[2.0]), MetadataPatch::Keep).unwrap());
        let record = storage.retrieve("a").unwrap().unwrap();
        assert_eq!(record.vector, vec![2.0]);
        assert_eq!(record.metadata, Some(label("x")));

        assert!(storage.update("a", None, MetadataPatch::Clear).unwrap());
        assert_eq!(storage.retrieve("a").unwrap().unwrap().metadata, None);

        assert!(!storage.update("missing", Some(&[1.0]), MetadataPatch::Keep).unwrap());
    }

    #[test]
    fn test_delete_reports_presence() {
        let storage = ready();
        storage.store("a", &[1.0], None).unwrap();
        assert!(storage.delete("a").unwrap());
        assert!(!storage.delete("a").unwrap());
        assert!(storage.retrieve("a").unwrap().is_none());
    }

    #[test]
    fn test_list_sorted_with_limit() {
        let storage = ready();
        for id in ["c", "a", "b"] {
            storage.store(id, &[0.0], None).unwrap();
        }
        assert_eq!(storage.list(None).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(storage.list(Some(2)).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_batch_operations_round_trip() {
        let storage = ready();
        storage
            .batch_store(&[
                ("a".to_string(), vec![1.0], Some(label("x"))),
                ("b".to_string(), vec![2.0], None),
            ])
            .unwrap();
        assert_eq!(
            storage
                .batch_contains(&["a".to_string(), "missing".to_string()])
                .unwrap(),
            vec![true, false]
        );

        let fetched = storage
            .batch_retrieve(&["b".to_string(), "missing".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(fetched[0].as_ref().unwrap().vector, vec![2.0]);
        assert!(fetched[1].is_none());
        assert_eq!(fetched[2].as_ref().unwrap().metadata, Some(label("x")));

        let outcomes = storage
            .batch_update(&[("a".to_string(), vec![9.0]), ("missing".to_string(), vec![0.0])])
            .unwrap();
        assert_eq!(outcomes, vec![true, false]);
        assert_eq!(storage.retrieve("a").unwrap().unwrap().vector, vec![9.0]);
        // Vector-only update keeps metadata.
        assert_eq!(storage.retrieve("a").unwrap().unwrap().metadata, Some(label("x")));

        let outcomes = storage
            .batch_delete(&["a".to_string(), "a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(outcomes, vec![true, false, true]);
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_stats_track_count_and_footprint() {
        let storage = ready();
        storage.store("a", &[0.0; 4], None).unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.approximate_size_bytes, 32);
    }

    #[test]
    fn test_close_is_idempotent_and_fences() {
        let storage = ready();
        storage.store("a", &[1.0], None).unwrap();
        storage.close().unwrap();
        storage.close().unwrap();
        assert!(matches!(
            storage.retrieve("a"),
            Err(StorageError::NotInitialized)
        ));
    }
}
