use crate::{
    DiskStorage, IdStream, MetadataPatch, StorageError, StorageStats, StoredRecord, VectorStorage,
};
use quiver_cache::{CacheConfig, LruCache};
use quiver_types::{Metadata, Page};
use std::path::Path;

/// Write-through hybrid: an LRU cache of recently touched records in front
/// of a [`DiskStorage`]. Every successful write reaches disk first and then
/// refreshes the cache, so the disk is always the source of truth;
/// enumeration bypasses the cache entirely.
pub struct HybridStorage {
    disk: DiskStorage,
    cache: LruCache<String, StoredRecord>,
}

impl HybridStorage {
    pub fn new(root: &Path, cache_config: &CacheConfig) -> Self {
        HybridStorage {
            disk: DiskStorage::new(root),
            cache: LruCache::new(cache_config),
        }
    }
}

impl VectorStorage for HybridStorage {
    fn initialize(&self) -> Result<(), StorageError> {
        self.disk.initialize()
    }

    fn store(
        &self,
        id: &str,
        vector: &[f64],
        metadata: Option<&Metadata>,
    ) -> Result<(), StorageError> {
        self.disk.store(id, vector, metadata)?;
        self.cache.insert(
            id.to_string(),
            StoredRecord {
                vector: vector.to_vec(),
                metadata: metadata.cloned(),
            },
        );
        Ok(())
    }

    fn retrieve(&self, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        // Probe the cache only when ready, so lifecycle errors win over hits.
        self.disk.ensure_ready()?;
        if let Some(record) = self.cache.get(&id.to_string()) {
            return Ok(Some(record));
        }
        match self.disk.retrieve(id)? {
            Some(record) => {
                tracing::debug!(id, "cache miss, populated from disk");
                self.cache.insert(id.to_string(), record.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn update(
        &self,
        id: &str,
        vector: Option<&[f64]>,
        metadata: MetadataPatch,
    ) -> Result<bool, StorageError> {
        let existed = self.disk.update(id, vector, metadata)?;
        self.cache.invalidate(&id.to_string());
        if existed {
            if let Some(record) = self.disk.retrieve(id)? {
                self.cache.insert(id.to_string(), record);
            }
        }
        Ok(existed)
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let existed = self.disk.delete(id)?;
        self.cache.invalidate(&id.to_string());
        Ok(existed)
    }

    fn contains(&self, id: &str) -> Result<bool, StorageError> {
        self.disk.contains(id)
    }

    fn batch_store(
        &self,
        records: &[(String, Vec<f64>, Option<Metadata>)],
    ) -> Result<(), StorageError> {
        self.disk.batch_store(records)?;
        for (id, vector, metadata) in records {
            self.cache.insert(
                id.clone(),
                StoredRecord {
                    vector: vector.clone(),
                    metadata: metadata.clone(),
                },
            );
        }
        Ok(())
    }

    fn batch_contains(&self, ids: &[String]) -> Result<Vec<bool>, StorageError> {
        self.disk.batch_contains(ids)
    }

    fn batch_retrieve(&self, ids: &[String]) -> Result<Vec<Option<StoredRecord>>, StorageError> {
        self.disk.ensure_ready()?;
        let mut results: Vec<Option<StoredRecord>> = Vec::with_capacity(ids.len());
        let mut miss_ids = Vec::new();
        let mut miss_positions = Vec::new();
        for (position, id) in ids.iter().enumerate() {
            match self.cache.get(id) {
                Some(record) => results.push(Some(record)),
                None => {
                    results.push(None);
                    miss_ids.push(id.clone());
                    miss_positions.push(position);
                }
            }
        }
        if !miss_ids.is_empty() {
            let fetched = self.disk.batch_retrieve(&miss_ids)?;
            for ((position, id), record) in miss_positions.into_iter().zip(miss_ids).zip(fetched) {
                if let Some(record) = &record {
                    self.cache.insert(id, record.clone());
                }
                results[position] = record;
            }
        }
        Ok(results)
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, StorageError> {
        let outcomes = self.disk.batch_update(updates)?;
        let mut refreshed = Vec::new();
        for ((id, _), existed) in updates.iter().zip(outcomes.iter()) {
            self.cache.invalidate(id);
            if *existed {
                refreshed.push(id.clone());
            }
        }
        for (id, record) in refreshed.iter().zip(self.disk.batch_retrieve(&refreshed)?) {
            if let Some(record) = record {
                self.cache.insert(id.clone(), record);
            }
        }
        Ok(outcomes)
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, StorageError> {
        let outcomes = self.disk.batch_delete(ids)?;
        for id in ids {
            self.cache.invalidate(id);
        }
        Ok(outcomes)
    }

    fn list(&self, limit: Option<usize>) -> Result<Vec<String>, StorageError> {
        self.disk.list(limit)
    }

    fn list_paginated(&self, page_size: usize, cursor: Option<&str>) -> Result<Page, StorageError> {
        self.disk.list_paginated(page_size, cursor)
    }

    fn stream_ids(&self) -> Result<IdStream, StorageError> {
        self.disk.stream_ids()
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.disk.count()
    }

    fn stats(&self) -> Result<StorageStats, StorageError> {
        let disk_stats = self.disk.stats()?;
        Ok(StorageStats {
            backend: "hybrid",
            record_count: disk_stats.record_count,
            approximate_size_bytes: disk_stats.approximate_size_bytes,
            cache: Some(self.cache.stats()),
        })
    }

    fn close(&self) -> Result<(), StorageError> {
        self.disk.close()?;
        self.cache.clear();
        Ok(())
    }
}
