mod disk;
mod hybrid;
mod memory;
mod types;

pub use disk::*;
pub use hybrid::*;
pub use memory::*;
pub use types::*;

use quiver_cache::CacheConfig;
use quiver_types::{Metadata, Page};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for choosing and parameterizing a storage backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory,
    Disk {
        data_dir: PathBuf,
    },
    Hybrid {
        data_dir: PathBuf,
        /// Maximum records held in memory in front of the disk store.
        cache_size: usize,
        /// Optional idle-expiry TTL for cached records, in minutes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_expire_minutes: Option<u64>,
    },
}

/// One storage backend chosen at construction. The facade holds exactly one
/// of these; dispatch is a plain match so the hot paths stay monomorphic
/// inside each variant.
pub enum Storage {
    Memory(MemoryStorage),
    Disk(DiskStorage),
    Hybrid(HybridStorage),
}

impl Storage {
    pub fn new(config: &StorageConfig) -> Self {
        match config {
            StorageConfig::Memory => Storage::Memory(MemoryStorage::new()),
            StorageConfig::Disk { data_dir } => Storage::Disk(DiskStorage::new(data_dir)),
            StorageConfig::Hybrid {
                data_dir,
                cache_size,
                cache_expire_minutes,
            } => {
                let mut cache_config = CacheConfig::new(*cache_size);
                if let Some(minutes) = cache_expire_minutes {
                    cache_config = cache_config.with_time_to_idle(Duration::from_secs(minutes * 60));
                }
                Storage::Hybrid(HybridStorage::new(data_dir, &cache_config))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Storage::Memory(_) => "memory",
            Storage::Disk(_) => "disk",
            Storage::Hybrid(_) => "hybrid",
        }
    }
}

impl VectorStorage for Storage {
    fn initialize(&self) -> Result<(), StorageError> {
        match self {
            Storage::Memory(s) => s.initialize(),
            Storage::Disk(s) => s.initialize(),
            Storage::Hybrid(s) => s.initialize(),
        }
    }

    fn store(
        &self,
        id: &str,
        vector: &[f64],
        metadata: Option<&Metadata>,
    ) -> Result<(), StorageError> {
        match self {
            Storage::Memory(s) => s.store(id, vector, metadata),
            Storage::Disk(s) => s.store(id, vector, metadata),
            Storage::Hybrid(s) => s.store(id, vector, metadata),
        }
    }

    fn retrieve(&self, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        match self {
            Storage::Memory(s) => s.retrieve(id),
            Storage::Disk(s) => s.retrieve(id),
            Storage::Hybrid(s) => s.retrieve(id),
        }
    }

    fn update(
        &self,
        id: &str,
        vector: Option<&[f64]>,
        metadata: MetadataPatch,
    ) -> Result<bool, StorageError> {
        match self {
            Storage::Memory(s) => s.update(id, vector, metadata),
            Storage::Disk(s) => s.update(id, vector, metadata),
            Storage::Hybrid(s) => s.update(id, vector, metadata),
        }
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        match self {
            Storage::Memory(s) => s.delete(id),
            Storage::Disk(s) => s.delete(id),
            Storage::Hybrid(s) => s.delete(id),
        }
    }

    fn contains(&self, id: &str) -> Result<bool, StorageError> {
        match self {
            Storage::Memory(s) => s.contains(id),
            Storage::Disk(s) => s.contains(id),
            Storage::Hybrid(s) => s.contains(id),
        }
    }

    fn batch_store(
        &self,
        records: &[(String, Vec<f64>, Option<Metadata>)],
    ) -> Result<(), StorageError> {
        match self {
            Storage::Memory(s) => s.batch_store(records),
            Storage::Disk(s) => s.batch_store(records),
            Storage::Hybrid(s) => s.batch_store(records),
        }
    }

    fn batch_contains(&self, ids: &[String]) -> Result<Vec<bool>, StorageError> {
        match self {
            Storage::Memory(s) => s.batch_contains(ids),
            Storage::Disk(s) => s.batch_contains(ids),
            Storage::Hybrid(s) => s.batch_contains(ids),
        }
    }

    fn batch_retrieve(&self, ids: &[String]) -> Result<Vec<Option<StoredRecord>>, StorageError> {
        match self {
            Storage::Memory(s) => s.batch_retrieve(ids),
            Storage::Disk(s) => s.batch_retrieve(ids),
            Storage::Hybrid(s) => s.batch_retrieve(ids),
        }
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, StorageError> {
        match self {
            Storage::Memory(s) => s.batch_update(updates),
            Storage::Disk(s) => s.batch_update(updates),
            Storage::Hybrid(s) => s.batch_update(updates),
        }
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, StorageError> {
        match self {
            Storage::Memory(s) => s.batch_delete(ids),
            Storage::Disk(s) => s.batch_delete(ids),
            Storage::Hybrid(s) => s.batch_delete(ids),
        }
    }

    fn list(&self, limit: Option<usize>) -> Result<Vec<String>, StorageError> {
        match self {
            Storage::Memory(s) => s.list(limit),
            Storage::Disk(s) => s.list(limit),
            Storage::Hybrid(s) => s.list(limit),
        }
    }

    fn list_paginated(&self, page_size: usize, cursor: Option<&str>) -> Result<Page, StorageError> {
        match self {
            Storage::Memory(s) => s.list_paginated(page_size, cursor),
            Storage::Disk(s) => s.list_paginated(page_size, cursor),
            Storage::Hybrid(s) => s.list_paginated(page_size, cursor),
        }
    }

    fn stream_ids(&self) -> Result<IdStream, StorageError> {
        match self {
            Storage::Memory(s) => s.stream_ids(),
            Storage::Disk(s) => s.stream_ids(),
            Storage::Hybrid(s) => s.stream_ids(),
        }
    }

    fn count(&self) -> Result<usize, StorageError> {
        match self {
            Storage::Memory(s) => s.count(),
            Storage::Disk(s) => s.count(),
            Storage::Hybrid(s) => s.count(),
        }
    }

    fn stats(&self) -> Result<StorageStats, StorageError> {
        match self {
            Storage::Memory(s) => s.stats(),
            Storage::Disk(s) => s.stats(),
            Storage::Hybrid(s) => s.stats(),
        }
    }

    fn close(&self) -> Result<(), StorageError> {
        match self {
            Storage::Memory(s) => s.close(),
            Storage::Disk(s) => s.close(),
            Storage::Hybrid(s) => s.close(),
        }
    }
}
