use crate::{
    paginate, IdStream, Lifecycle, MetadataPatch, StorageError, StorageStats, StoredRecord,
    VectorStorage,
};
use parking_lot::RwLock;
use quiver_types::{Metadata, Page};
use std::fs;
use std::path::{Path, PathBuf};

const VECTOR_EXTENSION: &str = "vec";
const METADATA_EXTENSION: &str = "json";

/// Durable backend: one `{id}.vec` binary file per record plus an optional
/// `{id}.json` metadata sidecar, under `vectors/` and `metadata/` inside
/// the root directory.
///
/// Vector file layout is big-endian: a 4-byte signed dimensionality header
/// followed by that many IEEE-754 doubles. There is no per-file checksum; a
/// torn write shows up as a malformed length and is reported as a corrupt
/// record.
pub struct DiskStorage {
    vectors_dir: PathBuf,
    metadata_dir: PathBuf,
    lock: RwLock<()>,
    lifecycle: Lifecycle,
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_` so ids are
/// safe as file names. Callers with collision-prone ids pre-encode them.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn encode_vector(vector: &[f64]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(4 + vector.len() * 8);
    buffer.extend_from_slice(&(vector.len() as i32).to_be_bytes());
    for &x in vector {
        buffer.extend_from_slice(&x.to_be_bytes());
    }
    buffer
}

fn decode_vector(id: &str, buffer: &[u8]) -> Result<Vec<f64>, StorageError> {
    if buffer.len() < 4 {
        return Err(StorageError::CorruptRecord {
            id: id.to_string(),
            reason: format!("file is {} bytes, header needs 4", buffer.len()),
        });
    }
    let dim = i32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    if dim < 0 {
        return Err(StorageError::CorruptRecord {
            id: id.to_string(),
            reason: format!("negative dimensionality {}", dim),
        });
    }
    let expected = 4 + dim as usize * 8;
    if buffer.len() != expected {
        return Err(StorageError::CorruptRecord {
            id: id.to_string(),
            reason: format!("expected {} bytes for {} dimensions, found {}", expected, dim, buffer.len()),
        });
    }
    let mut vector = Vec::with_capacity(dim as usize);
    for chunk in buffer[4..].chunks_exact(8) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        vector.push(f64::from_be_bytes(bytes));
    }
    Ok(vector)
}

impl DiskStorage {
    pub fn new(root: &Path) -> Self {
        DiskStorage {
            vectors_dir: root.join("vectors"),
            metadata_dir: root.join("metadata"),
            lock: RwLock::new(()),
            lifecycle: Lifecycle::new(),
        }
    }

    fn vector_path(&self, id: &str) -> PathBuf {
        self.vectors_dir
            .join(format!("{}.{}", sanitize_id(id), VECTOR_EXTENSION))
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.metadata_dir
            .join(format!("{}.{}", sanitize_id(id), METADATA_EXTENSION))
    }

    fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn read_metadata(&self, id: &str) -> Result<Option<Metadata>, StorageError> {
        match fs::read(self.metadata_path(id)) {
            Ok(bytes) => {
                let metadata =
                    serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptRecord {
                        id: id.to_string(),
                        reason: format!("metadata is not valid JSON: {}", e),
                    })?;
                Ok(Some(metadata))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn sorted_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.vectors_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".vec") {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), StorageError> {
        self.lifecycle.check_ready()
    }

    // The `_locked` helpers assume the caller holds `self.lock`; the trait
    // methods and the batch variants acquire it once around them.

    fn store_locked(
        &self,
        id: &str,
        vector: &[f64],
        metadata: Option<&Metadata>,
    ) -> Result<(), StorageError> {
        fs::write(self.vector_path(id), encode_vector(vector))?;
        match metadata {
            Some(metadata) => {
                fs::write(self.metadata_path(id), serde_json::to_vec(metadata)?)?;
            }
            None => {
                Self::remove_if_exists(&self.metadata_path(id))?;
            }
        }
        Ok(())
    }

    fn retrieve_locked(&self, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        let buffer = match fs::read(self.vector_path(id)) {
            Ok(buffer) => buffer,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(StoredRecord {
            vector: decode_vector(id, &buffer)?,
            metadata: self.read_metadata(id)?,
        }))
    }

    fn update_locked(
        &self,
        id: &str,
        vector: Option<&[f64]>,
        metadata: MetadataPatch,
    ) -> Result<bool, StorageError> {
        if !self.vector_path(id).exists() {
            return Ok(false);
        }
        if let Some(vector) = vector {
            fs::write(self.vector_path(id), encode_vector(vector))?;
        }
        match metadata {
            MetadataPatch::Keep => {}
            MetadataPatch::Clear => {
                Self::remove_if_exists(&self.metadata_path(id))?;
            }
            MetadataPatch::Set(metadata) => {
                fs::write(self.metadata_path(id), serde_json::to_vec(&metadata)?)?;
            }
        }
        Ok(true)
    }

    fn delete_locked(&self, id: &str) -> Result<bool, StorageError> {
        let existed = Self::remove_if_exists(&self.vector_path(id))?;
        Self::remove_if_exists(&self.metadata_path(id))?;
        Ok(existed)
    }

    fn dir_size(dir: &Path) -> Result<u64, StorageError> {
        let mut total = 0u64;
        for entry in fs::read_dir(dir)? {
            total += entry?.metadata()?.len();
        }
        Ok(total)
    }
}

impl VectorStorage for DiskStorage {
    fn initialize(&self) -> Result<(), StorageError> {
        self.lifecycle.open()?;
        fs::create_dir_all(&self.vectors_dir)?;
        fs::create_dir_all(&self.metadata_dir)?;
        let count = self.sorted_ids()?.len();
        tracing::debug!(count, dir = %self.vectors_dir.display(), "disk storage opened");
        Ok(())
    }

    fn store(
        &self,
        id: &str,
        vector: &[f64],
        metadata: Option<&Metadata>,
    ) -> Result<(), StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.write();
        self.store_locked(id, vector, metadata)
    }

    fn retrieve(&self, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.read();
        self.retrieve_locked(id)
    }

    fn update(
        &self,
        id: &str,
        vector: Option<&[f64]>,
        metadata: MetadataPatch,
    ) -> Result<bool, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.write();
        self.update_locked(id, vector, metadata)
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.write();
        self.delete_locked(id)
    }

    fn contains(&self, id: &str) -> Result<bool, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.read();
        Ok(self.vector_path(id).exists())
    }

    fn batch_store(
        &self,
        records: &[(String, Vec<f64>, Option<Metadata>)],
    ) -> Result<(), StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.write();
        for (id, vector, metadata) in records {
            self.store_locked(id, vector, metadata.as_ref())?;
        }
        Ok(())
    }

    fn batch_contains(&self, ids: &[String]) -> Result<Vec<bool>, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.read();
        Ok(ids.iter().map(|id| self.vector_path(id).exists()).collect())
    }

    fn batch_retrieve(&self, ids: &[String]) -> Result<Vec<Option<StoredRecord>>, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.read();
        ids.iter().map(|id| self.retrieve_locked(id)).collect()
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.write();
        updates
            .iter()
            .map(|(id, vector)| self.update_locked(id, Some(vector), MetadataPatch::Keep))
            .collect()
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.write();
        ids.iter().map(|id| self.delete_locked(id)).collect()
    }

    fn list(&self, limit: Option<usize>) -> Result<Vec<String>, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.read();
        let mut ids = self.sorted_ids()?;
        if let Some(limit) = limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    fn list_paginated(&self, page_size: usize, cursor: Option<&str>) -> Result<Page, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.read();
        paginate(&self.sorted_ids()?, page_size, cursor)
    }

    fn stream_ids(&self) -> Result<IdStream, StorageError> {
        self.lifecycle.check_ready()?;
        // Snapshot the directory under the read lock; handing out a live
        // directory stream would let a concurrent writer race the scan.
        let _guard = self.lock.read();
        let ids = self.sorted_ids()?;
        Ok(Box::new(ids.into_iter().map(Ok)))
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.read();
        Ok(self.sorted_ids()?.len())
    }

    fn stats(&self) -> Result<StorageStats, StorageError> {
        self.lifecycle.check_ready()?;
        let _guard = self.lock.read();
        Ok(StorageStats {
            backend: "disk",
            record_count: self.sorted_ids()?.len(),
            approximate_size_bytes: Self::dir_size(&self.vectors_dir)?
                + Self::dir_size(&self.metadata_dir)?,
            cache: None,
        })
    }

    fn close(&self) -> Result<(), StorageError> {
        self.lifecycle.close();
        Ok(())
    }
}
