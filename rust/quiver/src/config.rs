use quiver_distance::DistanceFunction;
use quiver_index::IndexParams;
use quiver_quantization::QuantizerParams;
use quiver_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_index() -> IndexParams {
    IndexParams::Flat
}

/// Top-level client configuration: the fixed dimensionality and metric,
/// one storage backend, one index strategy, and the optional quantizer and
/// snapshot settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuiverConfig {
    pub dimensions: usize,
    pub metric: DistanceFunction,
    pub storage: StorageConfig,
    #[serde(default = "default_index")]
    pub index: IndexParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantizer: Option<QuantizerParams>,
    /// Directory for snapshot artifacts; snapshots are disabled without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<PathBuf>,
    /// Write a snapshot as part of `close()`.
    #[serde(default)]
    pub persist_on_close: bool,
    /// Gzip the records section of `vectors.bin`.
    #[serde(default)]
    pub snapshot_gzip: bool,
}

impl QuiverConfig {
    /// A memory-backed flat-index configuration; the starting point most
    /// embedders tweak from.
    pub fn in_memory(dimensions: usize, metric: DistanceFunction) -> Self {
        QuiverConfig {
            dimensions,
            metric,
            storage: StorageConfig::Memory,
            index: IndexParams::Flat,
            quantizer: None,
            snapshot_dir: None,
            persist_on_close: false,
            snapshot_gzip: false,
        }
    }
}
