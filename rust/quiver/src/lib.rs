//! Quiver is an embeddable vector database. It composes one storage
//! backend (memory, disk, or a write-through hybrid), one ANN index (flat,
//! HNSW, IVF, LSH, or Annoy), and optionally a vector quantizer behind a
//! single client type that handles id minting, coordinated writes, batch
//! dispatch, and snapshots.

mod client;
mod config;

pub use client::*;
pub use config::*;

pub use quiver_distance::DistanceFunction;
pub use quiver_index::{
    AnnoyParams, HnswParams, IndexParams, IndexStats, IvfParams, LshParams,
};
pub use quiver_quantization::{
    ProductQuantizerParams, QuantizerParams, QuantizerStats, ScalarQuantizerParams,
};
pub use quiver_storage::{MetadataPatch, StorageConfig, StorageStats};
pub use quiver_types::{Metadata, MetadataValue, Page, Record, SearchResult};
