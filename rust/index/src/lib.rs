mod annoy;
mod arena;
mod flat;
mod hnsw;
mod ivf;
mod lsh;
mod types;
mod utils;

pub use annoy::*;
pub use flat::*;
pub use hnsw::*;
pub use ivf::*;
pub use lsh::*;
pub use types::*;

use quiver_types::Neighbor;
use serde::{Deserialize, Serialize};

/// Strategy selection plus the strategy's tuning knobs, as it appears in
/// the configuration surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexParams {
    Flat,
    Hnsw(HnswParams),
    Ivf(IvfParams),
    Lsh(LshParams),
    Annoy(AnnoyParams),
}

impl IndexParams {
    pub fn index_type(&self) -> &'static str {
        match self {
            IndexParams::Flat => "flat",
            IndexParams::Hnsw(_) => "hnsw",
            IndexParams::Ivf(_) => "ivf",
            IndexParams::Lsh(_) => "lsh",
            IndexParams::Annoy(_) => "annoy",
        }
    }
}

/// One index strategy chosen at construction. The facade holds exactly one
/// of these behind the shared [`VectorIndex`] contract.
pub enum Index {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
    Ivf(IvfIndex),
    Lsh(LshIndex),
    Annoy(AnnoyIndex),
}

impl Index {
    pub fn new(config: IndexConfig, params: &IndexParams) -> Result<Self, IndexError> {
        Ok(match params {
            IndexParams::Flat => Index::Flat(FlatIndex::new(config)),
            IndexParams::Hnsw(params) => Index::Hnsw(HnswIndex::new(config, *params)?),
            IndexParams::Ivf(params) => Index::Ivf(IvfIndex::new(config, *params)?),
            IndexParams::Lsh(params) => Index::Lsh(LshIndex::new(config, *params)?),
            IndexParams::Annoy(params) => Index::Annoy(AnnoyIndex::new(config, *params)?),
        })
    }

    pub fn index_type(&self) -> &'static str {
        match self {
            Index::Flat(_) => "flat",
            Index::Hnsw(_) => "hnsw",
            Index::Ivf(_) => "ivf",
            Index::Lsh(_) => "lsh",
            Index::Annoy(_) => "annoy",
        }
    }
}

impl VectorIndex for Index {
    fn build(&self, vectors: Vec<(String, Vec<f64>)>) -> Result<(), IndexError> {
        match self {
            Index::Flat(i) => i.build(vectors),
            Index::Hnsw(i) => i.build(vectors),
            Index::Ivf(i) => i.build(vectors),
            Index::Lsh(i) => i.build(vectors),
            Index::Annoy(i) => i.build(vectors),
        }
    }

    fn insert(&self, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        match self {
            Index::Flat(i) => i.insert(id, vector),
            Index::Hnsw(i) => i.insert(id, vector),
            Index::Ivf(i) => i.insert(id, vector),
            Index::Lsh(i) => i.insert(id, vector),
            Index::Annoy(i) => i.insert(id, vector),
        }
    }

    fn update(&self, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        match self {
            Index::Flat(i) => i.update(id, vector),
            Index::Hnsw(i) => i.update(id, vector),
            Index::Ivf(i) => i.update(id, vector),
            Index::Lsh(i) => i.update(id, vector),
            Index::Annoy(i) => i.update(id, vector),
        }
    }

    fn delete(&self, id: &str) -> Result<bool, IndexError> {
        match self {
            Index::Flat(i) => i.delete(id),
            Index::Hnsw(i) => i.delete(id),
            Index::Ivf(i) => i.delete(id),
            Index::Lsh(i) => i.delete(id),
            Index::Annoy(i) => i.delete(id),
        }
    }

    fn batch_insert(&self, items: &[(String, Vec<f64>)]) -> Result<(), IndexError> {
        match self {
            Index::Flat(i) => i.batch_insert(items),
            Index::Hnsw(i) => i.batch_insert(items),
            Index::Ivf(i) => i.batch_insert(items),
            Index::Lsh(i) => i.batch_insert(items),
            Index::Annoy(i) => i.batch_insert(items),
        }
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, IndexError> {
        match self {
            Index::Flat(i) => i.batch_delete(ids),
            Index::Hnsw(i) => i.batch_delete(ids),
            Index::Ivf(i) => i.batch_delete(ids),
            Index::Lsh(i) => i.batch_delete(ids),
            Index::Annoy(i) => i.batch_delete(ids),
        }
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        match self {
            Index::Flat(i) => i.search(query, k),
            Index::Hnsw(i) => i.search(query, k),
            Index::Ivf(i) => i.search(query, k),
            Index::Lsh(i) => i.search(query, k),
            Index::Annoy(i) => i.search(query, k),
        }
    }

    fn batch_search(
        &self,
        queries: &[Vec<f64>],
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, IndexError> {
        match self {
            Index::Flat(i) => i.batch_search(queries, k),
            Index::Hnsw(i) => i.batch_search(queries, k),
            Index::Ivf(i) => i.batch_search(queries, k),
            Index::Lsh(i) => i.batch_search(queries, k),
            Index::Annoy(i) => i.batch_search(queries, k),
        }
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, IndexError> {
        match self {
            Index::Flat(i) => i.batch_update(updates),
            Index::Hnsw(i) => i.batch_update(updates),
            Index::Ivf(i) => i.batch_update(updates),
            Index::Lsh(i) => i.batch_update(updates),
            Index::Annoy(i) => i.batch_update(updates),
        }
    }

    fn stats(&self) -> IndexStats {
        match self {
            Index::Flat(i) => i.stats(),
            Index::Hnsw(i) => i.stats(),
            Index::Ivf(i) => i.stats(),
            Index::Lsh(i) => i.stats(),
            Index::Annoy(i) => i.stats(),
        }
    }

    fn optimize(&self) -> Result<(), IndexError> {
        match self {
            Index::Flat(i) => i.optimize(),
            Index::Hnsw(i) => i.optimize(),
            Index::Ivf(i) => i.optimize(),
            Index::Lsh(i) => i.optimize(),
            Index::Annoy(i) => i.optimize(),
        }
    }

    fn snapshot_bytes(&self) -> Result<Vec<u8>, IndexError> {
        match self {
            Index::Flat(i) => i.snapshot_bytes(),
            Index::Hnsw(i) => i.snapshot_bytes(),
            Index::Ivf(i) => i.snapshot_bytes(),
            Index::Lsh(i) => i.snapshot_bytes(),
            Index::Annoy(i) => i.snapshot_bytes(),
        }
    }

    fn restore_bytes(&self, bytes: &[u8]) -> Result<(), IndexError> {
        match self {
            Index::Flat(i) => i.restore_bytes(bytes),
            Index::Hnsw(i) => i.restore_bytes(bytes),
            Index::Ivf(i) => i.restore_bytes(bytes),
            Index::Lsh(i) => i.restore_bytes(bytes),
            Index::Annoy(i) => i.restore_bytes(bytes),
        }
    }

    fn close(&self) {
        match self {
            Index::Flat(i) => i.close(),
            Index::Hnsw(i) => i.close(),
            Index::Ivf(i) => i.close(),
            Index::Lsh(i) => i.close(),
            Index::Annoy(i) => i.close(),
        }
    }
}
