use crate::arena::SlotArena;
use crate::types::{check_dimensionality, to_neighbors, IndexState};
use crate::utils::{sample_gaussian, TopK};
use crate::{IndexConfig, IndexError, IndexStats, VectorIndex};
use parking_lot::RwLock;
use quiver_distance::DistanceFunction;
use quiver_types::Neighbor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Bucket width for the p-stable (Euclidean) hash family.
const BUCKET_WIDTH: f64 = 4.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LshParams {
    /// Independent hash tables; more tables raise recall.
    pub num_tables: usize,
    /// Hash functions concatenated per table key; more hashes raise
    /// precision.
    pub num_hashes: usize,
    pub seed: u64,
}

impl Default for LshParams {
    fn default() -> Self {
        LshParams {
            num_tables: 8,
            num_hashes: 12,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct HashTable {
    /// One random projection per hash function.
    planes: Vec<Vec<f64>>,
    /// Projection offsets; used by the p-stable family only.
    offsets: Vec<f64>,
    buckets: HashMap<Vec<i32>, Vec<usize>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Tables {
    arena: SlotArena,
    tables: Vec<HashTable>,
}

/// Locality-sensitive hashing index. Random-hyperplane sign hashes under
/// the cosine metric, p-stable Gaussian projections under Euclidean; other
/// metrics have no sensitive family here and are rejected at construction.
/// Queries union the matching buckets across tables and re-rank the
/// candidates with the exact metric.
pub struct LshIndex {
    config: IndexConfig,
    params: LshParams,
    state: IndexState,
    inner: RwLock<Tables>,
}

impl LshIndex {
    pub fn new(config: IndexConfig, params: LshParams) -> Result<Self, IndexError> {
        match config.metric {
            DistanceFunction::Cosine | DistanceFunction::Euclidean => {}
            other => {
                return Err(IndexError::InvalidConfiguration(format!(
                    "lsh supports cosine and euclidean metrics, not {}",
                    other
                )))
            }
        }
        if params.num_tables == 0 || params.num_hashes == 0 {
            return Err(IndexError::InvalidConfiguration(
                "num_tables and num_hashes must be positive".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(params.seed);
        let tables = (0..params.num_tables)
            .map(|_| HashTable {
                planes: (0..params.num_hashes)
                    .map(|_| {
                        (0..config.dimensionality)
                            .map(|_| sample_gaussian(&mut rng))
                            .collect()
                    })
                    .collect(),
                offsets: (0..params.num_hashes)
                    .map(|_| rng.gen_range(0.0..BUCKET_WIDTH))
                    .collect(),
                buckets: HashMap::new(),
            })
            .collect();
        Ok(LshIndex {
            config,
            params,
            state: IndexState::new(),
            inner: RwLock::new(Tables {
                arena: SlotArena::new(),
                tables,
            }),
        })
    }

    fn hash_key(metric: DistanceFunction, table: &HashTable, vector: &[f64]) -> Vec<i32> {
        table
            .planes
            .iter()
            .zip(table.offsets.iter())
            .map(|(plane, offset)| {
                let projection: f64 = plane.iter().zip(vector.iter()).map(|(p, x)| p * x).sum();
                match metric {
                    DistanceFunction::Cosine => {
                        if projection >= 0.0 {
                            1
                        } else {
                            0
                        }
                    }
                    _ => ((projection + offset) / BUCKET_WIDTH).floor() as i32,
                }
            })
            .collect()
    }

    fn insert_locked(
        &self,
        tables: &mut Tables,
        id: &str,
        vector: &[f64],
    ) -> Result<(), IndexError> {
        let slot = tables.arena.insert(id, vector)?;
        for table in &mut tables.tables {
            let key = Self::hash_key(self.config.metric, table, vector);
            table.buckets.entry(key).or_default().push(slot);
        }
        Ok(())
    }

    fn search_tables(&self, tables: &Tables, query: &[f64], k: usize) -> Vec<Neighbor> {
        let mut candidates: HashSet<usize> = HashSet::new();
        for table in &tables.tables {
            if let Some(bucket) = table
                .buckets
                .get(&Self::hash_key(self.config.metric, table, query))
            {
                candidates.extend(bucket.iter().copied());
            }
        }
        let mut top = TopK::new(k);
        for slot in candidates {
            if tables.arena.is_live(slot) {
                top.push(
                    self.config.metric.distance(query, tables.arena.vector(slot)),
                    slot,
                );
            }
        }
        to_neighbors(top.into_sorted(), |slot| {
            tables.arena.id_of(slot).to_string()
        })
    }
}

impl VectorIndex for LshIndex {
    fn build(&self, vectors: Vec<(String, Vec<f64>)>) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut tables = self.inner.write();
        for (id, vector) in vectors {
            check_dimensionality(self.config.dimensionality, &vector)?;
            self.insert_locked(&mut tables, &id, &vector)?;
        }
        Ok(())
    }

    fn insert(&self, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        check_dimensionality(self.config.dimensionality, vector)?;
        self.state.mark_ready()?;
        self.insert_locked(&mut self.inner.write(), id, vector)
    }

    fn update(&self, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        self.state.check_ready()?;
        check_dimensionality(self.config.dimensionality, vector)?;
        let mut tables = self.inner.write();
        if tables.arena.delete(id).is_none() {
            return Err(IndexError::NotFound(id.to_string()));
        }
        self.insert_locked(&mut tables, id, vector)
    }

    fn delete(&self, id: &str) -> Result<bool, IndexError> {
        self.state.check_ready()?;
        Ok(self.inner.write().arena.delete(id).is_some())
    }

    fn batch_insert(&self, items: &[(String, Vec<f64>)]) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut tables = self.inner.write();
        for (position, (id, vector)) in items.iter().enumerate() {
            let outcome = check_dimensionality(self.config.dimensionality, vector)
                .and_then(|()| self.insert_locked(&mut tables, id, vector));
            if let Err(e) = outcome {
                for (id, _) in &items[..position] {
                    tables.arena.delete(id);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, IndexError> {
        self.state.check_ready()?;
        let mut tables = self.inner.write();
        Ok(ids
            .iter()
            .map(|id| tables.arena.delete(id).is_some())
            .collect())
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.state.check_ready()?;
        check_dimensionality(self.config.dimensionality, query)?;
        Ok(self.search_tables(&self.inner.read(), query, k))
    }

    fn batch_search(
        &self,
        queries: &[Vec<f64>],
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, IndexError> {
        self.state.check_ready()?;
        for query in queries {
            check_dimensionality(self.config.dimensionality, query)?;
        }
        let tables = self.inner.read();
        Ok(queries
            .iter()
            .map(|query| self.search_tables(&tables, query, k))
            .collect())
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, IndexError> {
        self.state.check_ready()?;
        let mut tables = self.inner.write();
        Ok(updates
            .iter()
            .map(|(id, vector)| {
                if vector.len() != self.config.dimensionality {
                    return false;
                }
                if tables.arena.delete(id).is_none() {
                    return false;
                }
                self.insert_locked(&mut tables, id, vector).is_ok()
            })
            .collect())
    }

    fn stats(&self) -> IndexStats {
        let tables = self.inner.read();
        let buckets: usize = tables.tables.iter().map(|t| t.buckets.len()).sum();
        let mut details = serde_json::Map::new();
        details.insert("num_tables".to_string(), self.params.num_tables.into());
        details.insert("num_hashes".to_string(), self.params.num_hashes.into());
        details.insert("buckets".to_string(), buckets.into());
        IndexStats {
            index_type: "lsh",
            state: self.state.name(),
            dimensionality: self.config.dimensionality,
            metric: self.config.metric,
            live_count: tables.arena.live_count(),
            total_slots: tables.arena.total_slots(),
            tombstones: tables.arena.tombstone_count(),
            details,
        }
    }

    fn snapshot_bytes(&self) -> Result<Vec<u8>, IndexError> {
        bincode::serialize(&*self.inner.read())
            .map_err(|e| IndexError::CorruptSnapshot(e.to_string()))
    }

    fn restore_bytes(&self, bytes: &[u8]) -> Result<(), IndexError> {
        let tables: Tables =
            bincode::deserialize(bytes).map_err(|e| IndexError::CorruptSnapshot(e.to_string()))?;
        *self.inner.write() = tables;
        self.state.mark_ready()
    }

    fn close(&self) {
        self.state.close();
    }
}
