use crate::arena::SlotArena;
use crate::types::{check_dimensionality, to_neighbors, IndexState};
use crate::utils::TopK;
use crate::{IndexConfig, IndexError, IndexStats, VectorIndex};
use parking_lot::RwLock;
use quiver_quantization::kmeans::{kmeans, nearest_centroid, KMeansParams};
use quiver_types::Neighbor;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct IvfParams {
    /// Number of coarse centroids, each owning one posting list.
    pub nlist: usize,
    /// Posting lists scanned per query.
    pub nprobe: usize,
    /// Lloyd iteration budget for coarse training.
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for IvfParams {
    fn default() -> Self {
        IvfParams {
            nlist: 100,
            nprobe: 8,
            max_iterations: 30,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Lists {
    arena: SlotArena,
    centroids: Vec<Vec<f64>>,
    postings: Vec<Vec<usize>>,
}

impl Lists {
    fn trained(&self) -> bool {
        !self.centroids.is_empty()
    }
}

/// Inverted-file index over a coarse k-means quantizer. Until the coarse
/// quantizer is trained (by `build` or `optimize`) the index degenerates to
/// an exhaustive scan, so early inserts stay searchable.
pub struct IvfIndex {
    config: IndexConfig,
    params: IvfParams,
    state: IndexState,
    inner: RwLock<Lists>,
}

impl IvfIndex {
    pub fn new(config: IndexConfig, params: IvfParams) -> Result<Self, IndexError> {
        if params.nlist == 0 || params.nprobe == 0 {
            return Err(IndexError::InvalidConfiguration(
                "nlist and nprobe must be positive".to_string(),
            ));
        }
        Ok(IvfIndex {
            config,
            params,
            state: IndexState::new(),
            inner: RwLock::new(Lists::default()),
        })
    }

    fn train_locked(&self, lists: &mut Lists) {
        let live: Vec<Vec<f64>> = lists
            .arena
            .iter_live()
            .map(|(_, vector)| vector.to_vec())
            .collect();
        if live.is_empty() {
            lists.centroids.clear();
            lists.postings.clear();
            return;
        }
        let result = kmeans(
            &live,
            &KMeansParams {
                k: self.params.nlist,
                max_iterations: self.params.max_iterations,
                seed: self.params.seed,
            },
        );
        lists.postings = vec![Vec::new(); result.centroids.len()];
        lists.centroids = result.centroids;
        // Assign every live slot; ties go to the lowest centroid id.
        let slots = lists.arena.live_slots();
        for slot in slots {
            let list = nearest_centroid(lists.arena.vector(slot), &lists.centroids);
            lists.postings[list].push(slot);
        }
        tracing::debug!(
            nlist = lists.centroids.len(),
            vectors = lists.arena.live_count(),
            "coarse quantizer trained"
        );
    }

    fn insert_locked(&self, lists: &mut Lists, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        let slot = lists.arena.insert(id, vector)?;
        if lists.trained() {
            let list = nearest_centroid(vector, &lists.centroids);
            lists.postings[list].push(slot);
        }
        Ok(())
    }

    fn search_lists(&self, lists: &Lists, query: &[f64], k: usize) -> Vec<Neighbor> {
        let mut top = TopK::new(k);
        if lists.trained() {
            let mut by_centroid = TopK::new(self.params.nprobe.min(lists.centroids.len()));
            for (list, centroid) in lists.centroids.iter().enumerate() {
                by_centroid.push(
                    quiver_distance::squared_euclidean_distance(query, centroid),
                    list,
                );
            }
            for (_, list) in by_centroid.into_sorted() {
                for &slot in &lists.postings[list] {
                    if lists.arena.is_live(slot) {
                        top.push(
                            self.config.metric.distance(query, lists.arena.vector(slot)),
                            slot,
                        );
                    }
                }
            }
        } else {
            for (slot, vector) in lists.arena.iter_live() {
                top.push(self.config.metric.distance(query, vector), slot);
            }
        }
        to_neighbors(top.into_sorted(), |slot| lists.arena.id_of(slot).to_string())
    }
}

impl VectorIndex for IvfIndex {
    fn build(&self, vectors: Vec<(String, Vec<f64>)>) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut lists = self.inner.write();
        for (id, vector) in vectors {
            check_dimensionality(self.config.dimensionality, &vector)?;
            lists.arena.insert(&id, &vector)?;
        }
        self.train_locked(&mut lists);
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
        let mut lists = self.inner.write();
        if lists.arena.delete(id).is_none() {
            return Err(IndexError::NotFound(id.to_string()));
        }
        self.insert_locked(&mut lists, id, vector)
    }

    fn delete(&self, id: &str) -> Result<bool, IndexError> {
        self.state.check_ready()?;
        Ok(self.inner.write().arena.delete(id).is_some())
    }

    fn batch_insert(&self, items: &[(String, Vec<f64>)]) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut lists = self.inner.write();
        for (position, (id, vector)) in items.iter().enumerate() {
            let outcome = check_dimensionality(self.config.dimensionality, vector)
                .and_then(|()| self.insert_locked(&mut lists, id, vector));
            if let Err(e) = outcome {
                for (id, _) in &items[..position] {
                    lists.arena.delete(id);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, IndexError> {
        self.state.check_ready()?;
        let mut lists = self.inner.write();
        Ok(ids.iter().map(|id| lists.arena.delete(id).is_some()).collect())
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.state.check_ready()?;
        check_dimensionality(self.config.dimensionality, query)?;
        Ok(self.search_lists(&self.inner.read(), query, k))
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
        let lists = self.inner.read();
        Ok(queries
            .iter()
            .map(|query| self.search_lists(&lists, query, k))
            .collect())
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, IndexError> {
        self.state.check_ready()?;
        let mut lists = self.inner.write();
        Ok(updates
            .iter()
            .map(|(id, vector)| {
                if vector.len() != self.config.dimensionality {
                    return false;
                }
                if lists.arena.delete(id).is_none() {
                    return false;
                }
                self.insert_locked(&mut lists, id, vector).is_ok()
            })
            .collect())
    }

    fn stats(&self) -> IndexStats {
        let lists = self.inner.read();
        let mut details = serde_json::Map::new();
        details.insert("nlist".to_string(), self.params.nlist.into());
        details.insert("nprobe".to_string(), self.params.nprobe.into());
        details.insert("trained".to_string(), lists.trained().into());
        details.insert("centroids".to_string(), lists.centroids.len().into());
        IndexStats {
            index_type: "ivf",
            state: self.state.name(),
            dimensionality: self.config.dimensionality,
            metric: self.config.metric,
            live_count: lists.arena.live_count(),
            total_slots: lists.arena.total_slots(),
            tombstones: lists.arena.tombstone_count(),
            details,
        }
    }

    /// Re-trains the coarse quantizer over the current live set and
    /// rebuilds the posting lists, dropping tombstoned entries.
    fn optimize(&self) -> Result<(), IndexError> {
        self.state.check_ready()?;
        self.train_locked(&mut self.inner.write());
        Ok(())
    }

    fn snapshot_bytes(&self) -> Result<Vec<u8>, IndexError> {
        bincode::serialize(&*self.inner.read())
            .map_err(|e| IndexError::CorruptSnapshot(e.to_string()))
    }

    fn restore_bytes(&self, bytes: &[u8]) -> Result<(), IndexError> {
        let lists: Lists =
            bincode::deserialize(bytes).map_err(|e| IndexError::CorruptSnapshot(e.to_string()))?;
        *self.inner.write() = lists;
        self.state.mark_ready()
    }

    fn close(&self) {
        self.state.close();
    }
}
