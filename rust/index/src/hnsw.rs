use crate::arena::SlotArena;
use crate::types::{check_dimensionality, to_neighbors, IndexState};
use crate::{IndexConfig, IndexError, IndexStats, VectorIndex};
use parking_lot::RwLock;
use quiver_types::Neighbor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HnswParams {
    /// Neighbors kept per node on the upper layers; layer 0 keeps twice as
    /// many.
    pub m: usize,
    /// Candidate-list width while wiring a new node in.
    pub ef_construction: usize,
    /// Candidate-list width at query time; widened to `k` when `k` is
    /// larger.
    pub ef_search: usize,
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        HnswParams {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            seed: 42,
        }
    }
}

/// Serializable graph state: adjacency per slot per layer, plus the entry
/// point. Tombstoned slots keep their edges until a compaction rewrite, so
/// the graph stays navigable through them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Graph {
    arena: SlotArena,
    links: Vec<Vec<Vec<usize>>>,
    levels: Vec<usize>,
    entry_point: Option<usize>,
    max_level: usize,
}

struct Inner {
    graph: Graph,
    rng: StdRng,
}

/// Hierarchical Navigable Small World graph. Insertion wires each new node
/// into a stack of proximity layers; queries greedy-descend the upper
/// layers and run a bounded best-first search on layer 0.
pub struct HnswIndex {
    config: IndexConfig,
    params: HnswParams,
    level_multiplier: f64,
    state: IndexState,
    inner: RwLock<Inner>,
}

struct Candidate {
    distance: f64,
    slot: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.slot.cmp(&other.slot))
    }
}

impl HnswIndex {
    pub fn new(config: IndexConfig, params: HnswParams) -> Result<Self, IndexError> {
        if params.m < 2 {
            return Err(IndexError::InvalidConfiguration(format!(
                "m must be at least 2, got {}",
                params.m
            )));
        }
        if params.ef_construction == 0 || params.ef_search == 0 {
            return Err(IndexError::InvalidConfiguration(
                "ef_construction and ef_search must be positive".to_string(),
            ));
        }
        Ok(HnswIndex {
            level_multiplier: 1.0 / (params.m as f64).ln(),
            config,
            params,
            state: IndexState::new(),
            inner: RwLock::new(Inner {
                graph: Graph::default(),
                rng: StdRng::seed_from_u64(params.seed),
            }),
        })
    }

    fn max_links(&self, level: usize) -> usize {
        if level == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    fn draw_level(&self, rng: &mut StdRng) -> usize {
        let u: f64 = rng.gen_range(f64::EPSILON..1.0);
        (-u.ln() * self.level_multiplier).floor() as usize
    }

    fn distance(&self, graph: &Graph, query: &[f64], slot: usize) -> f64 {
        self.config.metric.distance(query, graph.arena.vector(slot))
    }

    /// Single-step greedy descent: follow the nearest neighbor at `level`
    /// until no neighbor improves on the current node.
    fn greedy_descend(&self, graph: &Graph, query: &[f64], start: usize, level: usize) -> usize {
        let mut current = start;
        let mut current_distance = self.distance(graph, query, current);
        loop {
            let mut improved = false;
            for &neighbor in &graph.links[current][level] {
                let d = self.distance(graph, query, neighbor);
                if d < current_distance {
                    current = neighbor;
                    current_distance = d;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Bounded best-first search at one layer. Returns up to `ef`
    /// candidates, unsorted. Tombstoned slots participate in traversal and
    /// in the returned set; callers filter them from results.
    fn search_layer(
        &self,
        graph: &Graph,
        query: &[f64],
        entry_points: &[usize],
        ef: usize,
        level: usize,
    ) -> Vec<(f64, usize)> {
        let mut visited: HashSet<usize> = HashSet::new();
        // Min-heap of frontier nodes, max-heap of the ef best seen.
        let mut frontier: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let d = self.distance(graph, query, ep);
                frontier.push(std::cmp::Reverse(Candidate {
                    distance: d,
                    slot: ep,
                }));
                best.push(Candidate {
                    distance: d,
                    slot: ep,
                });
            }
        }
        while best.len() > ef {
            best.pop();
        }

        while let Some(std::cmp::Reverse(current)) = frontier.pop() {
            if let Some(worst) = best.peek() {
                if best.len() >= ef && current.distance > worst.distance {
                    break;
                }
            }
            for &neighbor in &graph.links[current.slot][level] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.distance(graph, query, neighbor);
                let admit = best.len() < ef
                    || best
                        .peek()
                        .map(|worst| d < worst.distance)
                        .unwrap_or(true);
                if admit {
                    frontier.push(std::cmp::Reverse(Candidate {
                        distance: d,
                        slot: neighbor,
                    }));
                    best.push(Candidate {
                        distance: d,
                        slot: neighbor,
                    });
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        best.into_iter()
            .map(|candidate| (candidate.distance, candidate.slot))
            .collect()
    }

    /// The keep-pruned neighbor heuristic: walk candidates nearest-first
    /// and keep one only if it is closer to the query than to every
    /// neighbor already kept, so the kept set spreads in direction instead
    /// of clustering.
    fn select_neighbors(
        &self,
        graph: &Graph,
        sorted_candidates: &[(f64, usize)],
        m: usize,
    ) -> Vec<usize> {
        let mut selected: Vec<usize> = Vec::with_capacity(m);
        for &(distance_to_query, candidate) in sorted_candidates {
            if selected.len() >= m {
                break;
            }
            let diverse = selected.iter().all(|&kept| {
                self.config
                    .metric
                    .distance(graph.arena.vector(candidate), graph.arena.vector(kept))
                    >= distance_to_query
            });
            if diverse {
                selected.push(candidate);
            }
        }
        selected
    }

    fn prune_links(&self, graph: &mut Graph, slot: usize, level: usize) {
        let vector = graph.arena.vector(slot).to_vec();
        let mut candidates: Vec<(f64, usize)> = graph.links[slot][level]
            .iter()
            .map(|&neighbor| (self.distance(graph, &vector, neighbor), neighbor))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        graph.links[slot][level] = self.select_neighbors(graph, &candidates, self.max_links(level));
    }

    fn insert_locked(&self, inner: &mut Inner, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        let level = self.draw_level(&mut inner.rng);
        let graph = &mut inner.graph;
        let slot = graph.arena.insert(id, vector)?;
        graph.links.push(vec![Vec::new(); level + 1]);
        graph.levels.push(level);

        let Some(entry) = graph.entry_point else {
            graph.entry_point = Some(slot);
            graph.max_level = level;
            return Ok(());
        };

        let mut ep = entry;
        if graph.max_level > level {
            for lc in ((level + 1)..=graph.max_level).rev() {
                ep = self.greedy_descend(graph, vector, ep, lc);
            }
        }

        let mut entry_points = vec![ep];
        for lc in (0..=level.min(graph.max_level)).rev() {
            let mut candidates =
                self.search_layer(graph, vector, &entry_points, self.params.ef_construction, lc);
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let selected = self.select_neighbors(graph, &candidates, self.params.m);
            graph.links[slot][lc] = selected.clone();
            for neighbor in selected {
                graph.links[neighbor][lc].push(slot);
                if graph.links[neighbor][lc].len() > self.max_links(lc) {
                    self.prune_links(graph, neighbor, lc);
                }
            }
            entry_points = candidates.iter().map(|&(_, s)| s).collect();
        }

        if level > graph.max_level {
            graph.max_level = level;
            graph.entry_point = Some(slot);
        }
        Ok(())
    }

    fn search_graph(&self, graph: &Graph, query: &[f64], k: usize) -> Vec<Neighbor> {
        let Some(entry) = graph.entry_point else {
            return Vec::new();
        };
        let mut ep = entry;
        for lc in (1..=graph.max_level).rev() {
            ep = self.greedy_descend(graph, query, ep, lc);
        }
        let ef = self.params.ef_search.max(k);
        let mut candidates = self.search_layer(graph, query, &[ep], ef, 0);
        candidates.retain(|&(_, slot)| graph.arena.is_live(slot));
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.truncate(k);
        to_neighbors(candidates, |slot| graph.arena.id_of(slot).to_string())
    }
}

impl VectorIndex for HnswIndex {
    fn build(&self, vectors: Vec<(String, Vec<f64>)>) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut inner = self.inner.write();
        for (id, vector) in vectors {
            check_dimensionality(self.config.dimensionality, &vector)?;
            self.insert_locked(&mut inner, &id, &vector)?;
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
        let mut inner = self.inner.write();
        if inner.graph.arena.delete(id).is_none() {
            return Err(IndexError::NotFound(id.to_string()));
        }
        self.insert_locked(&mut inner, id, vector)
    }

    fn delete(&self, id: &str) -> Result<bool, IndexError> {
        self.state.check_ready()?;
        Ok(self.inner.write().graph.arena.delete(id).is_some())
    }

    fn batch_insert(&self, items: &[(String, Vec<f64>)]) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut inner = self.inner.write();
        for (position, (id, vector)) in items.iter().enumerate() {
            let outcome = check_dimensionality(self.config.dimensionality, vector)
                .and_then(|()| self.insert_locked(&mut inner, id, vector));
            if let Err(e) = outcome {
                for (id, _) in &items[..position] {
                    inner.graph.arena.delete(id);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, IndexError> {
        self.state.check_ready()?;
        let mut inner = self.inner.write();
        Ok(ids
            .iter()
            .map(|id| inner.graph.arena.delete(id).is_some())
            .collect())
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.state.check_ready()?;
        check_dimensionality(self.config.dimensionality, query)?;
        Ok(self.search_graph(&self.inner.read().graph, query, k))
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
        let inner = self.inner.read();
        Ok(queries
            .iter()
            .map(|query| self.search_graph(&inner.graph, query, k))
            .collect())
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, IndexError> {
        self.state.check_ready()?;
        let mut inner = self.inner.write();
        Ok(updates
            .iter()
            .map(|(id, vector)| {
                if vector.len() != self.config.dimensionality {
                    return false;
                }
                if inner.graph.arena.delete(id).is_none() {
                    return false;
                }
                self.insert_locked(&mut inner, id, vector).is_ok()
            })
            .collect())
    }

    fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        let mut details = serde_json::Map::new();
        details.insert("m".to_string(), self.params.m.into());
        details.insert(
            "ef_construction".to_string(),
            self.params.ef_construction.into(),
        );
        details.insert("ef_search".to_string(), self.params.ef_search.into());
        details.insert("max_level".to_string(), inner.graph.max_level.into());
        IndexStats {
            index_type: "hnsw",
            state: self.state.name(),
            dimensionality: self.config.dimensionality,
            metric: self.config.metric,
            live_count: inner.graph.arena.live_count(),
            total_slots: inner.graph.arena.total_slots(),
            tombstones: inner.graph.arena.tombstone_count(),
            details,
        }
    }

    fn snapshot_bytes(&self) -> Result<Vec<u8>, IndexError> {
        bincode::serialize(&self.inner.read().graph)
            .map_err(|e| IndexError::CorruptSnapshot(e.to_string()))
    }

    fn restore_bytes(&self, bytes: &[u8]) -> Result<(), IndexError> {
        let graph: Graph =
            bincode::deserialize(bytes).map_err(|e| IndexError::CorruptSnapshot(e.to_string()))?;
        self.inner.write().graph = graph;
        self.state.mark_ready()
    }

    fn close(&self) {
        self.state.close();
    }
}
