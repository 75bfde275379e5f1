use crate::arena::SlotArena;
use crate::types::{check_dimensionality, to_neighbors, IndexState};
use crate::utils::TopK;
use crate::{IndexConfig, IndexError, IndexStats, VectorIndex};
use parking_lot::RwLock;
use quiver_types::Neighbor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AnnoyParams {
    /// Trees in the forest; more trees raise recall.
    pub n_trees: usize,
    /// Node-visit budget per query across all trees.
    pub search_k: usize,
    /// Recursion stops once a subset fits in one leaf.
    pub leaf_size: usize,
    pub seed: u64,
}

impl Default for AnnoyParams {
    fn default() -> Self {
        AnnoyParams {
            n_trees: 10,
            search_k: 200,
            leaf_size: 16,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum Node {
    Leaf(Vec<usize>),
    Split {
        normal: Vec<f64>,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Forest {
    arena: SlotArena,
    trees: Vec<Tree>,
    /// Slots inserted after the last (re)build; scanned exhaustively on
    /// every query until a rebuild folds them into the trees.
    pending: Vec<usize>,
    built: bool,
}

/// Forest of random-hyperplane binary trees. Each tree recursively splits
/// the vector set by the hyperplane between two randomly chosen members;
/// queries descend all trees with a shared priority queue until the
/// `search_k` visit budget runs out, then re-rank candidates exactly.
pub struct AnnoyIndex {
    config: IndexConfig,
    params: AnnoyParams,
    state: IndexState,
    inner: RwLock<Inner>,
}

struct Inner {
    forest: Forest,
    rng: StdRng,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

struct QueueEntry {
    priority: f64,
    tree: usize,
    node: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then(self.tree.cmp(&other.tree))
            .then(self.node.cmp(&other.node))
    }
}

impl AnnoyIndex {
    pub fn new(config: IndexConfig, params: AnnoyParams) -> Result<Self, IndexError> {
        if params.n_trees == 0 || params.search_k == 0 || params.leaf_size == 0 {
            return Err(IndexError::InvalidConfiguration(
                "n_trees, search_k, and leaf_size must be positive".to_string(),
            ));
        }
        Ok(AnnoyIndex {
            config,
            params,
            state: IndexState::new(),
            inner: RwLock::new(Inner {
                forest: Forest::default(),
                rng: StdRng::seed_from_u64(params.seed),
            }),
        })
    }

    /// Builds one tree over `slots`, appending nodes and returning the root
    /// node index.
    fn build_subtree(
        &self,
        arena: &SlotArena,
        nodes: &mut Vec<Node>,
        slots: Vec<usize>,
        rng: &mut StdRng,
    ) -> usize {
        if slots.len() <= self.params.leaf_size {
            nodes.push(Node::Leaf(slots));
            return nodes.len() - 1;
        }

        // Split by the hyperplane between two random members. A few
        // attempts; sets that refuse to split become a leaf.
        for _ in 0..3 {
            let a = slots[rng.gen_range(0..slots.len())];
            let b = slots[rng.gen_range(0..slots.len())];
            if a == b {
                continue;
            }
            let va = arena.vector(a);
            let vb = arena.vector(b);
            let normal: Vec<f64> = va.iter().zip(vb.iter()).map(|(x, y)| x - y).collect();
            let midpoint: Vec<f64> = va.iter().zip(vb.iter()).map(|(x, y)| (x + y) / 2.0).collect();
            let threshold = dot(&normal, &midpoint);

            let (left, right): (Vec<usize>, Vec<usize>) = slots
                .iter()
                .copied()
                .partition(|&slot| dot(&normal, arena.vector(slot)) - threshold < 0.0);
            if left.is_empty() || right.is_empty() {
                continue;
            }

            let left_root = self.build_subtree(arena, nodes, left, rng);
            let right_root = self.build_subtree(arena, nodes, right, rng);
            nodes.push(Node::Split {
                normal,
                threshold,
                left: left_root,
                right: right_root,
            });
            return nodes.len() - 1;
        }
        nodes.push(Node::Leaf(slots));
        nodes.len() - 1
    }

    fn build_forest(&self, inner: &mut Inner) {
        let slots = inner.forest.arena.live_slots();
        let mut trees = Vec::with_capacity(self.params.n_trees);
        for _ in 0..self.params.n_trees {
            let mut nodes = Vec::new();
            let root = self.build_subtree(
                &inner.forest.arena,
                &mut nodes,
                slots.clone(),
                &mut inner.rng,
            );
            trees.push(Tree { nodes, root });
        }
        inner.forest.trees = trees;
        inner.forest.pending.clear();
        inner.forest.built = true;
        tracing::debug!(
            trees = self.params.n_trees,
            vectors = slots.len(),
            "annoy forest built"
        );
    }

    fn search_forest(&self, forest: &Forest, query: &[f64], k: usize) -> Vec<Neighbor> {
        let mut candidates: HashSet<usize> = HashSet::new();

        // Priority-queue descent across all trees under one visit budget.
        let mut queue: BinaryHeap<QueueEntry> = BinaryHeap::new();
        for (tree_index, tree) in forest.trees.iter().enumerate() {
            queue.push(QueueEntry {
                priority: f64::INFINITY,
                tree: tree_index,
                node: tree.root,
            });
        }
        let mut visited = 0usize;
        while let Some(entry) = queue.pop() {
            if visited >= self.params.search_k {
                break;
            }
            visited += 1;
            match &forest.trees[entry.tree].nodes[entry.node] {
                Node::Leaf(slots) => candidates.extend(slots.iter().copied()),
                Node::Split {
                    normal,
                    threshold,
                    left,
                    right,
                } => {
                    let margin = dot(normal, query) - threshold;
                    queue.push(QueueEntry {
                        priority: entry.priority.min(margin),
                        tree: entry.tree,
                        node: *right,
                    });
                    queue.push(QueueEntry {
                        priority: entry.priority.min(-margin),
                        tree: entry.tree,
                        node: *left,
                    });
                }
            }
        }

        // Pending inserts are always scanned and re-ranked exactly.
        candidates.extend(forest.pending.iter().copied());

        let mut top = TopK::new(k);
        for slot in candidates {
            if forest.arena.is_live(slot) {
                top.push(
                    self.config.metric.distance(query, forest.arena.vector(slot)),
                    slot,
                );
            }
        }
        to_neighbors(top.into_sorted(), |slot| {
            forest.arena.id_of(slot).to_string()
        })
    }

    fn insert_locked(&self, inner: &mut Inner, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        let slot = inner.forest.arena.insert(id, vector)?;
        inner.forest.pending.push(slot);
        Ok(())
    }
}

impl VectorIndex for AnnoyIndex {
    fn build(&self, vectors: Vec<(String, Vec<f64>)>) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut inner = self.inner.write();
        for (id, vector) in vectors {
            check_dimensionality(self.config.dimensionality, &vector)?;
            inner.forest.arena.insert(&id, &vector)?;
        }
        self.build_forest(&mut inner);
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
        if inner.forest.arena.delete(id).is_none() {
            return Err(IndexError::NotFound(id.to_string()));
        }
        self.insert_locked(&mut inner, id, vector)
    }

    fn delete(&self, id: &str) -> Result<bool, IndexError> {
        self.state.check_ready()?;
        // Tombstone only; tree leaves and the pending list keep the slot
        // and skip it at re-rank time.
        Ok(self.inner.write().forest.arena.delete(id).is_some())
    }

    fn batch_insert(&self, items: &[(String, Vec<f64>)]) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut inner = self.inner.write();
        for (position, (id, vector)) in items.iter().enumerate() {
            let outcome = check_dimensionality(self.config.dimensionality, vector)
                .and_then(|()| self.insert_locked(&mut inner, id, vector));
            if let Err(e) = outcome {
                for (id, _) in &items[..position] {
                    inner.forest.arena.delete(id);
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
            .map(|id| inner.forest.arena.delete(id).is_some())
            .collect())
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.state.check_ready()?;
        check_dimensionality(self.config.dimensionality, query)?;
        Ok(self.search_forest(&self.inner.read().forest, query, k))
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
            .map(|query| self.search_forest(&inner.forest, query, k))
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
                if inner.forest.arena.delete(id).is_none() {
                    return false;
                }
                self.insert_locked(&mut inner, id, vector).is_ok()
            })
            .collect())
    }

    fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        let mut details = serde_json::Map::new();
        details.insert("n_trees".to_string(), self.params.n_trees.into());
        details.insert("search_k".to_string(), self.params.search_k.into());
        details.insert("built".to_string(), inner.forest.built.into());
        details.insert("pending".to_string(), inner.forest.pending.len().into());
        IndexStats {
            index_type: "annoy",
            state: self.state.name(),
            dimensionality: self.config.dimensionality,
            metric: self.config.metric,
            live_count: inner.forest.arena.live_count(),
            total_slots: inner.forest.arena.total_slots(),
            tombstones: inner.forest.arena.tombstone_count(),
            details,
        }
    }

    /// Rebuilds the forest over the live set, folding pending inserts into
    /// the trees and dropping tombstoned slots from the leaves.
    fn optimize(&self) -> Result<(), IndexError> {
        self.state.check_ready()?;
        self.build_forest(&mut self.inner.write());
        Ok(())
    }

    fn snapshot_bytes(&self) -> Result<Vec<u8>, IndexError> {
        bincode::serialize(&self.inner.read().forest)
            .map_err(|e| IndexError::CorruptSnapshot(e.to_string()))
    }

    fn restore_bytes(&self, bytes: &[u8]) -> Result<(), IndexError> {
        let forest: Forest =
            bincode::deserialize(bytes).map_err(|e| IndexError::CorruptSnapshot(e.to_string()))?;
        self.inner.write().forest = forest;
        self.state.mark_ready()
    }

    fn close(&self) {
        self.state.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::FlatIndex;
    use crate::utils::random_vectors;
    use quiver_distance::DistanceFunction;

    fn named(vectors: &[Vec<f64>]) -> Vec<(String, Vec<f64>)> {
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("v{}", i), v.clone()))
            .collect()
    }

    fn index(dim: usize, params: AnnoyParams) -> AnnoyIndex {
        AnnoyIndex::new(IndexConfig::new(dim, DistanceFunction::Euclidean), params).unwrap()
    }

    #[test]
    fn test_generous_budget_matches_flat() {
        let dim = 8;
        let vectors = random_vectors(300, dim, 42);
        let annoy = index(
            dim,
            AnnoyParams {
                n_trees: 12,
                search_k: 10_000,
                ..Default::default()
            },
        );
        let flat = FlatIndex::new(IndexConfig::new(dim, DistanceFunction::Euclidean));
        annoy.build(named(&vectors)).unwrap();
        flat.build(named(&vectors)).unwrap();
        for query in vectors.iter().take(20) {
            assert_eq!(
                annoy.search(query, 5).unwrap(),
                flat.search(query, 5).unwrap()
            );
        }
    }

    #[test]
    fn test_tight_budget_keeps_reasonable_recall() {
        let dim = 8;
        let vectors = random_vectors(500, dim, 42);
        let annoy = index(dim, AnnoyParams::default());
        let flat = FlatIndex::new(IndexConfig::new(dim, DistanceFunction::Euclidean));
        annoy.build(named(&vectors)).unwrap();
        flat.build(named(&vectors)).unwrap();

        let queries = random_vectors(40, dim, 7);
        let k = 10;
        let mut matched = 0usize;
        for query in &queries {
            let truth: std::collections::HashSet<String> = flat
                .search(query, k)
                .unwrap()
                .into_iter()
                .map(|n| n.id)
                .collect();
            matched += annoy
                .search(query, k)
                .unwrap()
                .iter()
                .filter(|n| truth.contains(&n.id))
                .count();
        }
        let recall = matched as f64 / (queries.len() * k) as f64;
        assert!(recall >= 0.5, "recall@10 was {}", recall);
    }

    #[test]
    fn test_pending_inserts_are_exact() {
        let dim = 4;
        let vectors = random_vectors(100, dim, 42);
        let annoy = index(dim, AnnoyParams::default());
        annoy.build(named(&vectors)).unwrap();

        // Post-build inserts live on the pending list and must be found
        // regardless of tree shape.
        let target = vec![50.0, 50.0, 50.0, 50.0];
        annoy.insert("late", &target).unwrap();
        let results = annoy.search(&target, 1).unwrap();
        assert_eq!(results[0].id, "late");
        assert_eq!(annoy.stats().details["pending"], 1);
    }

    #[test]
    fn test_rebuild_flushes_pending() {
        let dim = 4;
        let vectors = random_vectors(50, dim, 42);
        let annoy = index(dim, AnnoyParams::default());
        annoy.build(named(&vectors)).unwrap();
        annoy.insert("late", &[9.0, 9.0, 9.0, 9.0]).unwrap();
        annoy.optimize().unwrap();
        assert_eq!(annoy.stats().details["pending"], 0);
        let results = annoy.search(&[9.0, 9.0, 9.0, 9.0], 1).unwrap();
        assert_eq!(results[0].id, "late");
    }

    #[test]
    fn test_delete_only_marks() {
        let dim = 4;
        let vectors = random_vectors(50, dim, 42);
        let annoy = index(dim, AnnoyParams::default());
        annoy.build(named(&vectors)).unwrap();
        annoy.delete("v0").unwrap();
        // The slot stays in the leaves as a tombstone.
        assert_eq!(annoy.stats().tombstones, 1);
        let results = annoy.search(&vectors[0], 10).unwrap();
        assert!(results.iter().all(|n| n.id != "v0"));
    }

    #[test]
    fn test_unbuilt_index_scans_pending() {
        let annoy = index(2, AnnoyParams::default());
        annoy.insert("a", &[0.0, 0.0]).unwrap();
        annoy.insert("b", &[5.0, 5.0]).unwrap();
        let results = annoy.search(&[0.1, 0.0], 1).unwrap();
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn test_identical_vectors_build_terminates() {
        let annoy = index(2, AnnoyParams { leaf_size: 2, ..Default::default() });
        let vectors: Vec<(String, Vec<f64>)> = (0..20)
            .map(|i| (format!("v{}", i), vec![1.0, 1.0]))
            .collect();
        annoy.build(vectors).unwrap();
        assert_eq!(annoy.search(&[1.0, 1.0], 5).unwrap().len(), 5);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dim = 4;
        let vectors = random_vectors(60, dim, 42);
        let annoy = index(dim, AnnoyParams::default());
        annoy.build(named(&vectors)).unwrap();
        let bytes = annoy.snapshot_bytes().unwrap();
        let restored = index(dim, AnnoyParams::default());
        restored.restore_bytes(&bytes).unwrap();
        for query in vectors.iter().take(5) {
            assert_eq!(
                annoy.search(query, 5).unwrap(),
                restored.search(query, 5).unwrap()
            );
        }
    }
}
