use crate::arena::SlotArena;
use crate::types::{check_dimensionality, to_neighbors, IndexState};
use crate::utils::TopK;
use crate::{IndexConfig, IndexError, IndexStats, VectorIndex};
use parking_lot::RwLock;
use quiver_types::Neighbor;

/// Exhaustive-scan index. Always exact; O(N·D) per query. The baseline the
/// approximate strategies are measured against.
pub struct FlatIndex {
    config: IndexConfig,
    state: IndexState,
    inner: RwLock<SlotArena>,
}

impl FlatIndex {
    pub fn new(config: IndexConfig) -> Self {
        FlatIndex {
            config,
            state: IndexState::new(),
            inner: RwLock::new(SlotArena::new()),
        }
    }

    fn search_arena(&self, arena: &SlotArena, query: &[f64], k: usize) -> Vec<Neighbor> {
        let mut top = TopK::new(k);
        for (slot, vector) in arena.iter_live() {
            top.push(self.config.metric.distance(query, vector), slot);
        }
        to_neighbors(top.into_sorted(), |slot| arena.id_of(slot).to_string())
    }
}

impl VectorIndex for FlatIndex {
    fn build(&self, vectors: Vec<(String, Vec<f64>)>) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut arena = self.inner.write();
        for (id, vector) in vectors {
            check_dimensionality(self.config.dimensionality, &vector)?;
            arena.insert(&id, &vector)?;
        }
        Ok(())
    }

    fn insert(&self, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        check_dimensionality(self.config.dimensionality, vector)?;
        self.state.mark_ready()?;
        self.inner.write().insert(id, vector)?;
        Ok(())
    }

    fn update(&self, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        self.state.check_ready()?;
        check_dimensionality(self.config.dimensionality, vector)?;
        let mut arena = self.inner.write();
        if arena.delete(id).is_none() {
            return Err(IndexError::NotFound(id.to_string()));
        }
        arena.insert(id, vector)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, IndexError> {
        self.state.check_ready()?;
        Ok(self.inner.write().delete(id).is_some())
    }

    fn batch_insert(&self, items: &[(String, Vec<f64>)]) -> Result<(), IndexError> {
        self.state.mark_ready()?;
        let mut arena = self.inner.write();
        for (position, (id, vector)) in items.iter().enumerate() {
            let outcome = check_dimensionality(self.config.dimensionality, vector)
                .and_then(|()| arena.insert(id, vector).map(|_| ()));
            if let Err(e) = outcome {
                for (id, _) in &items[..position] {
                    arena.delete(id);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn batch_delete(&self, ids: &[String]) -> Result<Vec<bool>, IndexError> {
        self.state.check_ready()?;
        let mut arena = self.inner.write();
        Ok(ids.iter().map(|id| arena.delete(id).is_some()).collect())
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.state.check_ready()?;
        check_dimensionality(self.config.dimensionality, query)?;
        Ok(self.search_arena(&self.inner.read(), query, k))
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
        let arena = self.inner.read();
        Ok(queries
            .iter()
            .map(|query| self.search_arena(&arena, query, k))
            .collect())
    }

    fn batch_update(&self, updates: &[(String, Vec<f64>)]) -> Result<Vec<bool>, IndexError> {
        self.state.check_ready()?;
        let mut arena = self.inner.write();
        Ok(updates
            .iter()
            .map(|(id, vector)| {
                if vector.len() != self.config.dimensionality {
                    return false;
                }
                if arena.delete(id).is_none() {
                    return false;
                }
                arena.insert(id, vector).is_ok()
            })
            .collect())
    }

    fn stats(&self) -> IndexStats {
        let arena = self.inner.read();
        IndexStats {
            index_type: "flat",
            state: self.state.name(),
            dimensionality: self.config.dimensionality,
            metric: self.config.metric,
            live_count: arena.live_count(),
            total_slots: arena.total_slots(),
            tombstones: arena.tombstone_count(),
            details: serde_json::Map::new(),
        }
    }

    fn snapshot_bytes(&self) -> Result<Vec<u8>, IndexError> {
        bincode::serialize(&*self.inner.read())
            .map_err(|e| IndexError::CorruptSnapshot(e.to_string()))
    }

    fn restore_bytes(&self, bytes: &[u8]) -> Result<(), IndexError> {
        let arena: SlotArena =
            bincode::deserialize(bytes).map_err(|e| IndexError::CorruptSnapshot(e.to_string()))?;
        *self.inner.write() = arena;
        self.state.mark_ready()
    }

    fn close(&self) {
        self.state.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_distance::DistanceFunction;

    fn cosine3() -> FlatIndex {
        FlatIndex::new(IndexConfig::new(3, DistanceFunction::Cosine))
    }

    #[test]
    fn test_exact_search_known_distances() {
        let index = cosine3();
        index
            .build(vec![
                ("v1".to_string(), vec![1.0, 0.0, 0.0]),
                ("v2".to_string(), vec![0.0, 1.0, 0.0]),
                ("v3".to_string(), vec![0.0, 0.0, 1.0]),
                ("v4".to_string(), vec![0.5, 0.5, 0.0]),
            ])
            .unwrap();
        let results = index.search(&[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "v1");
        assert_eq!(results[1].id, "v4");
        assert!((results[0].distance - 0.0057).abs() < 1e-3);
        assert!((results[1].distance - 0.2192).abs() < 1e-3);
    }

    #[test]
    fn test_search_before_build_fails() {
        let index = cosine3();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(IndexError::NotReady(_))
        ));
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = cosine3();
        index.build(Vec::new()).unwrap();
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_k_larger_than_live_returns_all() {
        let index = cosine3();
        index
            .build(vec![
                ("a".to_string(), vec![1.0, 0.0, 0.0]),
                ("b".to_string(), vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 10).unwrap().len(), 2);
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = cosine3();
        index.build(Vec::new()).unwrap();
        assert!(matches!(
            index.insert("a", &[1.0, 2.0]),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_delete_hides_from_search() {
        let index = cosine3();
        index
            .build(vec![
                ("a".to_string(), vec![1.0, 0.0, 0.0]),
                ("b".to_string(), vec![0.9, 0.1, 0.0]),
            ])
            .unwrap();
        assert!(index.delete("a").unwrap());
        assert!(!index.delete("a").unwrap());
        let results = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[test]
    fn test_update_moves_vector() {
        let index = cosine3();
        index
            .build(vec![
                ("a".to_string(), vec![1.0, 0.0, 0.0]),
                ("b".to_string(), vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        index.update("a", &[0.0, 0.0, 1.0]).unwrap();
        let results = index.search(&[0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(results[0].id, "a");
        assert!(matches!(
            index.update("missing", &[0.0, 0.0, 1.0]),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let index = FlatIndex::new(IndexConfig::new(2, DistanceFunction::Euclidean));
        index
            .build(vec![
                ("far".to_string(), vec![5.0, 5.0]),
                ("tie1".to_string(), vec![1.0, 0.0]),
                ("tie2".to_string(), vec![0.0, 1.0]),
            ])
            .unwrap();
        let results = index.search(&[0.0, 0.0], 2).unwrap();
        // Equal distances resolve to the earlier slot.
        assert_eq!(results[0].id, "tie1");
        assert_eq!(results[1].id, "tie2");
    }

    #[test]
    fn test_batch_insert_rolls_back_on_failure() {
        let index = cosine3();
        index
            .build(vec![("existing".to_string(), vec![1.0, 0.0, 0.0])])
            .unwrap();
        let err = index
            .batch_insert(&[
                ("a".to_string(), vec![0.0, 1.0, 0.0]),
                ("existing".to_string(), vec![0.0, 0.0, 1.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, IndexError::DuplicateId(_)));
        // "a" was inserted before the failure and must be gone again.
        assert_eq!(index.stats().live_count, 1);
        let results = index.search(&[0.0, 1.0, 0.0], 5).unwrap();
        assert!(results.iter().all(|n| n.id != "a"));
    }

    #[test]
    fn test_batch_delete_reports_per_item() {
        let index = cosine3();
        index
            .build(vec![
                ("a".to_string(), vec![1.0, 0.0, 0.0]),
                ("b".to_string(), vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        let outcomes = index
            .batch_delete(&["a".to_string(), "missing".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(outcomes, vec![true, false, true]);
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_batch_update_isolates_failures() {
        let index = cosine3();
        index
            .build(vec![("a".to_string(), vec![1.0, 0.0, 0.0])])
            .unwrap();
        let outcomes = index
            .batch_update(&[
                ("a".to_string(), vec![0.0, 1.0, 0.0]),
                ("missing".to_string(), vec![0.0, 0.0, 1.0]),
                ("a".to_string(), vec![0.0, 0.0, 1.0]),
            ])
            .unwrap();
        assert_eq!(outcomes, vec![true, false, true]);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let index = cosine3();
        index
            .build(vec![
                ("a".to_string(), vec![1.0, 0.0, 0.0]),
                ("b".to_string(), vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        index.delete("b").unwrap();
        let bytes = index.snapshot_bytes().unwrap();

        let restored = cosine3();
        restored.restore_bytes(&bytes).unwrap();
        let results = restored.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        // Tombstoned slots stay tombstoned across the round trip.
        assert_eq!(restored.stats().tombstones, 1);
    }

    #[test]
    fn test_close_is_terminal() {
        let index = cosine3();
        index.build(Vec::new()).unwrap();
        index.close();
        index.close();
        assert!(matches!(
            index.insert("a", &[1.0, 0.0, 0.0]),
            Err(IndexError::NotReady(_))
        ));
    }
}
