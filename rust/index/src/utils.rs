use rand::rngs::StdRng;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Bounded collector for the best `k` `(distance, slot)` pairs. Internally a
/// max-heap over the kept set; the worst kept pair is evicted when a better
/// one arrives. Ties order by slot so eviction, and therefore output, is
/// deterministic.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
}

struct HeapEntry {
    distance: f64,
    slot: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.slot.cmp(&other.slot))
    }
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        TopK {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1)),
        }
    }

    pub(crate) fn push(&mut self, distance: f64, slot: usize) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(HeapEntry { distance, slot });
            return;
        }
        let entry = HeapEntry { distance, slot };
        if let Some(worst) = self.heap.peek() {
            if entry.cmp(worst) == Ordering::Less {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Ascending `(distance, slot)` order.
    pub(crate) fn into_sorted(self) -> Vec<(f64, usize)> {
        let mut entries: Vec<HeapEntry> = self.heap.into_vec();
        entries.sort();
        entries
            .into_iter()
            .map(|entry| (entry.distance, entry.slot))
            .collect()
    }
}

/// Standard-normal draw via Box-Muller; `rand` alone ships no Gaussian.
pub(crate) fn sample_gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
pub(crate) fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f64>> {
    use rand::SeedableRng;
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| sample_gaussian(&mut rng)).collect())
        .collect()
}
