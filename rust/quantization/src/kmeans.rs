//! Lloyd's algorithm with k-means++ seeding, shared by the product
//! quantizer and the IVF coarse quantizer. Deterministic for a fixed seed.

use quiver_distance::squared_euclidean_distance;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Clone, Debug)]
pub struct KMeansParams {
    pub k: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

#[derive(Clone, Debug)]
pub struct KMeansResult {
    pub centroids: Vec<Vec<f64>>,
    /// Index of the owning centroid for each input vector. Ties break to
    /// the lowest centroid index.
    pub assignments: Vec<usize>,
}

/// Runs k-means over `vectors`. When there are fewer vectors than `k` the
/// centroid count is clamped to the vector count; callers read the actual
/// count from the result.
pub fn kmeans(vectors: &[Vec<f64>], params: &KMeansParams) -> KMeansResult {
    if params.k == 0 || vectors.is_empty() {
        return KMeansResult {
            centroids: Vec::new(),
            assignments: Vec::new(),
        };
    }
    let k = params.k.min(vectors.len());
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = seed_plus_plus(vectors, k, &mut rng);
    let mut assignments = vec![0usize; vectors.len()];

    for _ in 0..params.max_iterations {
        let mut changed = false;
        for (i, vector) in vectors.iter().enumerate() {
            let best = nearest_centroid(vector, &centroids);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        // Recompute each centroid as a running mean of its members.
        let mut counts = vec![0usize; k];
        let dim = vectors[0].len();
        let mut means = vec![vec![0.0f64; dim]; k];
        for (i, vector) in vectors.iter().enumerate() {
            let cluster = assignments[i];
            counts[cluster] += 1;
            let n = counts[cluster] as f64;
            for (d, &x) in vector.iter().enumerate() {
                means[cluster][d] += (x - means[cluster][d]) / n;
            }
        }
        for cluster in 0..k {
            if counts[cluster] == 0 {
                // Re-seed an empty cluster to the point farthest from its
                // current owner.
                means[cluster] = farthest_point(vectors, &centroids, &assignments);
                changed = true;
            }
        }
        centroids = means;

        if !changed {
            break;
        }
    }

    // Final assignment against the settled centroids.
    for (i, vector) in vectors.iter().enumerate() {
        assignments[i] = nearest_centroid(vector, &centroids);
    }

    KMeansResult {
        centroids,
        assignments,
    }
}

/// Index of the nearest centroid under squared L2; ties break low.
pub fn nearest_centroid(vector: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0usize;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = squared_euclidean_distance(vector, centroid);
        if d < best_distance {
            best_distance = d;
            best = i;
        }
    }
    best
}

fn seed_plus_plus(vectors: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    let first = rng.gen_range(0..vectors.len());
    centroids.push(vectors[first].clone());

    let mut distances: Vec<f64> = vectors
        .iter()
        .map(|v| squared_euclidean_distance(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();
        let next = if total == 0.0 {
            // All remaining points coincide with a chosen centroid.
            rng.gen_range(0..vectors.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = vectors.len() - 1;
            for (i, &d) in distances.iter().enumerate() {
                target -= d;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centroids.push(vectors[next].clone());
        for (i, vector) in vectors.iter().enumerate() {
            let d = squared_euclidean_distance(vector, &centroids[centroids.len() - 1]);
            if d < distances[i] {
                distances[i] = d;
            }
        }
    }
    centroids
}

fn farthest_point(
    vectors: &[Vec<f64>],
    centroids: &[Vec<f64>],
    assignments: &[usize],
) -> Vec<f64> {
    let mut farthest = 0usize;
    let mut farthest_distance = -1.0f64;
    for (i, vector) in vectors.iter().enumerate() {
        let d = squared_euclidean_distance(vector, &centroids[assignments[i]]);
        if d > farthest_distance {
            farthest_distance = d;
            farthest = i;
        }
    }
    vectors[farthest].clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<Vec<f64>> {
        let mut vectors = Vec::new();
        for i in 0..10 {
            vectors.push(vec![0.0 + i as f64 * 0.01, 0.0]);
            vectors.push(vec![10.0 + i as f64 * 0.01, 10.0]);
        }
        vectors
    }

    #[test]
    fn test_separates_two_blobs() {
        let result = kmeans(
            &two_blobs(),
            &KMeansParams {
                k: 2,
                max_iterations: 30,
                seed: 42,
            },
        );
        assert_eq!(result.centroids.len(), 2);
        // All even-index points (first blob) share a cluster, odd share the other.
        let first = result.assignments[0];
        let second = result.assignments[1];
        assert_ne!(first, second);
        for (i, &a) in result.assignments.iter().enumerate() {
            assert_eq!(a, if i % 2 == 0 { first } else { second });
        }
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let vectors = two_blobs();
        let params = KMeansParams {
            k: 4,
            max_iterations: 30,
            seed: 42,
        };
        let a = kmeans(&vectors, &params);
        let b = kmeans(&vectors, &params);
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.assignments, b.assignments);
    }

    #[test]
    fn test_k_clamped_to_vector_count() {
        let vectors = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let result = kmeans(
            &vectors,
            &KMeansParams {
                k: 10,
                max_iterations: 10,
                seed: 42,
            },
        );
        assert_eq!(result.centroids.len(), 2);
    }

    #[test]
    fn test_identical_points_do_not_loop() {
        let vectors = vec![vec![5.0, 5.0]; 8];
        let result = kmeans(
            &vectors,
            &KMeansParams {
                k: 3,
                max_iterations: 30,
                seed: 42,
            },
        );
        assert_eq!(result.centroids.len(), 3);
        assert!(result.assignments.iter().all(|&a| a < 3));
    }
}
