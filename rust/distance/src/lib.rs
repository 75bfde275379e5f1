pub mod distance;
pub mod types;

pub use distance::*;
pub use types::*;

/// Scales a vector to unit length. A zero vector is returned unchanged
/// rather than dividing by zero.
pub fn normalize(vector: &[f64]) -> Vec<f64> {
    let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}
