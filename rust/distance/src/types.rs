use crate::distance;
use quiver_error::{ErrorCodes, QuiverError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The metric family. Every kernel returns a double where smaller means
/// more similar; `InnerProduct` is negated to satisfy that convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    Cosine,
    Euclidean,
    InnerProduct,
    Manhattan,
    Hamming,
    Jaccard,
}

impl DistanceFunction {
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            DistanceFunction::Cosine => distance::cosine_distance(a, b),
            DistanceFunction::Euclidean => distance::euclidean_distance(a, b),
            DistanceFunction::InnerProduct => distance::inner_product_distance(a, b),
            DistanceFunction::Manhattan => distance::manhattan_distance(a, b),
            DistanceFunction::Hamming => distance::hamming_distance(a, b),
            DistanceFunction::Jaccard => distance::jaccard_distance(a, b),
        }
    }
}

impl std::fmt::Display for DistanceFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DistanceFunction::Cosine => "cosine",
            DistanceFunction::Euclidean => "euclidean",
            DistanceFunction::InnerProduct => "inner_product",
            DistanceFunction::Manhattan => "manhattan",
            DistanceFunction::Hamming => "hamming",
            DistanceFunction::Jaccard => "jaccard",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug)]
#[error("Unknown distance function: '{0}'")]
pub struct DistanceFunctionError(String);

impl QuiverError for DistanceFunctionError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl TryFrom<&str> for DistanceFunction {
    type Error = DistanceFunctionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "cosine" => Ok(DistanceFunction::Cosine),
            "euclidean" | "l2" => Ok(DistanceFunction::Euclidean),
            "inner_product" | "dot" => Ok(DistanceFunction::InnerProduct),
            "manhattan" | "l1" => Ok(DistanceFunction::Manhattan),
            "hamming" => Ok(DistanceFunction::Hamming),
            "jaccard" => Ok(DistanceFunction::Jaccard),
            _ => Err(DistanceFunctionError(value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_orthogonal_and_parallel() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-12);
        assert!(cosine(&a, &a).abs() < 1e-12);
    }

    fn cosine(a: &[f64], b: &[f64]) -> f64 {
        DistanceFunction::Cosine.distance(a, b)
    }

    #[test]
    fn test_cosine_known_values() {
        // q=(0.9, 0.1, 0) against (1,0,0): 1 - 0.9/sqrt(0.82)
        let q = vec![0.9, 0.1, 0.0];
        let v1 = vec![1.0, 0.0, 0.0];
        let expected = 1.0 - 0.9 / 0.82f64.sqrt();
        assert!((cosine(&q, &v1) - expected).abs() < 1e-9);

        // Against (0.5, 0.5, 0): 1 - 0.5/(sqrt(0.82)*sqrt(0.5))
        let v4 = vec![0.5, 0.5, 0.0];
        let expected = 1.0 - 0.5 / (0.82f64.sqrt() * 0.5f64.sqrt());
        assert!((cosine(&q, &v4) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_norm_is_defined_under_every_metric() {
        let zero = vec![0.0; 4];
        let other = vec![1.0, 2.0, 3.0, 4.0];
        for metric in [
            DistanceFunction::Cosine,
            DistanceFunction::Euclidean,
            DistanceFunction::InnerProduct,
            DistanceFunction::Manhattan,
            DistanceFunction::Hamming,
            DistanceFunction::Jaccard,
        ] {
            let d = metric.distance(&zero, &other);
            assert!(d.is_finite(), "{} produced {}", metric, d);
            let d = metric.distance(&zero, &zero);
            assert!(d.is_finite(), "{} produced {} on zero pair", metric, d);
        }
        assert_eq!(DistanceFunction::Cosine.distance(&zero, &other), 1.0);
        assert_eq!(DistanceFunction::Jaccard.distance(&zero, &zero), 0.0);
    }

    #[test]
    fn test_hamming_counts_differing_dimensions() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![1.0, 0.0, 3.0, 5.0];
        assert_eq!(DistanceFunction::Hamming.distance(&a, &b), 2.0);
    }

    #[test]
    fn test_jaccard_over_nonzero_support() {
        let a = vec![1.0, 1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 1.0, 0.0];
        // Intersection {1}, union {0, 1, 2}.
        let d = DistanceFunction::Jaccard.distance(&a, &b);
        assert!((d - (1.0 - 1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_inner_product_is_negated() {
        let a = vec![1.0, 2.0];
        let b = vec![3.0, 4.0];
        assert_eq!(DistanceFunction::InnerProduct.distance(&a, &b), -11.0);
    }

    #[test]
    fn test_names_parse_both_ways() {
        for metric in [
            DistanceFunction::Cosine,
            DistanceFunction::Euclidean,
            DistanceFunction::InnerProduct,
            DistanceFunction::Manhattan,
            DistanceFunction::Hamming,
            DistanceFunction::Jaccard,
        ] {
            let name = metric.to_string();
            assert_eq!(DistanceFunction::try_from(name.as_str()).unwrap(), metric);
        }
        assert!(DistanceFunction::try_from("chebyshev").is_err());
    }
}
