pub mod kmeans;
mod product;
mod scalar;
mod types;

pub use product::*;
pub use scalar::*;
pub use types::*;

use serde::{Deserialize, Serialize};

/// Quantizer selection plus its tuning knobs, as it appears in the
/// configuration surface.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuantizerParams {
    Scalar(ScalarQuantizerParams),
    Product(ProductQuantizerParams),
}

/// One quantizer chosen at construction. Serializable in full (parameters
/// and trained codebook) so a snapshot can carry the trained state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum VectorQuantizer {
    Scalar(ScalarQuantizer),
    Product(ProductQuantizer),
}

impl VectorQuantizer {
    pub fn new(params: &QuantizerParams) -> Result<Self, QuantizationError> {
        Ok(match params {
            QuantizerParams::Scalar(params) => {
                VectorQuantizer::Scalar(ScalarQuantizer::new(*params)?)
            }
            QuantizerParams::Product(params) => {
                VectorQuantizer::Product(ProductQuantizer::new(*params)?)
            }
        })
    }

    pub fn quantizer_type(&self) -> &'static str {
        match self {
            VectorQuantizer::Scalar(_) => "scalar",
            VectorQuantizer::Product(_) => "product",
        }
    }
}

impl Quantizer for VectorQuantizer {
    fn train(&mut self, samples: &[Vec<f64>]) -> Result<(), QuantizationError> {
        match self {
            VectorQuantizer::Scalar(q) => q.train(samples),
            VectorQuantizer::Product(q) => q.train(samples),
        }
    }

    fn is_trained(&self) -> bool {
        match self {
            VectorQuantizer::Scalar(q) => q.is_trained(),
            VectorQuantizer::Product(q) => q.is_trained(),
        }
    }

    fn encode(&self, vector: &[f64]) -> Result<Vec<u8>, QuantizationError> {
        match self {
            VectorQuantizer::Scalar(q) => q.encode(vector),
            VectorQuantizer::Product(q) => q.encode(vector),
        }
    }

    fn decode(&self, code: &[u8]) -> Result<Vec<f64>, QuantizationError> {
        match self {
            VectorQuantizer::Scalar(q) => q.decode(code),
            VectorQuantizer::Product(q) => q.decode(code),
        }
    }

    fn asymmetric_distance(&self, query: &[f64], code: &[u8]) -> Result<f64, QuantizationError> {
        match self {
            VectorQuantizer::Scalar(q) => q.asymmetric_distance(query, code),
            VectorQuantizer::Product(q) => q.asymmetric_distance(query, code),
        }
    }

    fn stats(&self) -> QuantizerStats {
        match self {
            VectorQuantizer::Scalar(q) => q.stats(),
            VectorQuantizer::Product(q) => q.stats(),
        }
    }
}
