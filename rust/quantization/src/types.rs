use quiver_error::{ErrorCodes, QuiverError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuantizationError {
    #[error("Quantizer is not trained; call train() first")]
    NotTrained,
    #[error("Invalid quantizer configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Vector has {actual} dimensions, quantizer was trained on {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Training sample is empty")]
    EmptyTrainingSample,
    #[error("Code is {actual} bytes, expected {expected}")]
    InvalidCode { expected: usize, actual: usize },
}

impl QuiverError for QuantizationError {
    fn code(&self) -> ErrorCodes {
        match self {
            QuantizationError::NotTrained => ErrorCodes::FailedPrecondition,
            QuantizationError::InvalidConfiguration(_) => ErrorCodes::InvalidArgument,
            QuantizationError::DimensionMismatch { .. } => ErrorCodes::InvalidArgument,
            QuantizationError::EmptyTrainingSample => ErrorCodes::InvalidArgument,
            QuantizationError::InvalidCode { .. } => ErrorCodes::InvalidArgument,
        }
    }
}

/// Stats reported by a quantizer. Fields that depend on training are `None`
/// until `train()` completes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuantizerStats {
    pub trained: bool,
    pub dimensionality: Option<usize>,
    pub code_size_bytes: Option<usize>,
    /// Raw bytes per vector (`dim * 8`) over code bytes.
    pub compression_ratio: Option<f64>,
}

/// The quantizer contract: train a codebook once from a representative
/// sample, then encode vectors to compact codes, decode codes to
/// approximate vectors, and score codes against raw queries. All operations
/// other than `train` fail with [`QuantizationError::NotTrained`] until
/// training completes. Codebooks are immutable after training.
pub trait Quantizer {
    fn train(&mut self, samples: &[Vec<f64>]) -> Result<(), QuantizationError>;

    fn is_trained(&self) -> bool;

    fn encode(&self, vector: &[f64]) -> Result<Vec<u8>, QuantizationError>;

    fn decode(&self, code: &[u8]) -> Result<Vec<f64>, QuantizationError>;

    /// Distance between a raw query and a stored code, without decoding the
    /// query side.
    fn asymmetric_distance(&self, query: &[f64], code: &[u8]) -> Result<f64, QuantizationError>;

    fn stats(&self) -> QuantizerStats;
}
