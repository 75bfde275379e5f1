use quiver_error::{ErrorCodes, QuiverError};
use thiserror::Error;

/// Dimensionality ceiling for any vector accepted by the engine.
pub const MAX_DIMENSIONS: usize = 10_000;

#[derive(Error, Debug)]
pub enum VectorValidationError {
    #[error("Vector is empty")]
    Empty,
    #[error("Vector has {0} dimensions, ceiling is {MAX_DIMENSIONS}")]
    TooManyDimensions(usize),
    #[error("Vector has non-finite value {value} at dimension {position}")]
    NonFinite { position: usize, value: f64 },
    #[error("Vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl QuiverError for VectorValidationError {
    fn code(&self) -> ErrorCodes {
        match self {
            VectorValidationError::DimensionMismatch { .. } => ErrorCodes::InvalidArgument,
            VectorValidationError::TooManyDimensions(_) => ErrorCodes::OutOfRange,
            _ => ErrorCodes::InvalidArgument,
        }
    }
}

/// Checks shape constraints that hold for every vector: non-empty, within
/// the dimension ceiling, all coordinates finite.
pub fn validate_vector(vector: &[f64]) -> Result<(), VectorValidationError> {
    if vector.is_empty() {
        return Err(VectorValidationError::Empty);
    }
    if vector.len() > MAX_DIMENSIONS {
        return Err(VectorValidationError::TooManyDimensions(vector.len()));
    }
    for (position, &value) in vector.iter().enumerate() {
        if !value.is_finite() {
            return Err(VectorValidationError::NonFinite { position, value });
        }
    }
    Ok(())
}

/// Checks a vector against the database's fixed dimensionality, on top of
/// the shape constraints.
pub fn validate_dimensionality(
    vector: &[f64],
    expected: usize,
) -> Result<(), VectorValidationError> {
    validate_vector(vector)?;
    if vector.len() != expected {
        return Err(VectorValidationError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}
