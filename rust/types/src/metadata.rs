use quiver_error::{ErrorCodes, QuiverError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Maximum number of keys in one record's metadata.
pub const MAX_METADATA_KEYS: usize = 100;
/// Maximum length of a metadata key, in characters.
pub const MAX_METADATA_KEY_LENGTH: usize = 256;
/// Maximum length of a string value, in characters.
pub const MAX_METADATA_STRING_LENGTH: usize = 10_000;
/// Maximum serialized size of one record's metadata, in bytes.
pub const MAX_METADATA_SERIALIZED_BYTES: usize = 1024 * 1024;

/// A metadata value. Serialized untagged so the on-disk sidecar reads as
/// natural JSON: `{"label": "a", "rank": 3, "tags": ["x", "y"]}`.
///
/// Variant order matters for deserialization: `Int` precedes `Float` so JSON
/// integers round-trip exactly (up to 2^53, per the JSON number model).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<MetadataValue>),
    Object(HashMap<String, MetadataValue>),
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(v) => write!(f, "{}", v),
            MetadataValue::Int(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Str(v) => write!(f, "\"{}\"", v),
            MetadataValue::Array(v) => write!(f, "Array(len={})", v.len()),
            MetadataValue::Object(v) => write!(f, "Object(keys={})", v.len()),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

/// Metadata attached to a record. Absent metadata (`None` at the record
/// level) is distinct from an empty map and preserved through round-trips.
pub type Metadata = HashMap<String, MetadataValue>;

#[derive(Error, Debug)]
pub enum MetadataValidationError {
    #[error("Metadata has {0} keys, limit is {MAX_METADATA_KEYS}")]
    TooManyKeys(usize),
    #[error("Metadata key '{0}' exceeds {MAX_METADATA_KEY_LENGTH} characters")]
    KeyTooLong(String),
    #[error("String value under key '{key}' is {len} characters, limit is {MAX_METADATA_STRING_LENGTH}")]
    StringValueTooLong { key: String, len: usize },
    #[error("Metadata serializes to {0} bytes, limit is {MAX_METADATA_SERIALIZED_BYTES}")]
    SerializedTooLarge(usize),
    #[error("Metadata is not serializable: {0}")]
    NotSerializable(#[from] serde_json::Error),
}

impl QuiverError for MetadataValidationError {
    fn code(&self) -> ErrorCodes {
        match self {
            MetadataValidationError::TooManyKeys(_) => ErrorCodes::ResourceExhausted,
            MetadataValidationError::KeyTooLong(_) => ErrorCodes::InvalidArgument,
            MetadataValidationError::StringValueTooLong { .. } => ErrorCodes::ResourceExhausted,
            MetadataValidationError::SerializedTooLarge(_) => ErrorCodes::ResourceExhausted,
            MetadataValidationError::NotSerializable(_) => ErrorCodes::InvalidArgument,
        }
    }
}

/// Checks one record's metadata against the documented bounds. String-length
/// checks apply recursively through arrays and nested objects.
pub fn validate_metadata(metadata: &Metadata) -> Result<(), MetadataValidationError> {
    if metadata.len() > MAX_METADATA_KEYS {
        return Err(MetadataValidationError::TooManyKeys(metadata.len()));
    }
    for (key, value) in metadata {
        if key.chars().count() > MAX_METADATA_KEY_LENGTH {
            return Err(MetadataValidationError::KeyTooLong(key.clone()));
        }
        validate_value(key, value)?;
    }
    let serialized = serde_json::to_vec(metadata)?;
    if serialized.len() > MAX_METADATA_SERIALIZED_BYTES {
        return Err(MetadataValidationError::SerializedTooLarge(serialized.len()));
    }
    Ok(())
}

fn validate_value(key: &str, value: &MetadataValue) -> Result<(), MetadataValidationError> {
    match value {
        MetadataValue::Str(s) => {
            let len = s.chars().count();
            if len > MAX_METADATA_STRING_LENGTH {
                return Err(MetadataValidationError::StringValueTooLong {
                    key: key.to_string(),
                    len,
                });
            }
        }
        MetadataValue::Array(values) => {
            for v in values {
                validate_value(key, v)?;
            }
        }
        MetadataValue::Object(map) => {
            for (k, v) in map {
                if k.chars().count() > MAX_METADATA_KEY_LENGTH {
                    return Err(MetadataValidationError::KeyTooLong(k.clone()));
                }
                validate_value(k, v)?;
            }
        }
        _ => {}
    }
    Ok(())
}
