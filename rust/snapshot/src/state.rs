use crate::SnapshotError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const STATE_SCHEMA_VERSION: u32 = 1;

/// The `state.json` artifact: enough top-level configuration to rebuild a
/// client compatible with the other snapshot files. Index and quantizer
/// parameters stay as free-form JSON so this crate needs no knowledge of
/// the strategies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub schema_version: u32,
    pub dimensions: usize,
    pub metric: String,
    pub index_type: String,
    pub index_params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantizer: Option<serde_json::Value>,
}

pub fn save_state(path: &Path, state: &StateFile) -> Result<(), SnapshotError> {
    let json = serde_json::to_vec_pretty(state)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn load_state(path: &Path) -> Result<StateFile, SnapshotError> {
    let bytes = fs::read(path)?;
    let state: StateFile = serde_json::from_slice(&bytes)
        .map_err(|e| SnapshotError::corrupt(path, format!("not a valid state file: {}", e)))?;
    if state.schema_version != STATE_SCHEMA_VERSION {
        return Err(SnapshotError::corrupt(
            path,
            format!(
                "schema version {} is not supported (expected {})",
                state.schema_version, STATE_SCHEMA_VERSION
            ),
        ));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> StateFile {
        StateFile {
            schema_version: STATE_SCHEMA_VERSION,
            dimensions: 128,
            metric: "cosine".to_string(),
            index_type: "hnsw".to_string(),
            index_params: serde_json::json!({"m": 16, "ef_search": 50}),
            quantizer: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        save_state(&path, &sample()).unwrap();
        assert_eq!(load_state(&path).unwrap(), sample());
    }

    #[test]
    fn test_missing_file_is_distinguishable() {
        let dir = TempDir::new().unwrap();
        let err = load_state(&dir.path().join("state.json")).unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn test_unsupported_schema_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut state = sample();
        state.schema_version = 99;
        let json = serde_json::to_vec(&state).unwrap();
        std::fs::write(&path, json).unwrap();
        assert!(matches!(
            load_state(&path),
            Err(SnapshotError::CorruptSnapshot { .. })
        ));
    }
}
