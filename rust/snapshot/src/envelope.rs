use crate::SnapshotError;
use std::fs;
use std::path::Path;

/// Writes an opaque index payload with a trailing CRC32, so per-strategy
/// snapshot files get the same corruption detection as `vectors.bin`
/// without this crate knowing their layout.
pub fn save_payload(path: &Path, payload: &[u8]) -> Result<(), SnapshotError> {
    let mut buffer = Vec::with_capacity(payload.len() + 4);
    buffer.extend_from_slice(payload);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    buffer.extend_from_slice(&hasher.finalize().to_le_bytes());
    fs::write(path, buffer)?;
    Ok(())
}

pub fn load_payload(path: &Path) -> Result<Vec<u8>, SnapshotError> {
    let buffer = fs::read(path)?;
    if buffer.len() < 4 {
        return Err(SnapshotError::corrupt(path, "shorter than its checksum"));
    }
    let (payload, crc_bytes) = buffer.split_at(buffer.len() - 4);
    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != stored_crc {
        return Err(SnapshotError::corrupt(path, "checksum mismatch"));
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.flat.bin");
        save_payload(&path, b"opaque index bytes").unwrap();
        assert_eq!(load_payload(&path).unwrap(), b"opaque index bytes");
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.flat.bin");
        save_payload(&path, b"opaque index bytes").unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[3] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            load_payload(&path),
            Err(SnapshotError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_distinguishable() {
        let dir = TempDir::new().unwrap();
        let err = load_payload(&dir.path().join("missing.bin")).unwrap_err();
        assert!(err.is_missing());
    }
}
