use crate::SnapshotError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

const MAGIC: [u8; 4] = *b"VCVB";
const FORMAT_VERSION: u16 = 1;
const FLAG_GZIP: u16 = 1;

/// Writes the `vectors.bin` artifact: a little-endian self-describing dump
/// of every `(id, vector)` pair with a trailing CRC32 over every preceding
/// byte, so truncation or bit rot fails the checksum instead of producing
/// garbage records. The records section is optionally gzipped; the header
/// stays plain so the loader can decide before inflating.
pub fn save_vectors(
    path: &Path,
    dim: u32,
    records: &[(String, Vec<f64>)],
    gzip: bool,
) -> Result<(), SnapshotError> {
    let mut body = Vec::new();
    for (id, vector) in records {
        let id_bytes = id.as_bytes();
        body.extend_from_slice(&(id_bytes.len() as u16).to_le_bytes());
        body.extend_from_slice(id_bytes);
        for &x in vector {
            body.extend_from_slice(&x.to_le_bytes());
        }
    }
    if gzip {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body)?;
        body = encoder.finish()?;
    }

    let mut buffer = Vec::with_capacity(20 + body.len() + 4);
    buffer.extend_from_slice(&MAGIC);
    buffer.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buffer.extend_from_slice(&(if gzip { FLAG_GZIP } else { 0u16 }).to_le_bytes());
    buffer.extend_from_slice(&(records.len() as u64).to_le_bytes());
    buffer.extend_from_slice(&dim.to_le_bytes());
    buffer.extend_from_slice(&body);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buffer);
    buffer.extend_from_slice(&hasher.finalize().to_le_bytes());

    fs::write(path, buffer)?;
    Ok(())
}

/// Reads and verifies a `vectors.bin` artifact.
pub fn load_vectors(path: &Path) -> Result<(u32, Vec<(String, Vec<f64>)>), SnapshotError> {
    let buffer = fs::read(path)?;
    if buffer.len() < 24 {
        return Err(SnapshotError::corrupt(
            path,
            format!("file is {} bytes, header and checksum need 24", buffer.len()),
        ));
    }

    let (content, crc_bytes) = buffer.split_at(buffer.len() - 4);
    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(content);
    if hasher.finalize() != stored_crc {
        return Err(SnapshotError::corrupt(path, "checksum mismatch"));
    }

    if content[0..4] != MAGIC {
        return Err(SnapshotError::corrupt(path, "bad magic"));
    }
    let version = u16::from_le_bytes([content[4], content[5]]);
    if version != FORMAT_VERSION {
        return Err(SnapshotError::corrupt(
            path,
            format!("unsupported version {}", version),
        ));
    }
    let flags = u16::from_le_bytes([content[6], content[7]]);
    let count = u64::from_le_bytes([
        content[8], content[9], content[10], content[11], content[12], content[13], content[14],
        content[15],
    ]) as usize;
    let dim = u32::from_le_bytes([content[16], content[17], content[18], content[19]]);

    let mut body = content[20..].to_vec();
    if flags & FLAG_GZIP != 0 {
        let mut decoder = GzDecoder::new(&body[..]);
        let mut inflated = Vec::new();
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| SnapshotError::corrupt(path, format!("gzip body: {}", e)))?;
        body = inflated;
    }

    let mut records = Vec::with_capacity(count);
    let mut offset = 0usize;
    let vector_bytes = dim as usize * 8;
    for _ in 0..count {
        if offset + 2 > body.len() {
            return Err(SnapshotError::corrupt(path, "truncated id length"));
        }
        let id_len = u16::from_le_bytes([body[offset], body[offset + 1]]) as usize;
        offset += 2;
        if offset + id_len + vector_bytes > body.len() {
            return Err(SnapshotError::corrupt(path, "truncated record"));
        }
        let id = std::str::from_utf8(&body[offset..offset + id_len])
            .map_err(|_| SnapshotError::corrupt(path, "record id is not UTF-8"))?
            .to_string();
        offset += id_len;
        let mut vector = Vec::with_capacity(dim as usize);
        for chunk in body[offset..offset + vector_bytes].chunks_exact(8) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            vector.push(f64::from_le_bytes(bytes));
        }
        offset += vector_bytes;
        records.push((id, vector));
    }
    if offset != body.len() {
        return Err(SnapshotError::corrupt(path, "trailing bytes after records"));
    }
    Ok((dim, records))
}
