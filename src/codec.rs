// src/codec.rs

//! Transparent payload compression. Content above the threshold is stored
//! gzip-compressed; everything else passes through. Other components only
//! ever see logical content, never storage bytes.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{MemoryError, Result};

/// Encode content for storage. Returns the bytes to persist and whether
/// they are compressed. Size validation against the hard maximum happens
/// before this is called.
pub fn encode(content: &str, compression_threshold: usize) -> (Vec<u8>, bool) {
    if content.len() <= compression_threshold {
        return (content.as_bytes().to_vec(), false);
    }

    match compress(content.as_bytes()) {
        Ok(compressed) => (compressed, true),
        Err(err) => {
            // Fall back to uncompressed; the facade has already checked the
            // hard maximum so the plain bytes are storable.
            tracing::warn!("compression failed, storing uncompressed: {err}");
            (content.as_bytes().to_vec(), false)
        }
    }
}

/// Inverse of [`encode`].
pub fn decode(bytes: &[u8], is_compressed: bool) -> Result<String> {
    if !is_compressed {
        return String::from_utf8(bytes.to_vec())
            .map_err(|e| MemoryError::Compression(format!("invalid utf-8 payload: {e}")));
    }

    let mut decoder = GzDecoder::new(bytes);
    let mut content = String::new();
    decoder
        .read_to_string(&mut content)
        .map_err(|e| MemoryError::Compression(format!("decompression failed: {e}")))?;
    Ok(content)
}

fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| MemoryError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| MemoryError::Compression(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_content_passes_through() {
        let (bytes, compressed) = encode("short", 100);
        assert!(!compressed);
        assert_eq!(bytes, b"short");
        assert_eq!(decode(&bytes, compressed).unwrap(), "short");
    }

    #[test]
    fn test_large_content_round_trips() {
        let content = "x".repeat(150_000);
        let (bytes, compressed) = encode(&content, 10_000);
        assert!(compressed);
        // Repeated bytes compress well below the original.
        assert!(bytes.len() < content.len());
        assert_eq!(decode(&bytes, compressed).unwrap(), content);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let content = "y".repeat(100);
        let (_, compressed) = encode(&content, 100);
        assert!(!compressed);
        let (_, compressed) = encode(&content, 99);
        assert!(compressed);
    }

    #[test]
    fn test_decode_rejects_garbage_gzip() {
        assert!(decode(b"not gzip", true).is_err());
    }
}
