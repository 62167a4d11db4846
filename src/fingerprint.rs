// src/fingerprint.rs

//! Canonical content hashing for deduplication. Hashing is byte-exact —
//! identical content always produces the same hash, and no whitespace or
//! case folding is applied.

use sha2::{Digest, Sha256};

/// Hex sha256 over the uncompressed content bytes. Stable for identical
/// content, used as the dedup key within a scope.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
