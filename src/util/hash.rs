//! Hashing utilities for content fingerprints.
//!
//! Unit fingerprints are content hashes rather than timestamps, so they are
//! robust against clock skew and touch-without-change edits.

use sha2::{Digest, Sha256};

/// Compute the SHA256 hash of a byte slice, hex-encoded.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
