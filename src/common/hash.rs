// Content hashing for page bytes.
//
// The hash identifies the bytes themselves, independent of where the page
// currently sits in a book, and keys the upscale cache across rebinds.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identifier derived from page bytes: lowercase hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a byte buffer.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        ContentHash(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-computed hex digest. The caller is trusted to supply
    /// a digest produced by the same algorithm.
    pub fn from_hex(hex_digest: impl Into<String>) -> Self {
        ContentHash(hex_digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
