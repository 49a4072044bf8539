// # Resource Handles
//
// Blobs held by the caches are referred to externally through resource
// handles: opaque identifiers a consumer can hand to its display layer
// without touching the bytes. A handle is live exactly while its cache
// entry is live; eviction, expiry, explicit delete, and store teardown all
// release it exactly once.
//
// The minter is a seam: a browser-backed build would mint object URLs, a
// native shell temp-file paths. The in-memory minter here is the reference
// implementation and what the test suites assert against.

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Externally visible identifier for a cached blob's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints and releases resource handles for cached blobs.
///
/// Implementations must make `release` idempotent: the second release of an
/// id returns `false` and has no effect.
pub trait ResourceMinter: Send + Sync {
    /// Mint a handle referring to `bytes`.
    fn mint(&self, bytes: &Bytes) -> ResourceId;

    /// Release a handle. Returns `false` when the handle was not live.
    fn release(&self, id: &ResourceId) -> bool;

    /// Whether a handle currently refers to live bytes.
    fn is_live(&self, id: &ResourceId) -> bool;

    /// Number of currently live handles.
    fn live_count(&self) -> usize;
}

/// Reference minter tracking live handles in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMinter {
    live: DashMap<ResourceId, usize>,
    minted: AtomicU64,
    released: AtomicU64,
}

impl InMemoryMinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn minted_total(&self) -> u64 {
        self.minted.load(Ordering::Relaxed)
    }

    pub fn released_total(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl ResourceMinter for InMemoryMinter {
    fn mint(&self, bytes: &Bytes) -> ResourceId {
        let id = ResourceId(format!("blob:{}", Uuid::new_v4()));
        self.live.insert(id.clone(), bytes.len());
        self.minted.fetch_add(1, Ordering::Relaxed);
        id
    }

    fn release(&self, id: &ResourceId) -> bool {
        let removed = self.live.remove(id).is_some();
        if removed {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    fn is_live(&self, id: &ResourceId) -> bool {
        self.live.contains_key(id)
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_release() {
        let minter = InMemoryMinter::new();
        let bytes = Bytes::from_static(b"image data");

        let id = minter.mint(&bytes);
        assert!(minter.is_live(&id));
        assert_eq!(minter.live_count(), 1);

        assert!(minter.release(&id));
        assert!(!minter.is_live(&id));
        assert_eq!(minter.live_count(), 0);
    }

    #[test]
    fn test_release_is_exactly_once() {
        let minter = InMemoryMinter::new();
        let id = minter.mint(&Bytes::from_static(b"x"));

        assert!(minter.release(&id));
        assert!(!minter.release(&id));
        assert_eq!(minter.released_total(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let minter = InMemoryMinter::new();
        let bytes = Bytes::from_static(b"x");
        let a = minter.mint(&bytes);
        let b = minter.mint(&bytes);
        assert_ne!(a, b);
        assert_eq!(minter.minted_total(), 2);
    }
}
