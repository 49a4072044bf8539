// # Page Caching System
//
// Three-tier, memory-bounded caching for the reader pipeline.
//
// ## Overview
//
// The cache module keeps decoded work close at hand so navigation stays
// responsive without letting image data grow without bound. It includes:
//
// - **Memory Cache**: generic LRU store with TTL, byte accounting, and an
//   eviction event stream
// - **Blob Store**: page bytes with externally visible resource handles
// - **Thumbnail Store**: small encoded previews
// - **Upscale Store**: super-resolution results keyed by content hash
// - **Cache Manager**: the three stores behind one global memory ceiling
//
// ## Eviction policy
//
// Every store enforces its own byte and item bounds by pre-insert LRU
// eviction. On top of that the manager watches aggregate usage; at 90% of
// the global ceiling it shrinks back down to 70%, taking upscales first
// (rebuildable from blobs), thumbnails second, and the blob store last;
// blobs are the current reading surface.
//
// ## Resource handles
//
// Blob and upscale entries carry a minted resource handle that external
// consumers use to refer to the bytes. The stores are the sole owners of
// those handles: every removal path (LRU, TTL, delete, clear, shrink)
// releases the handle exactly once through the store's removal hook.

pub mod blob_store;
pub mod manager;
pub mod memory_cache;
pub mod statistics;
pub mod thumb_store;
pub mod upscale_store;

pub use blob_store::{blob_key, BlobEntry, BlobStore, BlobStoreConfig};
pub use manager::{CacheManager, CacheManagerConfig, CacheUsageSnapshot};
pub use memory_cache::{
    CacheEntry, CacheEvent, MemoryCache, MemoryCacheConfig, MemoryCacheConfigUpdate,
};
pub use statistics::{CacheMetrics, EvictionReason};
pub use thumb_store::{thumb_key, ThumbEntry, ThumbStore, ThumbStoreConfig};
pub use upscale_store::{UpscaleEntry, UpscaleStore, UpscaleStoreConfig};

use std::time::Duration;

/// Default maximum bytes for the blob store (256 MiB).
pub const DEFAULT_BLOB_MAX_BYTES: usize = 256 * 1024 * 1024;

/// Default maximum live blob entries.
pub const DEFAULT_BLOB_MAX_ITEMS: usize = 30;

/// Default blob TTL (5 minutes).
pub const DEFAULT_BLOB_TTL: Duration = Duration::from_secs(5 * 60);

/// Default maximum bytes for the thumbnail store (50 MiB).
pub const DEFAULT_THUMB_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Default maximum live thumbnail entries.
pub const DEFAULT_THUMB_MAX_ITEMS: usize = 100;

/// Default thumbnail TTL (30 minutes).
pub const DEFAULT_THUMB_TTL: Duration = Duration::from_secs(30 * 60);

/// Default maximum bytes for the upscale store (500 MiB).
pub const DEFAULT_UPSCALE_MAX_BYTES: usize = 500 * 1024 * 1024;

/// Default maximum live upscale entries.
pub const DEFAULT_UPSCALE_MAX_ITEMS: usize = 20;

/// Default upscale TTL (10 minutes).
pub const DEFAULT_UPSCALE_TTL: Duration = Duration::from_secs(10 * 60);

/// Default global memory ceiling across all stores (800 MiB).
pub const DEFAULT_GLOBAL_MEMORY_LIMIT: usize = 800 * 1024 * 1024;

/// Fraction of the global ceiling at which cleanup starts.
pub const CLEANUP_THRESHOLD: f64 = 0.9;

/// Fraction of the global ceiling cleanup shrinks down to.
pub const CLEANUP_TARGET: f64 = 0.7;

/// Default period of the eager TTL sweep.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_constants() {
        assert!(DEFAULT_BLOB_MAX_BYTES > 0);
        assert!(DEFAULT_GLOBAL_MEMORY_LIMIT >= DEFAULT_BLOB_MAX_BYTES);
        assert!(CLEANUP_TARGET < CLEANUP_THRESHOLD);
        assert!(CLEANUP_THRESHOLD < 1.0);
    }
}
