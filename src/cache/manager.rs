// # Cache Manager
//
// Owns the blob, thumbnail, and upscale stores and keeps their combined
// footprint under one global ceiling. Each store already enforces its own
// bounds; the manager adds the cross-store policy: when aggregate usage
// reaches the cleanup threshold it shrinks back down to the cleanup
// target, evicting in rebuild-cost order. Upscales go first (they can be
// regenerated from blobs and their hash), thumbnails second, and the blob
// store last: those bytes are the page the user is looking at.

use crate::cache::blob_store::{BlobEntry, BlobStore, BlobStoreConfig};
use crate::cache::thumb_store::{ThumbEntry, ThumbStore, ThumbStoreConfig};
use crate::cache::upscale_store::{UpscaleEntry, UpscaleStore, UpscaleStoreConfig};
use crate::common::{ContentHash, PageIndex, ResourceId, ResourceMinter};
use crate::error::{PipelineError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for the cache manager and its stores.
#[derive(Debug, Clone)]
pub struct CacheManagerConfig {
    /// Ceiling on aggregate bytes across all three stores.
    pub global_limit_bytes: usize,

    /// Usage fraction at which cleanup kicks in.
    pub cleanup_threshold: f64,

    /// Usage fraction cleanup shrinks down to.
    pub cleanup_target: f64,

    pub blob: BlobStoreConfig,
    pub thumbs: ThumbStoreConfig,
    pub upscales: UpscaleStoreConfig,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            global_limit_bytes: super::DEFAULT_GLOBAL_MEMORY_LIMIT,
            cleanup_threshold: super::CLEANUP_THRESHOLD,
            cleanup_target: super::CLEANUP_TARGET,
            blob: BlobStoreConfig::default(),
            thumbs: ThumbStoreConfig::default(),
            upscales: UpscaleStoreConfig::default(),
        }
    }
}

impl CacheManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.global_limit_bytes == 0 {
            return Err(PipelineError::Configuration(
                "global_limit_bytes must be greater than 0".to_string(),
            ));
        }
        if !(0.0 < self.cleanup_threshold && self.cleanup_threshold <= 1.0) {
            return Err(PipelineError::Configuration(format!(
                "cleanup_threshold must be in (0, 1], got {}",
                self.cleanup_threshold
            )));
        }
        if self.cleanup_target >= self.cleanup_threshold {
            return Err(PipelineError::Configuration(
                "cleanup_target must be below cleanup_threshold".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time usage across the stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheUsageSnapshot {
    pub blob_items: usize,
    pub blob_bytes: usize,
    pub thumb_items: usize,
    pub thumb_bytes: usize,
    pub upscale_items: usize,
    pub upscale_bytes: usize,
    pub aggregate_bytes: usize,
    pub global_limit_bytes: usize,
    pub usage_ratio: f64,
}

/// The three stores behind one memory ceiling.
pub struct CacheManager {
    config: CacheManagerConfig,
    minter: Arc<dyn ResourceMinter>,
    blobs: BlobStore,
    thumbs: ThumbStore,
    upscales: UpscaleStore,
}

impl CacheManager {
    pub fn new(config: CacheManagerConfig, minter: Arc<dyn ResourceMinter>) -> Result<Self> {
        config.validate()?;

        let blobs = BlobStore::new(config.blob.clone(), Arc::clone(&minter))?;
        let thumbs = ThumbStore::new(config.thumbs.clone())?;
        let upscales = UpscaleStore::new(config.upscales.clone(), Arc::clone(&minter))?;

        Ok(Self { config, minter, blobs, thumbs, upscales })
    }

    /// Start the eager TTL sweepers on every store.
    pub fn start_sweepers(&self) {
        self.blobs.start_sweeper();
        self.thumbs.start_sweeper();
        self.upscales.start_sweeper();
    }

    pub fn stop_sweepers(&self) {
        self.blobs.stop_sweeper();
        self.thumbs.stop_sweeper();
        self.upscales.stop_sweeper();
    }

    pub fn minter(&self) -> &Arc<dyn ResourceMinter> {
        &self.minter
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn thumbs(&self) -> &ThumbStore {
        &self.thumbs
    }

    pub fn upscales(&self) -> &UpscaleStore {
        &self.upscales
    }

    pub fn aggregate_bytes(&self) -> usize {
        self.blobs.total_bytes() + self.thumbs.total_bytes() + self.upscales.total_bytes()
    }

    /// Aggregate usage as a fraction of the global ceiling.
    pub fn usage_ratio(&self) -> f64 {
        self.aggregate_bytes() as f64 / self.config.global_limit_bytes as f64
    }

    /// Whether usage has crossed the cleanup threshold.
    pub fn under_pressure(&self) -> bool {
        self.usage_ratio() >= self.config.cleanup_threshold
    }

    // ------------------------------------------------------------------
    // Blob operations
    // ------------------------------------------------------------------

    pub fn set_blob(
        &self,
        book_path: Option<&str>,
        page_index: PageIndex,
        bytes: Bytes,
        content_hash: Option<ContentHash>,
    ) -> ResourceId {
        self.maybe_cleanup();
        self.blobs.set(book_path, page_index, bytes, content_hash)
    }

    pub fn get_blob(&self, book_path: Option<&str>, page_index: PageIndex) -> Option<BlobEntry> {
        self.blobs.get(book_path, page_index)
    }

    pub fn has_blob(&self, book_path: Option<&str>, page_index: PageIndex) -> bool {
        self.blobs.has(book_path, page_index)
    }

    pub fn touch_blob(&self, book_path: Option<&str>, page_index: PageIndex) -> bool {
        self.blobs.touch(book_path, page_index)
    }

    pub fn delete_blob(&self, book_path: Option<&str>, page_index: PageIndex) -> bool {
        self.blobs.delete(book_path, page_index)
    }

    // ------------------------------------------------------------------
    // Thumbnail operations
    // ------------------------------------------------------------------

    pub fn set_thumbnail(
        &self,
        book_path: &str,
        page_index: PageIndex,
        payload: String,
        dimensions: Option<(u32, u32)>,
    ) {
        self.maybe_cleanup();
        self.thumbs.set(book_path, page_index, payload, dimensions);
    }

    pub fn get_thumbnail(&self, book_path: &str, page_index: PageIndex) -> Option<ThumbEntry> {
        self.thumbs.get(book_path, page_index)
    }

    // ------------------------------------------------------------------
    // Upscale operations
    // ------------------------------------------------------------------

    pub fn set_upscale(
        &self,
        source_hash: &ContentHash,
        bytes: Bytes,
        model: impl Into<String>,
        scale: u8,
        page_index: Option<PageIndex>,
    ) -> ResourceId {
        self.maybe_cleanup();
        self.upscales.set(source_hash, bytes, model, scale, page_index)
    }

    pub fn get_upscale(&self, source_hash: &ContentHash) -> Option<UpscaleEntry> {
        self.upscales.get(source_hash)
    }

    pub fn has_upscale(&self, source_hash: &ContentHash) -> bool {
        self.upscales.has(source_hash)
    }

    // ------------------------------------------------------------------
    // Cleanup policy
    // ------------------------------------------------------------------

    fn maybe_cleanup(&self) {
        if self.under_pressure() {
            self.perform_cleanup();
        }
    }

    /// Shrink aggregate usage down to the cleanup target. Returns bytes
    /// freed.
    ///
    /// Order: expire-sweep the rebuildable stores, then shrink upscales,
    /// then thumbnails, and only then the blob store.
    pub fn perform_cleanup(&self) -> usize {
        let before = self.aggregate_bytes();
        let target =
            (self.config.global_limit_bytes as f64 * self.config.cleanup_target) as usize;

        self.thumbs.cleanup();
        self.upscales.cleanup();

        if self.aggregate_bytes() > target {
            let leftover = target
                .saturating_sub(self.blobs.total_bytes() + self.thumbs.total_bytes());
            self.upscales.shrink_to(leftover.min(self.upscales.total_bytes()));
        }

        if self.aggregate_bytes() > target {
            let leftover = target
                .saturating_sub(self.blobs.total_bytes() + self.upscales.total_bytes());
            self.thumbs.shrink_to(leftover.min(self.thumbs.total_bytes()));
        }

        if self.aggregate_bytes() > target {
            let leftover = target
                .saturating_sub(self.thumbs.total_bytes() + self.upscales.total_bytes());
            self.blobs.shrink_to(leftover);
        }

        let freed = before.saturating_sub(self.aggregate_bytes());
        debug!(
            freed,
            aggregate = self.aggregate_bytes(),
            target,
            "cache cleanup pass"
        );
        freed
    }

    /// Purge every blob and thumbnail belonging to `book_path`. Upscale
    /// entries are hash-keyed and intentionally left in place.
    pub fn clear_book(&self, book_path: &str) -> usize {
        let blobs = self.blobs.purge_book(book_path);
        let thumbs = self.thumbs.purge_book(book_path);
        if blobs + thumbs > 0 {
            info!(book = book_path, blobs, thumbs, "purged book caches");
        }
        blobs + thumbs
    }

    /// Drop everything, including upscale entries.
    pub fn clear_all(&self) {
        self.blobs.clear();
        self.thumbs.clear();
        self.upscales.clear();
    }

    pub fn snapshot(&self) -> CacheUsageSnapshot {
        let aggregate_bytes = self.aggregate_bytes();
        CacheUsageSnapshot {
            blob_items: self.blobs.item_count(),
            blob_bytes: self.blobs.total_bytes(),
            thumb_items: self.thumbs.item_count(),
            thumb_bytes: self.thumbs.total_bytes(),
            upscale_items: self.upscales.item_count(),
            upscale_bytes: self.upscales.total_bytes(),
            aggregate_bytes,
            global_limit_bytes: self.config.global_limit_bytes,
            usage_ratio: aggregate_bytes as f64 / self.config.global_limit_bytes as f64,
        }
    }

    /// Idempotent teardown: stop timers and release every handle.
    pub fn dispose(&self) {
        self.stop_sweepers();
        self.clear_all();
    }
}
