// # Upscale Store
//
// Upscaled page bytes keyed by the *source content hash*, not the page
// index: the same bytes appearing at a different position (or in a
// different book) still hit. Entries therefore survive book switches and
// are only removed by LRU pressure, TTL, or an explicit clear.

use crate::cache::memory_cache::{MemoryCache, MemoryCacheConfig, MemoryCacheConfigUpdate};
use crate::cache::statistics::CacheMetrics;
use crate::common::{ContentHash, PageIndex, ResourceId, ResourceMinter};
use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UpscaleStoreConfig {
    pub max_bytes: usize,
    pub max_items: usize,
    pub default_ttl: Option<Duration>,
    pub cleanup_interval: Option<Duration>,
}

impl Default for UpscaleStoreConfig {
    fn default() -> Self {
        Self {
            max_bytes: super::DEFAULT_UPSCALE_MAX_BYTES,
            max_items: super::DEFAULT_UPSCALE_MAX_ITEMS,
            default_ttl: Some(super::DEFAULT_UPSCALE_TTL),
            cleanup_interval: Some(super::DEFAULT_CLEANUP_INTERVAL),
        }
    }
}

/// A cached upscale result.
#[derive(Debug, Clone)]
pub struct UpscaleEntry {
    pub bytes: Bytes,
    pub handle: ResourceId,
    pub source_hash: ContentHash,
    pub model: String,
    pub scale: u8,
    /// Page the result was first produced for, if any. Informational; the
    /// hash is the identity.
    pub page_index: Option<PageIndex>,
}

pub struct UpscaleStore {
    cache: Arc<MemoryCache<UpscaleEntry>>,
    minter: Arc<dyn ResourceMinter>,
}

impl UpscaleStore {
    pub fn new(config: UpscaleStoreConfig, minter: Arc<dyn ResourceMinter>) -> Result<Self> {
        let cache = Arc::new(MemoryCache::new(
            MemoryCacheConfig {
                max_bytes: config.max_bytes,
                max_items: config.max_items,
                default_ttl: config.default_ttl,
                cleanup_interval: config.cleanup_interval,
            },
            Box::new(|entry: &UpscaleEntry| entry.bytes.len()),
        )?);

        {
            let minter = Arc::clone(&minter);
            cache.set_remove_hook(Box::new(move |_key, entry: UpscaleEntry, _reason| {
                minter.release(&entry.handle);
            }));
        }

        Ok(Self { cache, minter })
    }

    /// Store an upscale result, minting a fresh handle for it.
    pub fn set(
        &self,
        source_hash: &ContentHash,
        bytes: Bytes,
        model: impl Into<String>,
        scale: u8,
        page_index: Option<PageIndex>,
    ) -> ResourceId {
        let handle = self.minter.mint(&bytes);
        self.cache.set(
            source_hash.as_str(),
            UpscaleEntry {
                bytes,
                handle: handle.clone(),
                source_hash: source_hash.clone(),
                model: model.into(),
                scale,
                page_index,
            },
            None,
        );
        handle
    }

    pub fn get(&self, source_hash: &ContentHash) -> Option<UpscaleEntry> {
        self.cache.get(source_hash.as_str())
    }

    pub fn has(&self, source_hash: &ContentHash) -> bool {
        self.cache.has(source_hash.as_str())
    }

    pub fn delete(&self, source_hash: &ContentHash) -> bool {
        self.cache.delete(source_hash.as_str())
    }

    pub fn shrink_to(&self, target_bytes: usize) -> usize {
        self.cache.shrink_to(target_bytes)
    }

    pub fn cleanup(&self) -> usize {
        self.cache.cleanup()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn item_count(&self) -> usize {
        self.cache.item_count()
    }

    pub fn total_bytes(&self) -> usize {
        self.cache.total_bytes()
    }

    pub fn max_bytes(&self) -> usize {
        self.cache.max_bytes()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    pub fn update_config(&self, update: MemoryCacheConfigUpdate) {
        self.cache.update_config(update);
    }

    pub fn start_sweeper(&self) {
        self.cache.start_sweeper();
    }

    pub fn stop_sweeper(&self) {
        self.cache.stop_sweeper();
    }
}

impl Drop for UpscaleStore {
    fn drop(&mut self) {
        self.cache.clear();
    }
}
