// Thumbnail store: small encoded payloads keyed by
// `"thumb:{book_path}:{page_index}"`. Payload size is estimated as string
// length times two, matching the two-byte character cost of the encoded
// form upstream consumers hold.

use crate::cache::memory_cache::{MemoryCache, MemoryCacheConfig, MemoryCacheConfigUpdate};
use crate::cache::statistics::CacheMetrics;
use crate::common::PageIndex;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ThumbStoreConfig {
    pub max_bytes: usize,
    pub max_items: usize,
    pub default_ttl: Option<Duration>,
    pub cleanup_interval: Option<Duration>,
}

impl Default for ThumbStoreConfig {
    fn default() -> Self {
        Self {
            max_bytes: super::DEFAULT_THUMB_MAX_BYTES,
            max_items: super::DEFAULT_THUMB_MAX_ITEMS,
            default_ttl: Some(super::DEFAULT_THUMB_TTL),
            cleanup_interval: Some(super::DEFAULT_CLEANUP_INTERVAL),
        }
    }
}

/// A cached thumbnail.
#[derive(Debug, Clone)]
pub struct ThumbEntry {
    /// Encoded image payload (base64 or data-URL form).
    pub payload: String,
    pub dimensions: Option<(u32, u32)>,
    pub page_index: PageIndex,
}

pub fn thumb_key(book_path: &str, page_index: PageIndex) -> String {
    format!("thumb:{}:{}", book_path, page_index)
}

pub struct ThumbStore {
    cache: Arc<MemoryCache<ThumbEntry>>,
}

impl ThumbStore {
    pub fn new(config: ThumbStoreConfig) -> Result<Self> {
        let cache = Arc::new(MemoryCache::new(
            MemoryCacheConfig {
                max_bytes: config.max_bytes,
                max_items: config.max_items,
                default_ttl: config.default_ttl,
                cleanup_interval: config.cleanup_interval,
            },
            Box::new(|entry: &ThumbEntry| entry.payload.len() * 2),
        )?);
        Ok(Self { cache })
    }

    pub fn set(
        &self,
        book_path: &str,
        page_index: PageIndex,
        payload: String,
        dimensions: Option<(u32, u32)>,
    ) {
        self.cache.set(
            &thumb_key(book_path, page_index),
            ThumbEntry { payload, dimensions, page_index },
            None,
        );
    }

    pub fn get(&self, book_path: &str, page_index: PageIndex) -> Option<ThumbEntry> {
        self.cache.get(&thumb_key(book_path, page_index))
    }

    pub fn has(&self, book_path: &str, page_index: PageIndex) -> bool {
        self.cache.has(&thumb_key(book_path, page_index))
    }

    pub fn delete(&self, book_path: &str, page_index: PageIndex) -> bool {
        self.cache.delete(&thumb_key(book_path, page_index))
    }

    /// Delete every thumbnail belonging to `book_path`.
    pub fn purge_book(&self, book_path: &str) -> usize {
        let marker = format!("thumb:{}:", book_path);
        let keys: Vec<String> = self
            .cache
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(&marker))
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.cache.delete(&key) {
                removed += 1;
            }
        }
        removed
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

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ThumbStore {
        ThumbStore::new(ThumbStoreConfig {
            max_bytes: 4096,
            max_items: 16,
            default_ttl: None,
            cleanup_interval: None,
        })
        .unwrap()
    }

    #[test]
    fn test_payload_sized_at_twice_length() {
        let store = store();
        store.set("/books/a", 0, "x".repeat(100), Some((64, 96)));
        assert_eq!(store.total_bytes(), 200);
    }

    #[test]
    fn test_purge_book_is_idempotent() {
        let store = store();
        store.set("/books/a", 0, "aa".into(), None);
        store.set("/books/a", 1, "bb".into(), None);
        store.set("/books/b", 0, "cc".into(), None);

        assert_eq!(store.purge_book("/books/a"), 2);
        assert_eq!(store.purge_book("/books/a"), 0);
        assert!(store.has("/books/b", 0));
    }

    #[test]
    fn test_get_returns_dimensions() {
        let store = store();
        store.set("/books/a", 3, "thumb".into(), Some((128, 192)));

        let entry = store.get("/books/a", 3).unwrap();
        assert_eq!(entry.dimensions, Some((128, 192)));
        assert_eq!(entry.page_index, 3);
    }
}
