// # Blob Store
//
// Page bytes keyed by `"{book_path}:{page_index}"` (or `"page:{index}"`
// when no book is bound). Every insert mints an external resource handle
// for the bytes; the removal hook releases it and clears the handle
// lookup map, so a handle is live exactly while its entry is.

use crate::cache::memory_cache::{
    EventListener, MemoryCache, MemoryCacheConfig, MemoryCacheConfigUpdate,
};
use crate::cache::statistics::CacheMetrics;
use crate::common::{ContentHash, PageIndex, ResourceId, ResourceMinter};
use crate::error::Result;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the blob store.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    pub max_bytes: usize,
    pub max_items: usize,
    pub default_ttl: Option<Duration>,
    pub cleanup_interval: Option<Duration>,

    /// Release the resource handle when an entry is removed. Disable only
    /// when a consumer takes over handle ownership at eviction time.
    pub revoke_on_evict: bool,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            max_bytes: super::DEFAULT_BLOB_MAX_BYTES,
            max_items: super::DEFAULT_BLOB_MAX_ITEMS,
            default_ttl: Some(super::DEFAULT_BLOB_TTL),
            cleanup_interval: Some(super::DEFAULT_CLEANUP_INTERVAL),
            revoke_on_evict: true,
        }
    }
}

/// A cached page blob.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub bytes: Bytes,
    pub handle: ResourceId,
    pub page_index: PageIndex,
    pub content_hash: Option<ContentHash>,
}

/// Cache key for a page blob.
pub fn blob_key(book_path: Option<&str>, page_index: PageIndex) -> String {
    match book_path {
        Some(book) => format!("{}:{}", book, page_index),
        None => format!("page:{}", page_index),
    }
}

/// Size-bounded store of page bytes with externally visible handles.
pub struct BlobStore {
    cache: Arc<MemoryCache<BlobEntry>>,
    minter: Arc<dyn ResourceMinter>,
    by_handle: Arc<DashMap<ResourceId, String>>,
}

impl BlobStore {
    pub fn new(config: BlobStoreConfig, minter: Arc<dyn ResourceMinter>) -> Result<Self> {
        let cache = Arc::new(MemoryCache::new(
            MemoryCacheConfig {
                max_bytes: config.max_bytes,
                max_items: config.max_items,
                default_ttl: config.default_ttl,
                cleanup_interval: config.cleanup_interval,
            },
            Box::new(|entry: &BlobEntry| entry.bytes.len()),
        )?);

        let by_handle: Arc<DashMap<ResourceId, String>> = Arc::new(DashMap::new());

        {
            let minter = Arc::clone(&minter);
            let by_handle = Arc::clone(&by_handle);
            let revoke = config.revoke_on_evict;
            cache.set_remove_hook(Box::new(move |_key, entry: BlobEntry, _reason| {
                by_handle.remove(&entry.handle);
                if revoke {
                    minter.release(&entry.handle);
                }
            }));
        }

        Ok(Self { cache, minter, by_handle })
    }

    /// Store page bytes, minting a fresh handle. Replacing an existing key
    /// releases the prior handle through the removal hook.
    pub fn set(
        &self,
        book_path: Option<&str>,
        page_index: PageIndex,
        bytes: Bytes,
        content_hash: Option<ContentHash>,
    ) -> ResourceId {
        let key = blob_key(book_path, page_index);
        let handle = self.minter.mint(&bytes);

        // Insert into the cache first: replacing an existing entry fires
        // the removal hook for the old handle under the same key, which
        // must not clobber the new entry's handle mapping.
        self.cache.set(
            &key,
            BlobEntry { bytes, handle: handle.clone(), page_index, content_hash },
            None,
        );
        self.by_handle.insert(handle.clone(), key);
        handle
    }

    pub fn get(&self, book_path: Option<&str>, page_index: PageIndex) -> Option<BlobEntry> {
        self.cache.get(&blob_key(book_path, page_index))
    }

    pub fn has(&self, book_path: Option<&str>, page_index: PageIndex) -> bool {
        self.cache.has(&blob_key(book_path, page_index))
    }

    /// LRU-bump without cloning the entry out.
    pub fn touch(&self, book_path: Option<&str>, page_index: PageIndex) -> bool {
        self.cache.touch(&blob_key(book_path, page_index))
    }

    pub fn delete(&self, book_path: Option<&str>, page_index: PageIndex) -> bool {
        self.cache.delete(&blob_key(book_path, page_index))
    }

    /// Resolve a handle back to its cache key.
    pub fn key_for_handle(&self, handle: &ResourceId) -> Option<String> {
        self.by_handle.get(handle).map(|entry| entry.value().clone())
    }

    /// Delete every entry belonging to `book_path`. Returns how many were
    /// removed.
    pub fn purge_book(&self, book_path: &str) -> usize {
        let prefix = format!("{}:", book_path);
        let keys: Vec<String> = self
            .cache
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.cache.delete(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// Evict LRU entries until total bytes drop to `target_bytes`.
    pub fn shrink_to(&self, target_bytes: usize) -> usize {
        self.cache.shrink_to(target_bytes)
    }

    pub fn cleanup(&self) -> usize {
        self.cache.cleanup()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.cache.keys()
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

    pub fn add_listener(&self, listener: EventListener) {
        self.cache.add_listener(listener);
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

impl Drop for BlobStore {
    fn drop(&mut self) {
        // Store destruction releases every live handle, same as clear.
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::InMemoryMinter;

    fn store_with_minter(max_bytes: usize, max_items: usize) -> (BlobStore, Arc<InMemoryMinter>) {
        let minter = Arc::new(InMemoryMinter::new());
        let store = BlobStore::new(
            BlobStoreConfig {
                max_bytes,
                max_items,
                default_ttl: None,
                cleanup_interval: None,
                revoke_on_evict: true,
            },
            Arc::clone(&minter) as Arc<dyn ResourceMinter>,
        )
        .unwrap();
        (store, minter)
    }

    #[test]
    fn test_set_mints_live_handle() {
        let (store, minter) = store_with_minter(1024, 10);
        let handle = store.set(Some("/books/a"), 0, Bytes::from_static(b"page"), None);

        assert!(minter.is_live(&handle));
        let entry = store.get(Some("/books/a"), 0).unwrap();
        assert_eq!(entry.handle, handle);
        assert_eq!(store.key_for_handle(&handle).as_deref(), Some("/books/a:0"));
    }

    #[test]
    fn test_delete_releases_handle_once() {
        let (store, minter) = store_with_minter(1024, 10);
        let handle = store.set(Some("/books/a"), 0, Bytes::from_static(b"page"), None);

        assert!(store.delete(Some("/books/a"), 0));
        assert!(!minter.is_live(&handle));
        assert_eq!(minter.released_total(), 1);
        assert!(store.key_for_handle(&handle).is_none());
    }

    #[test]
    fn test_eviction_releases_handle() {
        let (store, minter) = store_with_minter(8, 10);
        let first = store.set(Some("b"), 0, Bytes::from_static(b"aaaa"), None);
        let _second = store.set(Some("b"), 1, Bytes::from_static(b"bbbb"), None);
        let _third = store.set(Some("b"), 2, Bytes::from_static(b"cccc"), None);

        assert!(!minter.is_live(&first));
        assert_eq!(minter.live_count(), 2);
        assert!(store.total_bytes() <= 8);
    }

    #[test]
    fn test_replace_releases_prior_handle() {
        let (store, minter) = store_with_minter(1024, 10);
        let first = store.set(Some("b"), 0, Bytes::from_static(b"v1"), None);
        let second = store.set(Some("b"), 0, Bytes::from_static(b"v2"), None);

        assert!(!minter.is_live(&first));
        assert!(minter.is_live(&second));
        assert_eq!(store.item_count(), 1);
    }

    #[test]
    fn test_purge_book_leaves_other_books() {
        let (store, minter) = store_with_minter(1024, 10);
        store.set(Some("/books/a"), 0, Bytes::from_static(b"a0"), None);
        store.set(Some("/books/a"), 1, Bytes::from_static(b"a1"), None);
        let kept = store.set(Some("/books/b"), 0, Bytes::from_static(b"b0"), None);

        assert_eq!(store.purge_book("/books/a"), 2);
        assert_eq!(store.purge_book("/books/a"), 0);
        assert_eq!(store.item_count(), 1);
        assert!(minter.is_live(&kept));
        assert_eq!(minter.live_count(), 1);
    }

    #[test]
    fn test_shrink_to_reports_freed_bytes() {
        let (store, _minter) = store_with_minter(1024, 10);
        store.set(None, 0, Bytes::from(vec![0u8; 100]), None);
        store.set(None, 1, Bytes::from(vec![0u8; 100]), None);

        let freed = store.shrink_to(100);
        assert_eq!(freed, 100);
        assert!(store.total_bytes() <= 100);
    }

    #[test]
    fn test_clear_releases_all_handles() {
        let (store, minter) = store_with_minter(1024, 10);
        for i in 0..5 {
            store.set(Some("b"), i, Bytes::from_static(b"x"), None);
        }
        store.clear();

        assert_eq!(minter.live_count(), 0);
        assert_eq!(store.item_count(), 0);
        assert_eq!(store.total_bytes(), 0);
    }
}
