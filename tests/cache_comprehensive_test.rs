// Cache Comprehensive Test
//
// Store-level invariants exercised through the public cache API: byte
// accounting, bound enforcement, exactly-once handle release, tiered
// cleanup, and book purge semantics.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use pagepipe::cache::{
    BlobStoreConfig, CacheManager, CacheManagerConfig, MemoryCache, MemoryCacheConfig,
    ThumbStoreConfig, UpscaleStoreConfig,
};
use pagepipe::common::{ContentHash, InMemoryMinter, ResourceMinter};

const MIB: usize = 1024 * 1024;

fn manager_config(global: usize) -> CacheManagerConfig {
    CacheManagerConfig {
        global_limit_bytes: global,
        cleanup_threshold: 0.9,
        cleanup_target: 0.7,
        blob: BlobStoreConfig {
            max_bytes: global,
            max_items: 100,
            default_ttl: None,
            cleanup_interval: None,
            revoke_on_evict: true,
        },
        thumbs: ThumbStoreConfig {
            max_bytes: global,
            max_items: 100,
            default_ttl: None,
            cleanup_interval: None,
        },
        upscales: UpscaleStoreConfig {
            max_bytes: global,
            max_items: 100,
            default_ttl: None,
            cleanup_interval: None,
        },
    }
}

#[test]
fn test_byte_accounting_stays_exact_under_churn() {
    let cache: MemoryCache<Vec<u8>> = MemoryCache::new(
        MemoryCacheConfig {
            max_bytes: 4096,
            max_items: 32,
            default_ttl: None,
            cleanup_interval: None,
        },
        Box::new(|v: &Vec<u8>| v.len()),
    )
    .unwrap();

    // Interleave inserts, replacements, and deletes.
    for round in 0..5 {
        for i in 0..40usize {
            cache.set(&format!("k{}", i % 16), vec![0u8; (i * 7 + round) % 200], None);
        }
        for i in 0..8usize {
            cache.delete(&format!("k{}", i * 2));
        }

        let live_bytes: usize = cache
            .keys()
            .iter()
            .map(|k| cache.get(k).map(|v| v.len()).unwrap_or(0))
            .sum();
        assert_eq!(cache.total_bytes(), live_bytes);
        assert!(cache.total_bytes() <= 4096);
        assert!(cache.item_count() <= 32);
    }
}

#[test]
fn test_handles_released_exactly_once_under_eviction_storm() {
    let minter = Arc::new(InMemoryMinter::new());
    let manager =
        CacheManager::new(manager_config(2 * MIB), Arc::clone(&minter) as Arc<dyn ResourceMinter>)
            .unwrap();

    // Far more data than fits; most entries get evicted along the way.
    for i in 0..50usize {
        manager.set_blob(Some("/books/storm"), i, Bytes::from(vec![0u8; MIB / 8]), None);
    }

    let live = minter.live_count() as u64;
    assert_eq!(minter.minted_total(), minter.released_total() + live);
    assert_eq!(live, manager.blobs().item_count() as u64);

    manager.clear_all();
    assert_eq!(minter.live_count(), 0);
    assert_eq!(minter.minted_total(), minter.released_total());
}

#[test]
fn test_set_delete_roundtrip() {
    let minter = Arc::new(InMemoryMinter::new());
    let manager =
        CacheManager::new(manager_config(MIB), Arc::clone(&minter) as Arc<dyn ResourceMinter>)
            .unwrap();

    manager.set_blob(Some("/books/a"), 0, Bytes::from_static(b"page"), None);
    let entry = manager.get_blob(Some("/books/a"), 0).unwrap();
    assert_eq!(&entry.bytes[..], b"page");

    assert!(manager.delete_blob(Some("/books/a"), 0));
    assert!(manager.get_blob(Some("/books/a"), 0).is_none());
    assert!(!minter.is_live(&entry.handle));
}

#[test]
fn test_tiered_cleanup_prefers_rebuildable_stores() {
    let minter = Arc::new(InMemoryMinter::new());
    let manager =
        CacheManager::new(manager_config(10 * MIB), Arc::clone(&minter) as Arc<dyn ResourceMinter>)
            .unwrap();

    // 4 MiB of blobs, 1 MiB of thumbnails, 5 MiB of upscales: at the
    // ceiling.
    for i in 0..4usize {
        manager.set_blob(Some("/books/a"), i, Bytes::from(vec![0u8; MIB]), None);
    }
    manager.set_thumbnail("/books/a", 0, "t".repeat(MIB / 2), None);
    for i in 0..5usize {
        let hash = ContentHash::of(format!("upscale {}", i).as_bytes());
        manager.set_upscale(&hash, Bytes::from(vec![0u8; MIB]), "esrgan", 2, None);
    }

    let blob_bytes = manager.blobs().total_bytes();
    manager.perform_cleanup();

    assert!(manager.aggregate_bytes() <= 7 * MIB);
    // Blobs survive: the rebuildable stores absorbed the whole shrink.
    assert_eq!(manager.blobs().total_bytes(), blob_bytes);
    assert!(manager.upscales().total_bytes() < 5 * MIB);
}

#[test]
fn test_ttl_expiry_via_cleanup() {
    let minter = Arc::new(InMemoryMinter::new());
    let mut config = manager_config(MIB);
    config.blob.default_ttl = Some(Duration::from_millis(1));
    let manager =
        CacheManager::new(config, Arc::clone(&minter) as Arc<dyn ResourceMinter>).unwrap();

    manager.set_blob(Some("/books/a"), 0, Bytes::from_static(b"page"), None);
    std::thread::sleep(Duration::from_millis(10));

    assert_eq!(manager.blobs().cleanup(), 1);
    assert_eq!(manager.blobs().item_count(), 0);
    assert_eq!(minter.live_count(), 0);
}

#[test]
fn test_purge_book_is_idempotent_and_scoped() {
    let minter = Arc::new(InMemoryMinter::new());
    let manager =
        CacheManager::new(manager_config(MIB), Arc::clone(&minter) as Arc<dyn ResourceMinter>)
            .unwrap();

    for i in 0..3usize {
        manager.set_blob(Some("/books/a"), i, Bytes::from_static(b"a"), None);
        manager.set_blob(Some("/books/b"), i, Bytes::from_static(b"b"), None);
    }
    let hash = ContentHash::of(b"shared");
    manager.set_upscale(&hash, Bytes::from_static(b"up"), "esrgan", 2, Some(1));

    assert_eq!(manager.clear_book("/books/a"), 3);
    assert_eq!(manager.clear_book("/books/a"), 0);
    assert_eq!(manager.blobs().item_count(), 3);
    assert!(manager.has_upscale(&hash));
}

#[test]
fn test_upscale_survives_until_its_own_eviction() {
    let minter = Arc::new(InMemoryMinter::new());
    let mut config = manager_config(MIB);
    config.upscales.max_items = 2;
    let manager =
        CacheManager::new(config, Arc::clone(&minter) as Arc<dyn ResourceMinter>).unwrap();

    let first = ContentHash::of(b"one");
    manager.set_upscale(&first, Bytes::from_static(b"1"), "esrgan", 2, None);
    manager.set_upscale(&ContentHash::of(b"two"), Bytes::from_static(b"2"), "esrgan", 2, None);
    assert!(manager.has_upscale(&first));

    // Third insert pushes the first out by the store's own LRU bound.
    manager.set_upscale(&ContentHash::of(b"three"), Bytes::from_static(b"3"), "esrgan", 2, None);
    assert!(!manager.has_upscale(&first));
    assert_eq!(manager.upscales().item_count(), 2);
}

#[test]
fn test_dispose_twice_is_noop() {
    let minter = Arc::new(InMemoryMinter::new());
    let manager =
        CacheManager::new(manager_config(MIB), Arc::clone(&minter) as Arc<dyn ResourceMinter>)
            .unwrap();

    manager.set_blob(Some("/books/a"), 0, Bytes::from_static(b"page"), None);
    manager.dispose();
    manager.dispose();

    assert_eq!(manager.aggregate_bytes(), 0);
    assert_eq!(minter.live_count(), 0);
}
