// # Generic Memory Cache
//
// Size-and-count-bounded LRU map with optional per-entry TTL, a pluggable
// size-of function, and a synchronous event stream. The three page stores
// (blob, thumbnail, upscale) are thin wrappers over this type.
//
// LRU order is kept in an explicit order list alongside the entry map:
// front is least recently used, back is most recently used, and every
// access reinserts the key at the back. Eviction pops from the front until
// the configured bounds hold again. TTL expiry is lazy on access and eager
// on the sweep timer.
//
// Removal hooks and event listeners are always invoked after the store
// lock is released, so a hook may call back into the cache.

use crate::cache::statistics::{CacheMetrics, EvictionReason};
use crate::error::{PipelineError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Computes the byte cost of a value at insert time.
pub type SizeOfFn<V> = Box<dyn Fn(&V) -> usize + Send + Sync>;

/// Observes cache events. Listeners run synchronously; a panicking listener
/// is caught and logged without affecting cache state.
pub type EventListener = Box<dyn Fn(&CacheEvent) + Send + Sync>;

/// Receives ownership of every removed value, exactly once per removal.
/// Stores use this to release resource handles deterministically.
pub type RemoveHook<V> = Box<dyn Fn(&str, V, EvictionReason) + Send + Sync>;

/// Configuration for a memory cache instance.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum total bytes across live entries.
    pub max_bytes: usize,

    /// Maximum number of live entries.
    pub max_items: usize,

    /// TTL applied when `set` is called without an explicit one.
    pub default_ttl: Option<Duration>,

    /// Period of the eager expiry sweep; `None` disables the sweeper.
    pub cleanup_interval: Option<Duration>,
}

impl MemoryCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(PipelineError::Configuration(
                "max_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_items == 0 {
            return Err(PipelineError::Configuration(
                "max_items must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial configuration update; `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCacheConfigUpdate {
    pub max_bytes: Option<usize>,
    pub max_items: Option<usize>,
    pub default_ttl: Option<Duration>,
    pub cleanup_interval: Option<Duration>,
}

/// Cache event, carrying the key and entry size where one is involved.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Hit { key: String },
    Miss { key: String },
    Set { key: String, byte_size: usize },
    Evict { key: String, byte_size: usize },
    Expire { key: String, byte_size: usize },
    Clear { entries: usize },
}

/// A live cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub byte_size: usize,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Key order, front = LRU, back = MRU.
    lru: VecDeque<String>,
    total_bytes: usize,
    config: MemoryCacheConfig,
}

impl<V> CacheState<V> {
    /// Move `key` to the MRU position.
    fn touch_lru(&mut self, key: &str) {
        self.lru.retain(|k| k != key);
        self.lru.push_back(key.to_string());
    }

    /// Remove one entry, keeping the byte accounting exact.
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.byte_size);
        self.lru.retain(|k| k != key);
        Some(entry)
    }
}

/// Size-bounded, TTL-aware LRU cache.
pub struct MemoryCache<V> {
    state: Mutex<CacheState<V>>,
    size_of: SizeOfFn<V>,
    listeners: RwLock<Vec<EventListener>>,
    remove_hook: RwLock<Option<RemoveHook<V>>>,
    metrics: Mutex<CacheMetrics>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<V> MemoryCache<V> {
    pub fn new(config: MemoryCacheConfig, size_of: SizeOfFn<V>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                lru: VecDeque::new(),
                total_bytes: 0,
                config,
            }),
            size_of,
            listeners: RwLock::new(Vec::new()),
            remove_hook: RwLock::new(None),
            metrics: Mutex::new(CacheMetrics::default()),
            sweeper: Mutex::new(None),
        })
    }

    /// Install the removal hook. At most one; stores install theirs at
    /// construction.
    pub fn set_remove_hook(&self, hook: RemoveHook<V>) {
        *self.remove_hook.write() = Some(hook);
    }

    pub fn add_listener(&self, listener: EventListener) {
        self.listeners.write().push(listener);
    }

    /// Insert `value` under `key`, evicting LRU entries first so the bounds
    /// hold after the insert. An existing entry under the same key is
    /// removed (and its value released) before the new one goes in.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let byte_size = (self.size_of)(&value);
        let now = Instant::now();
        let mut removed: Vec<(String, CacheEntry<V>, EvictionReason)> = Vec::new();

        {
            let mut state = self.state.lock();

            if let Some(prior) = state.remove_entry(key) {
                removed.push((key.to_string(), prior, EvictionReason::Replaced));
            }

            while !state.lru.is_empty()
                && (state.entries.len() >= state.config.max_items
                    || state.total_bytes + byte_size > state.config.max_bytes)
            {
                let victim = state.lru.front().cloned();
                match victim.and_then(|k| state.remove_entry(&k).map(|e| (k, e))) {
                    Some((k, e)) => removed.push((k, e, EvictionReason::LruEviction)),
                    None => break,
                }
            }

            let expires_at = ttl.or(state.config.default_ttl).map(|t| now + t);
            state.entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    byte_size,
                    created_at: now,
                    last_accessed: now,
                    expires_at,
                },
            );
            state.lru.push_back(key.to_string());
            state.total_bytes += byte_size;

            let mut metrics = self.metrics.lock();
            metrics.record_set();
            for (_, _, reason) in &removed {
                metrics.record_eviction(*reason);
            }
            metrics.update_memory_usage(state.total_bytes);
        }

        for (k, entry, reason) in removed {
            self.emit(&CacheEvent::Evict { key: k.clone(), byte_size: entry.byte_size });
            self.fire_remove(&k, entry.value, reason);
        }
        self.emit(&CacheEvent::Set { key: key.to_string(), byte_size });
    }

    /// Remove `key`. Returns `false` when absent.
    pub fn delete(&self, key: &str) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let entry = state.remove_entry(key);
            if entry.is_some() {
                let mut metrics = self.metrics.lock();
                metrics.record_eviction(EvictionReason::Manual);
                metrics.update_memory_usage(state.total_bytes);
            }
            entry
        };

        match entry {
            Some(entry) => {
                self.emit(&CacheEvent::Evict { key: key.to_string(), byte_size: entry.byte_size });
                self.fire_remove(key, entry.value, EvictionReason::Manual);
                true
            }
            None => false,
        }
    }

    /// Whether `key` holds a live, unexpired entry. An expired entry found
    /// here is removed on the spot.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let expired = {
            let mut state = self.state.lock();
            let is_expired = match state.entries.get(key) {
                Some(entry) => entry.is_expired(now),
                None => return false,
            };
            if !is_expired {
                return true;
            }

            let entry = state.remove_entry(key);
            let mut metrics = self.metrics.lock();
            metrics.record_eviction(EvictionReason::Expired);
            metrics.update_memory_usage(state.total_bytes);
            entry
        };

        if let Some(entry) = expired {
            self.emit(&CacheEvent::Expire { key: key.to_string(), byte_size: entry.byte_size });
            self.fire_remove(key, entry.value, EvictionReason::Expired);
        }
        false
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let drained: Vec<(String, CacheEntry<V>)> = {
            let mut state = self.state.lock();
            state.lru.clear();
            state.total_bytes = 0;
            let drained = state.entries.drain().collect::<Vec<_>>();

            let mut metrics = self.metrics.lock();
            for _ in &drained {
                metrics.record_eviction(EvictionReason::CacheCleared);
            }
            metrics.update_memory_usage(0);
            drained
        };

        let count = drained.len();
        for (key, entry) in drained {
            self.fire_remove(&key, entry.value, EvictionReason::CacheCleared);
        }
        self.emit(&CacheEvent::Clear { entries: count });
    }

    /// Eagerly remove expired entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let removed: Vec<(String, CacheEntry<V>)> = {
            let mut state = self.state.lock();
            let expired_keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();

            let removed: Vec<(String, CacheEntry<V>)> = expired_keys
                .into_iter()
                .filter_map(|k| state.remove_entry(&k).map(|e| (k, e)))
                .collect();

            if !removed.is_empty() {
                let mut metrics = self.metrics.lock();
                for _ in &removed {
                    metrics.record_eviction(EvictionReason::Expired);
                }
                metrics.update_memory_usage(state.total_bytes);
            }
            removed
        };

        let count = removed.len();
        for (key, entry) in removed {
            self.emit(&CacheEvent::Expire { key: key.clone(), byte_size: entry.byte_size });
            self.fire_remove(&key, entry.value, EvictionReason::Expired);
        }
        if count > 0 {
            debug!(expired = count, "cache expiry sweep");
        }
        count
    }

    /// Evict LRU entries until total bytes drop to `target_bytes` or the
    /// store is empty. Returns bytes freed.
    pub fn shrink_to(&self, target_bytes: usize) -> usize {
        let removed: Vec<(String, CacheEntry<V>)> = {
            let mut state = self.state.lock();
            // Snapshot the order first; removal must not depend on an
            // iterator over the list it mutates.
            let order: Vec<String> = state.lru.iter().cloned().collect();
            let mut removed = Vec::new();

            for key in order {
                if state.total_bytes <= target_bytes {
                    break;
                }
                if let Some(entry) = state.remove_entry(&key) {
                    removed.push((key, entry));
                }
            }

            if !removed.is_empty() {
                let mut metrics = self.metrics.lock();
                for _ in &removed {
                    metrics.record_eviction(EvictionReason::Shrink);
                }
                metrics.update_memory_usage(state.total_bytes);
            }
            removed
        };

        let mut freed = 0;
        for (key, entry) in removed {
            freed += entry.byte_size;
            self.emit(&CacheEvent::Evict { key: key.clone(), byte_size: entry.byte_size });
            self.fire_remove(&key, entry.value, EvictionReason::Shrink);
        }
        freed
    }

    /// Live keys in LRU to MRU order, excluding expired entries.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .lru
            .iter()
            .filter(|k| {
                state
                    .entries
                    .get(*k)
                    .map(|e| !e.is_expired(now))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn item_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.state.lock().config.max_bytes
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().clone()
    }

    fn emit(&self, event: &CacheEvent) {
        for listener in self.listeners.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(?event, "cache event listener panicked");
            }
        }
    }

    fn fire_remove(&self, key: &str, value: V, reason: EvictionReason) {
        if let Some(hook) = self.remove_hook.read().as_ref() {
            hook(key, value, reason);
        }
    }
}

impl<V: Clone> MemoryCache<V> {
    /// Look up `key`, bumping it to the MRU position on a hit. An expired
    /// entry is removed and reported as an expire event.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        enum Outcome<V> {
            Hit(V),
            Expired(CacheEntry<V>),
            Absent,
        }

        let outcome = {
            let mut state = self.state.lock();
            let probe = state.entries.get(key).map(|e| e.is_expired(now));
            match probe {
                Some(true) => {
                    let entry = state.remove_entry(key).expect("entry present");
                    let mut metrics = self.metrics.lock();
                    metrics.record_miss();
                    metrics.record_eviction(EvictionReason::Expired);
                    metrics.update_memory_usage(state.total_bytes);
                    Outcome::Expired(entry)
                }
                Some(false) => {
                    let value = {
                        let entry = state.entries.get_mut(key).expect("entry present");
                        entry.last_accessed = now;
                        entry.value.clone()
                    };
                    state.touch_lru(key);
                    self.metrics.lock().record_hit();
                    Outcome::Hit(value)
                }
                None => {
                    self.metrics.lock().record_miss();
                    Outcome::Absent
                }
            }
        };

        match outcome {
            Outcome::Hit(value) => {
                self.emit(&CacheEvent::Hit { key: key.to_string() });
                Some(value)
            }
            Outcome::Expired(entry) => {
                self.emit(&CacheEvent::Expire { key: key.to_string(), byte_size: entry.byte_size });
                self.fire_remove(key, entry.value, EvictionReason::Expired);
                None
            }
            Outcome::Absent => {
                self.emit(&CacheEvent::Miss { key: key.to_string() });
                None
            }
        }
    }

    /// Bump `key` to MRU without cloning the value out.
    pub fn touch(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let live = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed = now;
                true
            }
            _ => false,
        };
        if live {
            state.touch_lru(key);
        }
        live
    }
}

impl<V: Send + 'static> MemoryCache<V> {
    /// Re-apply capacity bounds immediately and restart the sweep timer if
    /// its interval changed.
    pub fn update_config(self: &Arc<Self>, update: MemoryCacheConfigUpdate) {
        let (interval_changed, removed) = {
            let mut state = self.state.lock();
            let mut interval_changed = false;

            if let Some(max_bytes) = update.max_bytes {
                state.config.max_bytes = max_bytes;
            }
            if let Some(max_items) = update.max_items {
                state.config.max_items = max_items;
            }
            if let Some(ttl) = update.default_ttl {
                state.config.default_ttl = Some(ttl);
            }
            if let Some(interval) = update.cleanup_interval {
                if state.config.cleanup_interval != Some(interval) {
                    state.config.cleanup_interval = Some(interval);
                    interval_changed = true;
                }
            }

            let mut removed = Vec::new();
            while !state.lru.is_empty()
                && (state.entries.len() > state.config.max_items
                    || state.total_bytes > state.config.max_bytes)
            {
                let victim = state.lru.front().cloned();
                match victim.and_then(|k| state.remove_entry(&k).map(|e| (k, e))) {
                    Some(pair) => removed.push(pair),
                    None => break,
                }
            }

            if !removed.is_empty() {
                let mut metrics = self.metrics.lock();
                for _ in &removed {
                    metrics.record_eviction(EvictionReason::LruEviction);
                }
                metrics.update_memory_usage(state.total_bytes);
            }
            (interval_changed, removed)
        };

        for (key, entry) in removed {
            self.emit(&CacheEvent::Evict { key: key.clone(), byte_size: entry.byte_size });
            self.fire_remove(&key, entry.value, EvictionReason::LruEviction);
        }

        if interval_changed {
            self.start_sweeper();
        }
    }

    /// Start (or restart) the eager expiry sweeper. No-op when the config
    /// has no cleanup interval.
    pub fn start_sweeper(self: &Arc<Self>) {
        let interval = match self.state.lock().config.cleanup_interval {
            Some(interval) => interval,
            None => return,
        };

        let cache = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.cleanup();
                    }
                    None => break,
                }
            }
        });

        if let Some(prior) = self.sweeper.lock().replace(handle) {
            prior.abort();
        }
    }

    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl<V> Drop for MemoryCache<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_cache(max_bytes: usize, max_items: usize) -> MemoryCache<Vec<u8>> {
        MemoryCache::new(
            MemoryCacheConfig {
                max_bytes,
                max_items,
                default_ttl: None,
                cleanup_interval: None,
            },
            Box::new(|v: &Vec<u8>| v.len()),
        )
        .unwrap()
    }

    #[test]
    fn test_set_get_roundtrip() {
        let cache = test_cache(1024, 10);
        cache.set("a", vec![1, 2, 3], None);

        assert_eq!(cache.get("a"), Some(vec![1, 2, 3]));
        assert_eq!(cache.item_count(), 1);
        assert_eq!(cache.total_bytes(), 3);
    }

    #[test]
    fn test_delete_then_get_misses() {
        let cache = test_cache(1024, 10);
        cache.set("a", vec![1], None);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = test_cache(1024, 3);
        cache.set("a", vec![1], None);
        cache.set("b", vec![2], None);
        cache.set("c", vec![3], None);

        // Touch "a" so "b" becomes the oldest.
        cache.get("a");
        cache.set("d", vec![4], None);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn test_byte_bound_enforced_pre_insert() {
        let cache = test_cache(10, 100);
        cache.set("a", vec![0; 4], None);
        cache.set("b", vec![0; 4], None);
        cache.set("c", vec![0; 4], None);

        assert!(cache.total_bytes() <= 10);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_byte_accounting_matches_entries() {
        let cache = test_cache(1024, 100);
        for i in 0..20 {
            cache.set(&format!("k{}", i), vec![0; i], None);
        }
        cache.delete("k5");
        cache.delete("k10");

        let expected: usize = cache
            .keys()
            .iter()
            .map(|k| cache.get(k).unwrap().len())
            .sum();
        assert_eq!(cache.total_bytes(), expected);
    }

    #[test]
    fn test_replace_releases_prior_value() {
        let cache = test_cache(1024, 10);
        let replaced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&replaced);
        cache.set_remove_hook(Box::new(move |_, _, reason| {
            if reason == EvictionReason::Replaced {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        cache.set("a", vec![0; 8], None);
        cache.set("a", vec![0; 4], None);

        assert_eq!(replaced.load(Ordering::SeqCst), 1);
        assert_eq!(cache.total_bytes(), 4);
        assert_eq!(cache.item_count(), 1);
    }

    #[test]
    fn test_remove_hook_fires_once_per_entry() {
        let cache = test_cache(8, 100);
        let removals = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&removals);
        cache.set_remove_hook(Box::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        cache.set("a", vec![0; 4], None);
        cache.set("b", vec![0; 4], None);
        cache.set("c", vec![0; 4], None); // evicts "a"
        cache.delete("b");
        cache.clear(); // removes "c"

        assert_eq!(removals.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy_on_get() {
        let cache = test_cache(1024, 10);
        cache.set("a", vec![1], Some(Duration::from_millis(20)));

        assert!(cache.get("a").is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("a").is_none());
        assert_eq!(cache.item_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_expired() {
        let cache = test_cache(1024, 10);
        cache.set("a", vec![1], Some(Duration::from_millis(10)));
        cache.set("b", vec![2], Some(Duration::from_millis(10)));
        cache.set("c", vec![3], None);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let swept = cache.cleanup();

        assert_eq!(swept, 2);
        assert_eq!(cache.item_count(), 1);
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_keys_in_lru_order() {
        let cache = test_cache(1024, 10);
        cache.set("a", vec![1], None);
        cache.set("b", vec![2], None);
        cache.set("c", vec![3], None);
        cache.get("a");

        assert_eq!(cache.keys(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_shrink_to_frees_lru_first() {
        let cache = test_cache(1024, 100);
        cache.set("a", vec![0; 10], None);
        cache.set("b", vec![0; 10], None);
        cache.set("c", vec![0; 10], None);

        let freed = cache.shrink_to(15);

        assert_eq!(freed, 20);
        assert!(cache.total_bytes() <= 15);
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_shrink_empty_store_is_noop() {
        let cache = test_cache(1024, 10);
        assert_eq!(cache.shrink_to(0), 0);
    }

    #[test]
    fn test_listener_panics_are_contained() {
        let cache = test_cache(1024, 10);
        cache.add_listener(Box::new(|_| panic!("bad listener")));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        cache.add_listener(Box::new(move |event| {
            if matches!(event, CacheEvent::Hit { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        cache.set("a", vec![1], None);
        cache.get("a");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.item_count(), 1);
    }

    #[tokio::test]
    async fn test_update_config_reapplies_bounds() {
        let cache = Arc::new(test_cache(1024, 10));
        for i in 0..6 {
            cache.set(&format!("k{}", i), vec![0; 10], None);
        }

        cache.update_config(MemoryCacheConfigUpdate {
            max_items: Some(2),
            ..Default::default()
        });

        assert_eq!(cache.item_count(), 2);
        assert!(cache.get("k4").is_some());
        assert!(cache.get("k5").is_some());
    }

    #[test]
    fn test_oversize_entry_still_inserts_alone() {
        let cache = test_cache(10, 10);
        cache.set("small", vec![0; 4], None);
        cache.set("big", vec![0; 50], None);

        assert_eq!(cache.item_count(), 1);
        assert!(cache.get("big").is_some());
    }
}
