// # Cache Statistics
//
// Per-store metrics for hit/miss analysis and memory accounting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reason a cache entry was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionReason {
    /// Entry expired (TTL).
    Expired,

    /// LRU eviction making room for an insert.
    LruEviction,

    /// Replaced by a new value under the same key.
    Replaced,

    /// Removed by a shrink pass under memory pressure.
    Shrink,

    /// Explicit delete.
    Manual,

    /// Store cleared.
    CacheCleared,
}

/// Counters for one store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Total number of cache hits.
    pub hits: u64,

    /// Total number of cache misses.
    pub misses: u64,

    /// Total number of inserts.
    pub sets: u64,

    /// Total number of removals, all reasons.
    pub evictions: u64,

    /// Removals by reason.
    pub evictions_by_reason: HashMap<String, u64>,

    /// Current memory usage in bytes.
    pub current_bytes: usize,

    /// Peak memory usage in bytes.
    pub peak_bytes: usize,
}

impl CacheMetrics {
    /// Hit rate as a percentage (0.0 - 100.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn evictions_for_reason(&self, reason: EvictionReason) -> u64 {
        let key = format!("{:?}", reason);
        *self.evictions_by_reason.get(&key).unwrap_or(&0)
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_eviction(&mut self, reason: EvictionReason) {
        self.evictions += 1;
        let key = format!("{:?}", reason);
        *self.evictions_by_reason.entry(key).or_insert(0) += 1;
    }

    pub fn update_memory_usage(&mut self, current_bytes: usize) {
        self.current_bytes = current_bytes;
        if current_bytes > self.peak_bytes {
            self.peak_bytes = current_bytes;
        }
    }

    pub fn reset(&mut self) {
        *self = CacheMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_calculation() {
        let mut metrics = CacheMetrics::default();
        assert_eq!(metrics.hit_rate(), 0.0);

        metrics.hits = 75;
        metrics.misses = 25;
        assert_eq!(metrics.hit_rate(), 75.0);
        assert_eq!(metrics.total_requests(), 100);
    }

    #[test]
    fn test_eviction_tracking() {
        let mut metrics = CacheMetrics::default();

        metrics.record_eviction(EvictionReason::Expired);
        metrics.record_eviction(EvictionReason::Expired);
        metrics.record_eviction(EvictionReason::LruEviction);

        assert_eq!(metrics.evictions, 3);
        assert_eq!(metrics.evictions_for_reason(EvictionReason::Expired), 2);
        assert_eq!(metrics.evictions_for_reason(EvictionReason::LruEviction), 1);
        assert_eq!(metrics.evictions_for_reason(EvictionReason::Manual), 0);
    }

    #[test]
    fn test_peak_memory_tracking() {
        let mut metrics = CacheMetrics::default();

        metrics.update_memory_usage(1000);
        metrics.update_memory_usage(2000);
        metrics.update_memory_usage(1500);

        assert_eq!(metrics.current_bytes, 1500);
        assert_eq!(metrics.peak_bytes, 2000);
    }
}
