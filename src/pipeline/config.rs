// Pipeline configuration surface. One struct covers the whole core;
// nested settings map onto the cache manager, the job engine, the
// preloader, and the upscale service.

use crate::cache::{
    BlobStoreConfig, CacheManagerConfig, ThumbStoreConfig, UpscaleStoreConfig,
};
use crate::error::{PipelineError, Result};
use crate::jobs::JobEngineConfig;
use crate::upscale::SrConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How pages are presented; the preloader widens its main pass for
/// spreads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewMode {
    Single,
    DoubleSpread,
    ContinuousVertical,
}

impl Default for ViewMode {
    fn default() -> Self {
        ViewMode::Single
    }
}

/// Cache sizing knobs exposed to hosts. The blob store takes these
/// directly; thumbnail and upscale stores keep their own defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Global ceiling across all stores.
    pub max_memory_bytes: usize,

    /// Blob store item bound.
    pub max_items: usize,

    /// Blob TTL.
    pub ttl: Duration,

    /// Eager expiry sweep period.
    pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_memory_bytes: crate::cache::DEFAULT_GLOBAL_MEMORY_LIMIT,
            max_items: crate::cache::DEFAULT_BLOB_MAX_ITEMS,
            ttl: crate::cache::DEFAULT_BLOB_TTL,
            cleanup_interval: crate::cache::DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Speculative pages per preload wave.
    pub preload_pages: usize,

    /// Worker pool ceiling.
    pub max_workers: usize,

    pub cache: CacheSettings,
    pub upscale: SrConfig,

    /// Kick off super-resolution automatically after page loads.
    pub auto_upscale: bool,

    pub view_mode: ViewMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preload_pages: crate::preload::DEFAULT_PRELOAD_SIZE,
            max_workers: 4,
            cache: CacheSettings::default(),
            upscale: SrConfig::default(),
            auto_upscale: false,
            view_mode: ViewMode::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(PipelineError::Configuration(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        if self.cache.max_memory_bytes == 0 {
            return Err(PipelineError::Configuration(
                "cache.max_memory_bytes must be greater than 0".to_string(),
            ));
        }
        if self.cache.max_items == 0 {
            return Err(PipelineError::Configuration(
                "cache.max_items must be greater than 0".to_string(),
            ));
        }
        if self.upscale.scale == 0 {
            return Err(PipelineError::Configuration(
                "upscale.scale must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn cache_manager_config(&self) -> CacheManagerConfig {
        let blob_max_bytes = crate::cache::DEFAULT_BLOB_MAX_BYTES.min(self.cache.max_memory_bytes);
        CacheManagerConfig {
            global_limit_bytes: self.cache.max_memory_bytes,
            cleanup_threshold: crate::cache::CLEANUP_THRESHOLD,
            cleanup_target: crate::cache::CLEANUP_TARGET,
            blob: BlobStoreConfig {
                max_bytes: blob_max_bytes,
                max_items: self.cache.max_items,
                default_ttl: Some(self.cache.ttl),
                cleanup_interval: Some(self.cache.cleanup_interval),
                revoke_on_evict: true,
            },
            thumbs: ThumbStoreConfig {
                cleanup_interval: Some(self.cache.cleanup_interval),
                ..ThumbStoreConfig::default()
            },
            upscales: UpscaleStoreConfig {
                cleanup_interval: Some(self.cache.cleanup_interval),
                ..UpscaleStoreConfig::default()
            },
        }
    }

    pub(crate) fn engine_config(&self) -> JobEngineConfig {
        JobEngineConfig {
            max_workers: self.max_workers,
            initial_workers: 2.min(self.max_workers),
            primary_workers: 1,
            ..JobEngineConfig::default()
        }
    }
}

/// Live-updatable subset of [`PipelineConfig`]; `None` fields are left
/// unchanged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineConfigUpdate {
    pub preload_pages: Option<usize>,
    pub max_workers: Option<usize>,
    pub auto_upscale: Option<bool>,
    pub view_mode: Option<ViewMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut config = PipelineConfig::default();
        config.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.cache.max_memory_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.upscale.scale = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blob_store_bounded_by_global_limit() {
        let mut config = PipelineConfig::default();
        config.cache.max_memory_bytes = 10 * 1024 * 1024;

        let manager = config.cache_manager_config();
        assert_eq!(manager.blob.max_bytes, 10 * 1024 * 1024);
        assert!(manager.validate().is_ok());
    }
}
