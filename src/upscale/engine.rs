// # Super-Resolution Engine Interface
//
// The model runs out of process; the pipeline talks to it through this
// trait. Besides inference it owns a disk cache keyed by content hash,
// whose layout is the engine's business.

use crate::common::{CancelToken, ContentHash};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Inference parameters for one upscale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrConfig {
    pub model: String,

    /// Output scale factor.
    pub scale: u8,

    /// Tile edge in pixels; 0 lets the engine choose.
    pub tile_size: u32,

    /// Denoise strength; -1 disables.
    pub noise_level: i8,

    /// Test-time augmentation (slower, marginally better).
    pub use_tta: bool,

    pub gpu_id: i32,
}

impl Default for SrConfig {
    fn default() -> Self {
        Self {
            model: "realesrgan-x4plus-anime".to_string(),
            scale: 2,
            tile_size: 0,
            noise_level: -1,
            use_tta: false,
            gpu_id: 0,
        }
    }
}

/// Out-of-process super-resolution capability.
#[async_trait]
pub trait SrEngine: Send + Sync {
    /// Bring the engine up on a GPU. Called once before first use.
    async fn init(&self, gpu_id: i32) -> Result<()>;

    /// Run inference. Must observe `cancel` and return promptly once it
    /// fires.
    async fn upscale(
        &self,
        input: Bytes,
        config: &SrConfig,
        cancel: &CancelToken,
    ) -> Result<Bytes>;

    /// Whether the engine's disk cache holds a result for `hash`.
    async fn check_disk_cache(&self, hash: &ContentHash) -> bool;

    /// Read a disk-cached result.
    async fn load_disk_cache(&self, hash: &ContentHash) -> Option<Bytes>;

    /// Persist a result. Failures are the caller's to log, not propagate.
    async fn save_disk_cache(&self, hash: &ContentHash, bytes: &Bytes) -> Result<()>;
}
