// Job command bodies the pipeline submits to the engine. Commands produce
// no return value; bytes land in the cache and consumers hear about them
// through events.

use crate::cache::CacheManager;
use crate::common::{CancelToken, ContentHash, PageDescriptor};
use crate::error::{PipelineError, Result};
use crate::jobs::JobCommand;
use crate::loader::PageLoader;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Load one page through the external loader and store it in the blob
/// cache. Used for both the page in view and preload fan-out; only the
/// category and priority differ.
pub struct PageLoadCommand {
    descriptor: PageDescriptor,
    book_path: Option<String>,
    loader: Arc<dyn PageLoader>,
    cache: Arc<CacheManager>,
}

impl PageLoadCommand {
    pub fn new(
        descriptor: PageDescriptor,
        book_path: Option<String>,
        loader: Arc<dyn PageLoader>,
        cache: Arc<CacheManager>,
    ) -> Self {
        Self { descriptor, book_path, loader, cache }
    }
}

#[async_trait]
impl JobCommand for PageLoadCommand {
    async fn execute(&self, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let data = self.loader.load_page_data(&self.descriptor, cancel).await?;

        // A result landing after cancellation is dropped, not cached.
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let hash = self
            .descriptor
            .content_hash
            .clone()
            .unwrap_or_else(|| ContentHash::of(&data.bytes));

        self.cache.set_blob(
            self.book_path.as_deref(),
            self.descriptor.index,
            data.bytes,
            Some(hash),
        );
        Ok(())
    }
}

/// Background cache maintenance: expiry sweeps plus a pressure check.
/// Scheduled at `Idle` priority so it only runs when workers have nothing
/// better to do.
pub struct CacheMaintenanceCommand {
    cache: Arc<CacheManager>,
}

impl CacheMaintenanceCommand {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl JobCommand for CacheMaintenanceCommand {
    async fn execute(&self, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let expired = self.cache.blobs().cleanup()
            + self.cache.thumbs().cleanup()
            + self.cache.upscales().cleanup();

        if self.cache.under_pressure() {
            let freed = self.cache.perform_cleanup();
            debug!(expired, freed, "cache maintenance pass");
        }
        Ok(())
    }
}
