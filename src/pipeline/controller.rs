// # Pipeline Controller
//
// The public façade. Owns the book context and the three services (job
// engine, cache manager, upscale service), routes `load_page` through
// cache and scheduler, fans navigation out to the preloader, and emits
// the typed event stream consumers subscribe to.

use crate::cache::{CacheManager, CacheUsageSnapshot};
use crate::common::{
    BookContext, ContentHash, InMemoryMinter, PageDescriptor, PageIndex, PageRange,
    ReadDirection, ResourceId,
};
use crate::error::{PipelineError, Result};
use crate::jobs::{EngineStatsSnapshot, JobCategory, JobEngine, JobPriority, JobStatus};
use crate::loader::PageLoader;
use crate::pipeline::commands::{CacheMaintenanceCommand, PageLoadCommand};
use crate::pipeline::config::{PipelineConfig, PipelineConfigUpdate, ViewMode};
use crate::pipeline::events::{EventEmitter, ListenerId, PipelineEvent};
use crate::preload::{PreloadConfig, PreloadContext, PreloadManager};
use crate::upscale::{
    SrEngine, UpscaleEvent, UpscaleService, DEFAULT_MAX_CONCURRENT_UPSCALES,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Options for one `load_page` call.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub priority: JobPriority,

    /// Bypass the blob cache and force a fresh load.
    pub skip_cache: bool,

    /// Override the configured auto-upscale behavior for this load.
    pub auto_upscale: Option<bool>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            priority: JobPriority::Critical,
            skip_cache: false,
            auto_upscale: None,
        }
    }
}

/// A successful page load.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub page_index: PageIndex,
    pub bytes: Bytes,
    pub handle: ResourceId,
    pub byte_size: usize,
    pub from_cache: bool,
    pub duration_ms: u64,
    pub content_hash: Option<ContentHash>,
}

/// What a `load_page` call resolved to. Cancellation is a result, not an
/// error.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(LoadResult),
    Cancelled,
}

/// Snapshot of pipeline state for consumers.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub initialized: bool,
    pub book_path: Option<String>,
    pub current_index: PageIndex,
    pub total_pages: usize,
    pub loading: bool,
    pub preloading: bool,
    pub cache: CacheUsageSnapshot,
    pub engine: EngineStatsSnapshot,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Image pipeline façade.
pub struct PipelineController {
    config: RwLock<PipelineConfig>,
    engine: Arc<JobEngine>,
    cache: Arc<CacheManager>,
    loader: Arc<dyn PageLoader>,
    upscaler: Option<Arc<UpscaleService>>,
    preloader: Arc<PreloadManager>,
    events: Arc<EventEmitter>,
    context: RwLock<Option<BookContext>>,
    maintenance_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    loads_in_flight: Arc<AtomicUsize>,
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl PipelineController {
    pub fn new(
        config: PipelineConfig,
        loader: Arc<dyn PageLoader>,
        sr_engine: Option<Arc<dyn SrEngine>>,
    ) -> Result<Self> {
        config.validate()?;

        let engine = Arc::new(JobEngine::new(config.engine_config())?);
        let minter = Arc::new(InMemoryMinter::new());
        let cache = Arc::new(CacheManager::new(config.cache_manager_config(), minter)?);
        let events = Arc::new(EventEmitter::new());

        let preloader = Arc::new(PreloadManager::new(
            Arc::clone(&engine),
            Arc::clone(&cache),
            Arc::clone(&loader),
            Arc::clone(&events),
            PreloadConfig {
                preload_size: config.preload_pages,
                ..PreloadConfig::default()
            },
        ));

        let upscaler = sr_engine.map(|sr| {
            Arc::new(UpscaleService::new(
                Arc::clone(&engine),
                Arc::clone(&cache),
                sr,
                config.upscale.clone(),
                DEFAULT_MAX_CONCURRENT_UPSCALES,
            ))
        });

        Ok(Self {
            config: RwLock::new(config),
            engine,
            cache,
            loader,
            upscaler,
            preloader,
            events,
            context: RwLock::new(None),
            maintenance_task: Mutex::new(None),
            loads_in_flight: Arc::new(AtomicUsize::new(0)),
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// Bring the pipeline up: workers, cache sweepers, the upscale engine
    /// when auto-upscale is on, and the background maintenance job.
    /// Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PipelineError::Disposed);
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.engine.start();
        self.cache.start_sweepers();

        if let Some(upscaler) = &self.upscaler {
            // Bridge service events onto the pipeline stream.
            let events = Arc::clone(&self.events);
            upscaler.add_listener(move |event| match event {
                UpscaleEvent::Complete { source_hash, handle, byte_size, page_index, .. } => {
                    events.emit(&PipelineEvent::UpscaleComplete {
                        source_hash: source_hash.clone(),
                        handle: handle.clone(),
                        byte_size: *byte_size,
                        page_index: *page_index,
                    });
                }
                UpscaleEvent::Error { message, .. } => {
                    events.emit(&PipelineEvent::Error {
                        source: "upscale",
                        message: message.clone(),
                        page_index: None,
                    });
                }
                _ => {}
            });

            let auto_upscale = self.config.read().auto_upscale;
            if auto_upscale {
                if let Err(e) = upscaler.init().await {
                    // The pipeline stays usable without SR.
                    warn!(error = %e, "upscale engine init failed");
                    self.events.emit(&PipelineEvent::Error {
                        source: "upscale",
                        message: e.to_string(),
                        page_index: None,
                    });
                }
            }
        }

        // Keep TTL sweeps and pressure checks off the hot path by cycling
        // them through the engine at idle priority.
        let engine = Arc::clone(&self.engine);
        let cache = Arc::clone(&self.cache);
        let interval = self.config.read().cache.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let command = Arc::new(CacheMaintenanceCommand::new(Arc::clone(&cache)));
                if engine
                    .submit_job(
                        JobCategory::CacheMaintenance,
                        JobPriority::Idle,
                        None,
                        None,
                        command,
                    )
                    .is_err()
                {
                    break;
                }
            }
        });
        *self.maintenance_task.lock() = Some(handle);

        info!("pipeline initialized");
        Ok(())
    }

    /// Replace the active book. Caches belonging to the previous book are
    /// purged; hash-keyed upscale entries survive.
    pub fn set_book_context(
        &self,
        book_path: impl Into<String>,
        pages: Vec<PageDescriptor>,
        current_index: PageIndex,
    ) -> Result<()> {
        let book_path = book_path.into();
        if !pages.is_empty() && current_index >= pages.len() {
            return Err(PipelineError::PageOutOfRange {
                index: current_index,
                total: pages.len(),
            });
        }

        let prior_book = {
            let mut context = self.context.write();
            let prior = context.as_ref().map(|c| c.book_path.clone());
            let direction = match &*context {
                Some(c) if c.book_path == book_path => c.direction,
                _ => ReadDirection::Forward,
            };
            *context = Some(BookContext {
                book_path: book_path.clone(),
                pages: pages.clone(),
                current_index,
                direction,
            });
            prior
        };

        if let Some(prior) = prior_book {
            if prior != book_path {
                self.preloader.cancel();
                self.cache.clear_book(&prior);
            }
        }

        self.preloader.set_context(PreloadContext {
            book_path,
            total_pages: pages.len(),
            pages: Arc::new(pages),
        });
        Ok(())
    }

    /// Update the reading direction used by subsequent preload waves.
    pub fn set_direction(&self, direction: ReadDirection) {
        if let Some(context) = self.context.write().as_mut() {
            context.direction = direction;
        }
    }

    /// Load one page: synchronous fast path on cache hit, a `Critical`
    /// job through the engine on a miss. Either way the preload wave and
    /// the optional upscale check are triggered.
    pub async fn load_page(&self, index: PageIndex, opts: LoadOptions) -> Result<LoadOutcome> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PipelineError::Disposed);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(PipelineError::NotInitialized);
        }

        let (book_path, descriptor, direction, total_pages) = {
            let mut context = self.context.write();
            let context = context.as_mut().ok_or(PipelineError::NoBookContext)?;
            let descriptor = context
                .descriptor(index)
                .cloned()
                .ok_or(PipelineError::PageOutOfRange {
                    index,
                    total: context.total_pages(),
                })?;
            context.current_index = index;
            (
                context.book_path.clone(),
                descriptor,
                context.direction,
                context.total_pages(),
            )
        };

        let start = Instant::now();
        let auto_upscale = opts
            .auto_upscale
            .unwrap_or_else(|| self.config.read().auto_upscale);

        if !opts.skip_cache {
            if let Some(entry) = self.cache.get_blob(Some(&book_path), index) {
                let duration_ms = start.elapsed().as_millis() as u64;
                self.events.emit(&PipelineEvent::PageLoad {
                    page_index: index,
                    book_path: Some(book_path.clone()),
                    from_cache: true,
                    byte_size: entry.bytes.len(),
                    duration_ms,
                });
                self.trigger_preload(index, direction, total_pages);
                if auto_upscale {
                    self.trigger_upscale(entry.content_hash.clone(), entry.bytes.clone(), index);
                }
                return Ok(LoadOutcome::Loaded(LoadResult {
                    page_index: index,
                    byte_size: entry.bytes.len(),
                    bytes: entry.bytes,
                    handle: entry.handle,
                    from_cache: true,
                    duration_ms,
                    content_hash: entry.content_hash,
                }));
            }
        }

        let _guard = InFlightGuard::new(&self.loads_in_flight);
        let command = Arc::new(PageLoadCommand::new(
            descriptor,
            Some(book_path.clone()),
            Arc::clone(&self.loader),
            Arc::clone(&self.cache),
        ));
        let job = self.engine.submit_job(
            JobCategory::PageView,
            opts.priority,
            Some(index),
            Some(book_path.clone()),
            command,
        )?;

        let status = self.engine.wait_for_job(job).await;
        match status {
            Some(JobStatus::Completed) => {
                let entry = self
                    .cache
                    .get_blob(Some(&book_path), index)
                    .ok_or_else(|| {
                        PipelineError::Internal(format!(
                            "page {} completed but is not cached",
                            index
                        ))
                    })?;
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(index, duration_ms, "page loaded");
                self.events.emit(&PipelineEvent::PageLoad {
                    page_index: index,
                    book_path: Some(book_path.clone()),
                    from_cache: false,
                    byte_size: entry.bytes.len(),
                    duration_ms,
                });
                self.trigger_preload(index, direction, total_pages);
                if auto_upscale {
                    self.trigger_upscale(entry.content_hash.clone(), entry.bytes.clone(), index);
                }
                Ok(LoadOutcome::Loaded(LoadResult {
                    page_index: index,
                    byte_size: entry.bytes.len(),
                    bytes: entry.bytes,
                    handle: entry.handle,
                    from_cache: false,
                    duration_ms,
                    content_hash: entry.content_hash,
                }))
            }
            Some(JobStatus::Cancelled) => Ok(LoadOutcome::Cancelled),
            Some(JobStatus::Failed) => {
                let message = self
                    .engine
                    .scheduler()
                    .snapshot(job)
                    .and_then(|s| s.result.and_then(|r| r.error))
                    .unwrap_or_else(|| format!("load of page {} failed", index));
                self.events.emit(&PipelineEvent::Error {
                    source: "loader",
                    message: message.clone(),
                    page_index: Some(index),
                });
                Err(PipelineError::Loader(message))
            }
            _ => Err(PipelineError::Scheduler(format!(
                "job for page {} vanished before completion",
                index
            ))),
        }
    }

    /// Preload a wave centered on `center` with an explicit budget.
    pub async fn preload_range(&self, center: PageIndex, radius: usize) -> Result<()> {
        let direction = {
            let context = self.context.read();
            let context = context.as_ref().ok_or(PipelineError::NoBookContext)?;
            if center >= context.total_pages() {
                return Err(PipelineError::PageOutOfRange {
                    index: center,
                    total: context.total_pages(),
                });
            }
            context.direction
        };
        self.preloader
            .request_load_sized(PageRange::single(center), direction, radius)
            .await
    }

    /// Cancel outstanding load jobs for one page.
    pub fn cancel_page_load(&self, index: PageIndex) -> usize {
        let book = self.context.read().as_ref().map(|c| c.book_path.clone());
        self.engine.cancel_page_jobs(index, book.as_deref())
    }

    pub fn clear_book_cache(&self) -> usize {
        match self.context.read().as_ref() {
            Some(context) => self.cache.clear_book(&context.book_path),
            None => 0,
        }
    }

    pub fn clear_all_cache(&self) {
        self.cache.clear_all();
    }

    /// Resource handle for a cached page, if present.
    pub fn get_page_url(&self, index: PageIndex) -> Option<ResourceId> {
        let book = self.context.read().as_ref().map(|c| c.book_path.clone());
        self.cache.get_blob(book.as_deref(), index).map(|e| e.handle)
    }

    /// Resource handle for a cached upscale result, if present.
    pub fn get_upscaled_url(&self, hash: &ContentHash) -> Option<ResourceId> {
        self.cache.get_upscale(hash).map(|e| e.handle)
    }

    pub fn get_page_blob(&self, index: PageIndex) -> Option<Bytes> {
        let book = self.context.read().as_ref().map(|c| c.book_path.clone());
        self.cache.get_blob(book.as_deref(), index).map(|e| e.bytes)
    }

    pub fn has_page_cached(&self, index: PageIndex) -> bool {
        let book = self.context.read().as_ref().map(|c| c.book_path.clone());
        self.cache.has_blob(book.as_deref(), index)
    }

    /// Apply a live configuration change.
    pub fn update_config(&self, update: PipelineConfigUpdate) {
        let mut config = self.config.write();
        if let Some(preload_pages) = update.preload_pages {
            config.preload_pages = preload_pages;
            self.preloader.set_preload_size(preload_pages);
        }
        if let Some(max_workers) = update.max_workers {
            config.max_workers = max_workers;
            self.engine.change_worker_size(max_workers);
        }
        if let Some(auto_upscale) = update.auto_upscale {
            config.auto_upscale = auto_upscale;
        }
        if let Some(view_mode) = update.view_mode {
            config.view_mode = view_mode;
        }
    }

    pub fn add_event_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.events.add_listener(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    pub fn get_state(&self) -> PipelineState {
        let (book_path, current_index, total_pages) = match self.context.read().as_ref() {
            Some(c) => (Some(c.book_path.clone()), c.current_index, c.total_pages()),
            None => (None, 0, 0),
        };
        PipelineState {
            initialized: self.initialized.load(Ordering::SeqCst),
            book_path,
            current_index,
            total_pages,
            loading: self.loads_in_flight.load(Ordering::SeqCst) > 0 || self.engine.busy(),
            preloading: self.preloader.is_active(),
            cache: self.cache.snapshot(),
            engine: self.engine.stats(),
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<JobEngine> {
        &self.engine
    }

    pub fn preloader(&self) -> &Arc<PreloadManager> {
        &self.preloader
    }

    pub fn upscaler(&self) -> Option<&Arc<UpscaleService>> {
        self.upscaler.as_ref()
    }

    /// Idempotent teardown.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.preloader.cancel();
        if let Some(upscaler) = &self.upscaler {
            upscaler.dispose();
        }
        if let Some(handle) = self.maintenance_task.lock().take() {
            handle.abort();
        }
        self.engine.dispose();
        self.cache.dispose();
        info!("pipeline disposed");
    }

    fn trigger_preload(&self, index: PageIndex, direction: ReadDirection, total_pages: usize) {
        let range = match self.config.read().view_mode {
            ViewMode::DoubleSpread if index + 1 < total_pages => {
                PageRange::new(index, index + 1)
            }
            _ => PageRange::single(index),
        };

        let preloader = Arc::clone(&self.preloader);
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            if let Err(e) = preloader.request_load(range, direction).await {
                events.emit(&PipelineEvent::Error {
                    source: "preload",
                    message: e.to_string(),
                    page_index: Some(index),
                });
            }
        });
    }

    fn trigger_upscale(&self, hash: Option<ContentHash>, bytes: Bytes, index: PageIndex) {
        let upscaler = match &self.upscaler {
            Some(upscaler) => Arc::clone(upscaler),
            None => return,
        };
        // No hash, no cache key: skip rather than upscale untracked bytes.
        let hash = match hash {
            Some(hash) => hash,
            None => return,
        };

        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            if upscaler.check_cache(&hash).await {
                if let Some((handle, byte_size)) = upscaler.load_from_cache(&hash).await {
                    events.emit(&PipelineEvent::UpscaleComplete {
                        source_hash: hash,
                        handle,
                        byte_size,
                        page_index: Some(index),
                    });
                }
            } else if let Err(e) =
                upscaler.submit_task(index, hash, bytes, None, JobPriority::High)
            {
                debug!(error = %e, "upscale submission rejected");
            }
        });
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance_task.lock().take() {
            handle.abort();
        }
    }
}
