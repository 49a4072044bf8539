// # Super-Resolution Service
//
// Deduplicates and schedules upscale work. At most one in-flight task
// exists per source hash: a duplicate submission gets the existing task id
// back. Engine concurrency is bounded by a semaphore (the model is heavy;
// two at a time by default) and task bodies observe cancellation while
// queued for a slot and during inference.
//
// Results land in the upscale store (minting a handle) and are persisted
// to the engine's disk cache; a disk write failure is logged and dropped.
// An upscale failure never disturbs the page pipeline; the original blob
// stays usable.

use crate::cache::CacheManager;
use crate::common::{CancelToken, ContentHash, PageIndex, ResourceId};
use crate::error::{PipelineError, Result};
use crate::jobs::{JobCategory, JobCommand, JobEngine, JobPriority};
use crate::upscale::engine::{SrConfig, SrEngine};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default cap on concurrent engine invocations.
pub const DEFAULT_MAX_CONCURRENT_UPSCALES: usize = 2;

/// Upscale task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleState {
    Waiting,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// One tracked upscale request.
#[derive(Debug, Clone)]
pub struct UpscaleTask {
    pub id: Uuid,
    pub page_index: PageIndex,
    pub source_hash: ContentHash,
    pub config: SrConfig,
    pub priority: JobPriority,
    pub status: UpscaleState,
    pub progress: u8,
    pub error: Option<String>,
}

/// Service-level events, bridged onto the pipeline stream by the
/// controller.
#[derive(Debug, Clone)]
pub enum UpscaleEvent {
    Start {
        task_id: Uuid,
        source_hash: ContentHash,
    },
    Complete {
        task_id: Uuid,
        source_hash: ContentHash,
        handle: ResourceId,
        byte_size: usize,
        page_index: Option<PageIndex>,
    },
    Error {
        task_id: Uuid,
        source_hash: ContentHash,
        message: String,
    },
    Cancelled {
        task_id: Uuid,
        source_hash: ContentHash,
    },
}

type UpscaleListener = Arc<dyn Fn(&UpscaleEvent) + Send + Sync>;

struct ServiceShared {
    cache: Arc<CacheManager>,
    sr: Arc<dyn SrEngine>,
    tasks: DashMap<Uuid, UpscaleTask>,
    pending_hashes: DashMap<ContentHash, Uuid>,
    slots: Arc<Semaphore>,
    processing: AtomicUsize,
    listeners: RwLock<Vec<UpscaleListener>>,
}

impl ServiceShared {
    fn emit(&self, event: &UpscaleEvent) {
        let snapshot: Vec<UpscaleListener> = self.listeners.read().clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("upscale event listener panicked");
            }
        }
    }

    fn set_status(&self, id: Uuid, status: UpscaleState, error: Option<String>) {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.status = status;
            task.error = error;
            if status == UpscaleState::Completed {
                task.progress = 100;
            }
        }
    }
}

/// Deduplicating upscale front-end over the job engine.
pub struct UpscaleService {
    engine: Arc<JobEngine>,
    shared: Arc<ServiceShared>,
    default_config: RwLock<SrConfig>,
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl UpscaleService {
    pub fn new(
        engine: Arc<JobEngine>,
        cache: Arc<CacheManager>,
        sr: Arc<dyn SrEngine>,
        default_config: SrConfig,
        max_concurrent: usize,
    ) -> Self {
        Self {
            engine,
            shared: Arc::new(ServiceShared {
                cache,
                sr,
                tasks: DashMap::new(),
                pending_hashes: DashMap::new(),
                slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
                processing: AtomicUsize::new(0),
                listeners: RwLock::new(Vec::new()),
            }),
            default_config: RwLock::new(default_config),
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Bring the engine up. Idempotent.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let gpu_id = self.default_config.read().gpu_id;
        self.shared.sr.init(gpu_id).await?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&UpscaleEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.write().push(Arc::new(listener));
    }

    pub fn set_default_config(&self, config: SrConfig) {
        *self.default_config.write() = config;
    }

    pub fn default_config(&self) -> SrConfig {
        self.default_config.read().clone()
    }

    pub fn task(&self, id: Uuid) -> Option<UpscaleTask> {
        self.shared.tasks.get(&id).map(|t| t.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending_hashes.len()
    }

    pub fn processing_count(&self) -> usize {
        self.shared.processing.load(Ordering::SeqCst)
    }

    /// Queue an upscale for `source_hash`. If one is already in flight for
    /// the same hash, its task id is returned instead of a new job.
    pub fn submit_task(
        &self,
        page_index: PageIndex,
        source_hash: ContentHash,
        input: Bytes,
        config: Option<SrConfig>,
        priority: JobPriority,
    ) -> Result<Uuid> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PipelineError::Disposed);
        }

        let task_id = Uuid::new_v4();
        match self.shared.pending_hashes.entry(source_hash.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                debug!(hash = %source_hash, "duplicate upscale submission deduped");
                return Ok(*existing.get());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(task_id);
            }
        }

        let config = config.unwrap_or_else(|| self.default_config.read().clone());
        self.shared.tasks.insert(
            task_id,
            UpscaleTask {
                id: task_id,
                page_index,
                source_hash: source_hash.clone(),
                config: config.clone(),
                priority,
                status: UpscaleState::Waiting,
                progress: 0,
                error: None,
            },
        );

        let command = Arc::new(UpscaleCommand {
            shared: Arc::clone(&self.shared),
            task_id,
            source_hash: source_hash.clone(),
            page_index,
            input,
            config,
        });

        match self.engine.submit_job(
            JobCategory::Upscale,
            priority,
            Some(page_index),
            None,
            command,
        ) {
            Ok(_) => Ok(task_id),
            Err(e) => {
                self.shared.pending_hashes.remove(&source_hash);
                self.shared.tasks.remove(&task_id);
                Err(e)
            }
        }
    }

    /// Whether a result exists for `hash`, in memory or on disk.
    pub async fn check_cache(&self, hash: &ContentHash) -> bool {
        if self.shared.cache.has_upscale(hash) {
            return true;
        }
        self.shared.sr.check_disk_cache(hash).await
    }

    /// Fetch a result, materializing disk hits into the memory store so
    /// later lookups are O(1). Returns the handle and size.
    pub async fn load_from_cache(&self, hash: &ContentHash) -> Option<(ResourceId, usize)> {
        if let Some(entry) = self.shared.cache.get_upscale(hash) {
            return Some((entry.handle, entry.bytes.len()));
        }

        let bytes = self.shared.sr.load_disk_cache(hash).await?;
        let size = bytes.len();
        let config = self.default_config.read().clone();
        let handle = self
            .shared
            .cache
            .set_upscale(hash, bytes, config.model, config.scale, None);
        Some((handle, size))
    }

    /// Idempotent teardown: cancel queued work and stop accepting more.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.cancel_category_jobs(JobCategory::Upscale);
        self.shared.pending_hashes.clear();
    }
}

struct UpscaleCommand {
    shared: Arc<ServiceShared>,
    task_id: Uuid,
    source_hash: ContentHash,
    page_index: PageIndex,
    input: Bytes,
    config: SrConfig,
}

impl UpscaleCommand {
    fn cancelled(&self) -> Result<()> {
        self.shared
            .set_status(self.task_id, UpscaleState::Cancelled, None);
        self.shared.emit(&UpscaleEvent::Cancelled {
            task_id: self.task_id,
            source_hash: self.source_hash.clone(),
        });
        Err(PipelineError::Cancelled)
    }
}

#[async_trait]
impl JobCommand for UpscaleCommand {
    async fn execute(&self, cancel: &CancelToken) -> Result<()> {
        // Wait for an engine slot, observing cancellation while queued.
        let permit = tokio::select! {
            permit = Arc::clone(&self.shared.slots).acquire_owned() => {
                permit.map_err(|_| PipelineError::Internal("upscale slots closed".into()))?
            }
            _ = cancel.cancelled() => {
                let result = self.cancelled();
                self.shared.pending_hashes.remove(&self.source_hash);
                return result;
            }
        };

        self.shared.processing.fetch_add(1, Ordering::SeqCst);
        self.shared
            .set_status(self.task_id, UpscaleState::Processing, None);
        self.shared.emit(&UpscaleEvent::Start {
            task_id: self.task_id,
            source_hash: self.source_hash.clone(),
        });

        let outcome = self
            .shared
            .sr
            .upscale(self.input.clone(), &self.config, cancel)
            .await;

        let result = match outcome {
            Ok(_) | Err(_) if cancel.is_cancelled() => self.cancelled(),
            Ok(bytes) => {
                let handle = self.shared.cache.set_upscale(
                    &self.source_hash,
                    bytes.clone(),
                    self.config.model.clone(),
                    self.config.scale,
                    Some(self.page_index),
                );
                if let Err(e) = self.shared.sr.save_disk_cache(&self.source_hash, &bytes).await {
                    warn!(hash = %self.source_hash, error = %e, "upscale disk cache write failed");
                }

                self.shared
                    .set_status(self.task_id, UpscaleState::Completed, None);
                self.shared.emit(&UpscaleEvent::Complete {
                    task_id: self.task_id,
                    source_hash: self.source_hash.clone(),
                    handle,
                    byte_size: bytes.len(),
                    page_index: Some(self.page_index),
                });
                Ok(())
            }
            Err(e) if e.is_cancellation() => self.cancelled(),
            Err(e) => {
                let message = e.to_string();
                self.shared.set_status(
                    self.task_id,
                    UpscaleState::Failed,
                    Some(message.clone()),
                );
                self.shared.emit(&UpscaleEvent::Error {
                    task_id: self.task_id,
                    source_hash: self.source_hash.clone(),
                    message,
                });
                Err(e)
            }
        };

        self.shared.processing.fetch_sub(1, Ordering::SeqCst);
        self.shared.pending_hashes.remove(&self.source_hash);
        drop(permit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        BlobStoreConfig, CacheManagerConfig, ThumbStoreConfig, UpscaleStoreConfig,
    };
    use crate::common::InMemoryMinter;
    use crate::jobs::JobEngineConfig;
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct MockSrEngine {
        delay_ms: u64,
        invocations: AtomicU64,
        disk: PlMutex<HashMap<String, Bytes>>,
        fail: bool,
    }

    impl MockSrEngine {
        fn new(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                invocations: AtomicU64::new(0),
                disk: PlMutex::new(HashMap::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::new(0) }
        }
    }

    #[async_trait]
    impl SrEngine for MockSrEngine {
        async fn init(&self, _gpu_id: i32) -> Result<()> {
            Ok(())
        }

        async fn upscale(
            &self,
            input: Bytes,
            _config: &SrConfig,
            cancel: &CancelToken,
        ) -> Result<Bytes> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PipelineError::Upscale("model exploded".into()));
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.delay_ms)) => {}
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            }
            let mut out = Vec::with_capacity(input.len() * 2);
            out.extend_from_slice(&input);
            out.extend_from_slice(&input);
            Ok(Bytes::from(out))
        }

        async fn check_disk_cache(&self, hash: &ContentHash) -> bool {
            self.disk.lock().contains_key(hash.as_str())
        }

        async fn load_disk_cache(&self, hash: &ContentHash) -> Option<Bytes> {
            self.disk.lock().get(hash.as_str()).cloned()
        }

        async fn save_disk_cache(&self, hash: &ContentHash, bytes: &Bytes) -> Result<()> {
            self.disk.lock().insert(hash.as_str().to_string(), bytes.clone());
            Ok(())
        }
    }

    fn service(sr: Arc<MockSrEngine>) -> (UpscaleService, Arc<JobEngine>, Arc<CacheManager>) {
        let engine = Arc::new(
            JobEngine::new(JobEngineConfig {
                max_workers: 2,
                initial_workers: 2,
                primary_workers: 1,
                idle_timeout: Duration::from_millis(50),
                record_retention: Duration::from_secs(60),
            })
            .unwrap(),
        );
        engine.start();

        let cache = Arc::new(
            CacheManager::new(
                CacheManagerConfig {
                    global_limit_bytes: 1024 * 1024,
                    cleanup_threshold: 0.9,
                    cleanup_target: 0.7,
                    blob: BlobStoreConfig {
                        max_bytes: 1024 * 1024,
                        max_items: 16,
                        default_ttl: None,
                        cleanup_interval: None,
                        revoke_on_evict: true,
                    },
                    thumbs: ThumbStoreConfig {
                        max_bytes: 1024,
                        max_items: 4,
                        default_ttl: None,
                        cleanup_interval: None,
                    },
                    upscales: UpscaleStoreConfig {
                        max_bytes: 1024 * 1024,
                        max_items: 16,
                        default_ttl: None,
                        cleanup_interval: None,
                    },
                },
                Arc::new(InMemoryMinter::new()),
            )
            .unwrap(),
        );

        let service = UpscaleService::new(
            Arc::clone(&engine),
            Arc::clone(&cache),
            sr,
            SrConfig::default(),
            2,
        );
        (service, engine, cache)
    }

    #[tokio::test]
    async fn test_upscale_completes_and_caches() {
        let sr = Arc::new(MockSrEngine::new(5));
        let (service, engine, cache) = service(Arc::clone(&sr));

        let completes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&completes);
        service.add_listener(move |event| {
            if matches!(event, UpscaleEvent::Complete { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let hash = ContentHash::of(b"page art");
        service
            .submit_task(0, hash.clone(), Bytes::from_static(b"page art"), None, JobPriority::High)
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !cache.has_upscale(&hash) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(completes.load(Ordering::SeqCst), 1);
        assert!(service.check_cache(&hash).await);
        assert_eq!(service.pending_count(), 0);

        engine.dispose();
    }

    #[tokio::test]
    async fn test_duplicate_hash_dedupes_to_one_task() {
        let sr = Arc::new(MockSrEngine::new(50));
        let (service, engine, cache) = service(Arc::clone(&sr));

        let completes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&completes);
        service.add_listener(move |event| {
            if matches!(event, UpscaleEvent::Complete { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let hash = ContentHash::of(b"duplicate art");
        let input = Bytes::from_static(b"duplicate art");
        let first = service
            .submit_task(1, hash.clone(), input.clone(), None, JobPriority::High)
            .unwrap();
        let second = service
            .submit_task(1, hash.clone(), input, None, JobPriority::High)
            .unwrap();

        assert_eq!(first, second);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !cache.has_upscale(&hash) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // Give any second (erroneous) completion a moment to surface.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sr.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(completes.load(Ordering::SeqCst), 1);

        engine.dispose();
    }

    #[tokio::test]
    async fn test_failure_emits_error_and_clears_pending() {
        let sr = Arc::new(MockSrEngine::failing());
        let (service, engine, _cache) = service(Arc::clone(&sr));

        let errors = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&errors);
        service.add_listener(move |event| {
            if matches!(event, UpscaleEvent::Error { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let hash = ContentHash::of(b"bad art");
        let id = service
            .submit_task(2, hash.clone(), Bytes::from_static(b"bad art"), None, JobPriority::High)
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(task) = service.task(id) {
                    if task.status == UpscaleState::Failed {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(service.pending_count(), 0);
        let task = service.task(id).unwrap();
        assert_eq!(task.error.as_deref(), Some("Upscale error: model exploded"));

        engine.dispose();
    }

    #[tokio::test]
    async fn test_load_from_cache_materializes_disk_hit() {
        let sr = Arc::new(MockSrEngine::new(0));
        let (service, engine, cache) = service(Arc::clone(&sr));

        let hash = ContentHash::of(b"disk only");
        sr.disk
            .lock()
            .insert(hash.as_str().to_string(), Bytes::from_static(b"upscaled"));

        assert!(!cache.has_upscale(&hash));
        assert!(service.check_cache(&hash).await);

        let (handle, size) = service.load_from_cache(&hash).await.unwrap();
        assert_eq!(size, 8);
        assert!(cache.has_upscale(&hash));
        assert!(cache.minter().is_live(&handle));

        engine.dispose();
    }
}
