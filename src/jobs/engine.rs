// # Job Engine
//
// The scheduler plus its worker pool. The engine owns pool sizing (the
// first `primary_workers` are primary; a pool of one gets a single
// limited auxiliary worker so every priority band stays served), the
// engine-wide busy signal, and the periodic sweep of finished job
// records.

use crate::common::PageIndex;
use crate::error::{PipelineError, Result};
use crate::jobs::scheduler::{JobScheduler, SchedulerStatsSnapshot};
use crate::jobs::types::{JobCategory, JobCommand, JobId, JobPriority, JobStatus};
use crate::jobs::worker::{BusyTracker, WorkerConfig, WorkerHandle, DEFAULT_IDLE_TIMEOUT};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// How long terminal job records stay queryable.
pub const DEFAULT_RECORD_RETENTION: Duration = Duration::from_secs(60);

/// Period of the finished-record sweep.
pub const DEFAULT_RECORD_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct JobEngineConfig {
    /// Hard ceiling on pool size.
    pub max_workers: usize,

    /// Workers spawned by `start`.
    pub initial_workers: usize,

    /// How many of the first workers are primary.
    pub primary_workers: usize,

    /// Idle park time for workers.
    pub idle_timeout: Duration,

    /// Retention for terminal job records.
    pub record_retention: Duration,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().clamp(2, 4),
            initial_workers: 2,
            primary_workers: 1,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            record_retention: DEFAULT_RECORD_RETENTION,
        }
    }
}

impl JobEngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(PipelineError::Configuration(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        if self.initial_workers == 0 || self.initial_workers > self.max_workers {
            return Err(PipelineError::Configuration(format!(
                "initial_workers must be in 1..={}",
                self.max_workers
            )));
        }
        if self.primary_workers > self.max_workers {
            return Err(PipelineError::Configuration(
                "primary_workers must not exceed max_workers".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatsSnapshot {
    #[serde(flatten)]
    pub scheduler: SchedulerStatsSnapshot,
    pub pending_jobs: usize,
    pub running_jobs: usize,
    pub worker_count: usize,
    pub busy: bool,
}

/// Priority scheduler with a sized worker pool.
pub struct JobEngine {
    scheduler: Arc<JobScheduler>,
    workers: Mutex<Vec<WorkerHandle>>,
    tracker: Arc<BusyTracker>,
    config: JobEngineConfig,
    sweep_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

/// Role for the worker at `index` in a pool of `total`.
fn worker_role(index: usize, total: usize, primary_workers: usize) -> (bool, bool) {
    if total == 1 {
        // A lone worker covers every band.
        (false, true)
    } else {
        (index < primary_workers, false)
    }
}

impl JobEngine {
    pub fn new(config: JobEngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scheduler: Arc::new(JobScheduler::new(config.record_retention)),
            workers: Mutex::new(Vec::new()),
            tracker: Arc::new(BusyTracker::new()),
            config,
            sweep_task: Mutex::new(None),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// Spawn the initial worker pool and the record sweeper. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.resize_locked(self.config.initial_workers);

        let scheduler = Arc::clone(&self.scheduler);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DEFAULT_RECORD_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.cleanup();
            }
        });
        *self.sweep_task.lock() = Some(handle);

        info!(workers = self.worker_count(), "job engine started");
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Submit a job for execution.
    pub fn submit_job(
        &self,
        category: JobCategory,
        priority: JobPriority,
        page_index: Option<PageIndex>,
        book_path: Option<String>,
        command: Arc<dyn JobCommand>,
    ) -> Result<JobId> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PipelineError::Disposed);
        }
        Ok(self
            .scheduler
            .submit(category, priority, page_index, book_path, command))
    }

    pub fn cancel_job(&self, id: JobId) -> bool {
        self.scheduler.cancel_job(id)
    }

    pub fn cancel_page_jobs(&self, page_index: PageIndex, book_path: Option<&str>) -> usize {
        self.scheduler.cancel_page_jobs(page_index, book_path)
    }

    pub fn cancel_category_jobs(&self, category: JobCategory) -> usize {
        self.scheduler.cancel_category_jobs(category)
    }

    pub async fn wait_for_job(&self, id: JobId) -> Option<JobStatus> {
        self.scheduler.wait_for_job(id).await
    }

    /// Grow or shrink the pool to `target` workers (clamped to
    /// `1..=max_workers`). Removed workers exit after their current job;
    /// workers whose role changes are respawned with the new role.
    pub fn change_worker_size(&self, target: usize) {
        let target = target.clamp(1, self.config.max_workers);
        self.resize_locked(target);
        debug!(target, "worker pool resized");
    }

    fn resize_locked(&self, target: usize) {
        let mut workers = self.workers.lock();

        // Drop extras first so role computation sees the final size.
        while workers.len() > target {
            if let Some(worker) = workers.pop() {
                worker.stop();
            }
        }

        // Respawn survivors whose role changed under the new pool size.
        for index in 0..workers.len() {
            let (is_primary, is_limited) =
                worker_role(index, target, self.config.primary_workers);
            let current = &workers[index].config;
            if current.is_primary != is_primary || current.is_limited != is_limited {
                workers[index].stop();
                workers[index] = WorkerHandle::spawn(
                    Arc::clone(&self.scheduler),
                    WorkerConfig {
                        index,
                        is_primary,
                        is_limited,
                        idle_timeout: self.config.idle_timeout,
                    },
                    Arc::clone(&self.tracker),
                );
            }
        }

        while workers.len() < target {
            let index = workers.len();
            let (is_primary, is_limited) =
                worker_role(index, target, self.config.primary_workers);
            workers.push(WorkerHandle::spawn(
                Arc::clone(&self.scheduler),
                WorkerConfig {
                    index,
                    is_primary,
                    is_limited,
                    idle_timeout: self.config.idle_timeout,
                },
                Arc::clone(&self.tracker),
            ));
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Whether any worker is mid-job.
    pub fn busy(&self) -> bool {
        self.tracker.is_busy()
    }

    /// Watch edges of the busy signal.
    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.tracker.subscribe()
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            scheduler: self.scheduler.stats(),
            pending_jobs: self.scheduler.pending_count(),
            running_jobs: self.scheduler.running_count(),
            worker_count: self.worker_count(),
            busy: self.busy(),
        }
    }

    /// Idempotent teardown: cancel live jobs, release the pool, stop the
    /// sweeper.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.scheduler.cancel_all();
        for worker in self.workers.lock().drain(..) {
            worker.stop();
        }
        if let Some(handle) = self.sweep_task.lock().take() {
            handle.abort();
        }
        info!("job engine disposed");
    }
}

impl Drop for JobEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CancelToken;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    struct CountingCommand {
        runs: Arc<AtomicU64>,
    }

    #[async_trait]
    impl JobCommand for CountingCommand {
        async fn execute(&self, _cancel: &CancelToken) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine(initial: usize) -> JobEngine {
        JobEngine::new(JobEngineConfig {
            max_workers: 4,
            initial_workers: initial,
            primary_workers: 1,
            idle_timeout: Duration::from_millis(50),
            record_retention: Duration::from_secs(60),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_engine_runs_submitted_jobs() {
        let engine = engine(2);
        engine.start();

        let runs = Arc::new(AtomicU64::new(0));
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(
                engine
                    .submit_job(
                        JobCategory::PageView,
                        JobPriority::Critical,
                        Some(i),
                        None,
                        Arc::new(CountingCommand { runs: Arc::clone(&runs) }),
                    )
                    .unwrap(),
            );
        }

        for id in ids {
            let status =
                tokio::time::timeout(Duration::from_secs(1), engine.wait_for_job(id))
                    .await
                    .unwrap();
            assert_eq!(status, Some(JobStatus::Completed));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 4);

        engine.dispose();
    }

    #[tokio::test]
    async fn test_single_limited_worker_takes_normal_upscale() {
        let engine = JobEngine::new(JobEngineConfig {
            max_workers: 1,
            initial_workers: 1,
            primary_workers: 1,
            idle_timeout: Duration::from_millis(50),
            record_retention: Duration::from_secs(60),
        })
        .unwrap();
        engine.start();

        let runs = Arc::new(AtomicU64::new(0));
        let id = engine
            .submit_job(
                JobCategory::Upscale,
                JobPriority::Normal,
                None,
                None,
                Arc::new(CountingCommand { runs: Arc::clone(&runs) }),
            )
            .unwrap();

        let status = tokio::time::timeout(Duration::from_secs(1), engine.wait_for_job(id))
            .await
            .unwrap();
        assert_eq!(status, Some(JobStatus::Completed));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        engine.dispose();
    }

    #[tokio::test]
    async fn test_resize_grows_and_shrinks() {
        let engine = engine(2);
        engine.start();
        assert_eq!(engine.worker_count(), 2);

        engine.change_worker_size(4);
        assert_eq!(engine.worker_count(), 4);

        engine.change_worker_size(1);
        assert_eq!(engine.worker_count(), 1);
        // The lone survivor covers the full band.
        let workers = engine.workers.lock();
        assert!(workers[0].config.is_limited);
        assert!(!workers[0].config.is_primary);
        drop(workers);

        engine.dispose();
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_rejects_submits() {
        let engine = engine(2);
        engine.start();
        engine.dispose();
        engine.dispose();

        let err = engine
            .submit_job(
                JobCategory::PageView,
                JobPriority::Critical,
                Some(0),
                None,
                Arc::new(CountingCommand { runs: Arc::new(AtomicU64::new(0)) }),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Disposed));
    }

    #[test]
    fn test_config_validation() {
        let mut config = JobEngineConfig::default();
        config.initial_workers = 10;
        config.max_workers = 4;
        assert!(config.validate().is_err());

        assert!(JobEngineConfig::default().validate().is_ok());
    }
}
