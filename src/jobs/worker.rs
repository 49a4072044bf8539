// # Worker Loop
//
// Each worker is a tokio task pulling jobs from the shared scheduler.
// Primary workers serve the interactive band (`Normal..=Critical`);
// auxiliary workers serve the background band (`Idle..=Low`) unless
// flagged limited, which widens them to the full range for single-worker
// pools. An idle worker parks on the queue-changed broadcast with a
// timeout so a missed wakeup costs at most one idle period.
//
// A command that returns an error marks the job `Failed`; a command that
// panics is caught and does the same. The worker itself survives both.

use crate::common::CancelToken;
use crate::jobs::scheduler::JobScheduler;
use crate::jobs::types::JobPriority;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default idle wait before a parked worker re-checks the queue.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub index: usize,
    pub is_primary: bool,
    pub is_limited: bool,
    pub idle_timeout: Duration,
}

impl WorkerConfig {
    /// Priority band this worker pulls from.
    pub fn priority_range(&self) -> (JobPriority, JobPriority) {
        if self.is_primary {
            (JobPriority::Normal, JobPriority::Critical)
        } else if self.is_limited {
            (JobPriority::Idle, JobPriority::Critical)
        } else {
            (JobPriority::Idle, JobPriority::Low)
        }
    }
}

/// Tracks how many workers are mid-job and broadcasts edges of the
/// engine-wide busy signal.
#[derive(Debug)]
pub struct BusyTracker {
    active: AtomicUsize,
    tx: watch::Sender<bool>,
}

impl BusyTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { active: AtomicUsize::new(0), tx }
    }

    pub fn job_started(&self) {
        if self.active.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.tx.send(true);
        }
    }

    pub fn job_finished(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.tx.send(false);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for BusyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A spawned worker and the knobs the engine keeps on it.
pub struct WorkerHandle {
    pub config: WorkerConfig,
    shutdown: CancelToken,
    busy: Arc<AtomicBool>,
    pub jobs_completed: Arc<AtomicU64>,
    pub jobs_failed: Arc<AtomicU64>,
}

impl WorkerHandle {
    /// Spawn a worker task on the current runtime.
    pub fn spawn(
        scheduler: Arc<JobScheduler>,
        config: WorkerConfig,
        tracker: Arc<BusyTracker>,
    ) -> Self {
        let shutdown = CancelToken::new();
        let busy = Arc::new(AtomicBool::new(false));
        let jobs_completed = Arc::new(AtomicU64::new(0));
        let jobs_failed = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_worker(
            scheduler,
            config.clone(),
            shutdown.clone(),
            tracker,
            Arc::clone(&busy),
            Arc::clone(&jobs_completed),
            Arc::clone(&jobs_failed),
        ));

        Self { config, shutdown, busy, jobs_completed, jobs_failed }
    }

    /// Ask the worker to exit after its current job, if any.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    scheduler: Arc<JobScheduler>,
    config: WorkerConfig,
    shutdown: CancelToken,
    tracker: Arc<BusyTracker>,
    busy: Arc<AtomicBool>,
    jobs_completed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
) {
    let (min, max) = config.priority_range();
    let queue_changed = scheduler.queue_changed();
    info!(
        worker = config.index,
        primary = config.is_primary,
        limited = config.is_limited,
        "worker started"
    );

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match scheduler.fetch_next_job(min, max) {
            Some(job) => {
                debug!(worker = config.index, id = %job.id, category = %job.category, "job picked up");
                busy.store(true, Ordering::SeqCst);
                tracker.job_started();

                let outcome = AssertUnwindSafe(job.command.execute(&job.cancel))
                    .catch_unwind()
                    .await;

                let (success, error) = match outcome {
                    Ok(Ok(())) => (true, None),
                    Ok(Err(e)) if e.is_cancellation() => (false, None),
                    Ok(Err(e)) => (false, Some(e.to_string())),
                    Err(_) => {
                        warn!(worker = config.index, id = %job.id, "job command panicked");
                        (false, Some("job command panicked".to_string()))
                    }
                };

                scheduler.complete_job(job.id, success, error);
                if success {
                    jobs_completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    jobs_failed.fetch_add(1, Ordering::Relaxed);
                }

                tracker.job_finished();
                busy.store(false, Ordering::SeqCst);
            }
            None => {
                tokio::select! {
                    _ = queue_changed.notified() => {}
                    _ = tokio::time::sleep(config.idle_timeout) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }
    }

    info!(worker = config.index, "worker stopped");
}
