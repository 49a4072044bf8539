// # Job Scheduler
//
// Shared scheduler state behind one coarse lock: jobs are coarse-grained
// (a page read, an upscale), so contention stays low and atomic job
// selection stays simple. Workers race on `fetch_next_job`, which flips
// the winner to `Running` under the lock.
//
// Selection picks the highest-priority pending job within the caller's
// range, breaking ties by earliest submission. Terminal records stick
// around for a grace period so late status queries still resolve, then
// `cleanup` drops them.

use crate::common::{CancelToken, PageIndex};
use crate::jobs::types::{
    JobCategory, JobCommand, JobDefinition, JobId, JobPriority, JobResult, JobSnapshot, JobStatus,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::debug;

struct JobRecord {
    def: JobDefinition,
    command: Arc<dyn JobCommand>,
    status: JobStatus,
    progress: u8,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    result: Option<JobResult>,
    cancel: CancelToken,
    status_tx: watch::Sender<JobStatus>,
}

/// A job handed to a worker: everything needed to run it.
pub struct FetchedJob {
    pub id: JobId,
    pub category: JobCategory,
    pub command: Arc<dyn JobCommand>,
    pub cancel: CancelToken,
}

/// Monotone scheduler counters.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
}

/// Serializable view of [`SchedulerStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Priority scheduler over typed jobs.
pub struct JobScheduler {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    next_id: AtomicU64,
    queue_changed: Arc<Notify>,
    stats: SchedulerStats,
    /// How long terminal records stay queryable.
    retention: Duration,
}

impl JobScheduler {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_changed: Arc::new(Notify::new()),
            stats: SchedulerStats::default(),
            retention,
        }
    }

    /// Broadcast handle workers park on while the queue is empty.
    pub fn queue_changed(&self) -> Arc<Notify> {
        Arc::clone(&self.queue_changed)
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Register a new pending job.
    pub fn submit(
        &self,
        category: JobCategory,
        priority: JobPriority,
        page_index: Option<PageIndex>,
        book_path: Option<String>,
        command: Arc<dyn JobCommand>,
    ) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (status_tx, _) = watch::channel(JobStatus::Pending);

        let record = JobRecord {
            def: JobDefinition {
                id,
                category,
                priority,
                page_index,
                book_path,
                created_at: Instant::now(),
            },
            command,
            status: JobStatus::Pending,
            progress: 0,
            started_at: None,
            completed_at: None,
            result: None,
            cancel: CancelToken::new(),
            status_tx,
        };

        self.jobs.lock().insert(id, record);
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.queue_changed.notify_waiters();
        debug!(%id, %category, %priority, "job submitted");
        id
    }

    /// Atomically pick the best pending job with `priority ∈ [min, max]`
    /// and flip it to `Running`. Highest priority wins; ties go to the
    /// earliest submission.
    pub fn fetch_next_job(&self, min: JobPriority, max: JobPriority) -> Option<FetchedJob> {
        let mut jobs = self.jobs.lock();

        let best = jobs
            .values()
            .filter(|r| {
                r.status == JobStatus::Pending && r.def.priority >= min && r.def.priority <= max
            })
            .map(|r| (r.def.priority, r.def.created_at, r.def.id))
            .min_by(|a, b| {
                // Highest priority first, then earliest created_at, then
                // submission order.
                b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2))
            })
            .map(|(_, _, id)| id)?;

        let record = jobs.get_mut(&best).expect("selected job present");
        record.status = JobStatus::Running;
        record.started_at = Some(Instant::now());
        let _ = record.status_tx.send(JobStatus::Running);

        Some(FetchedJob {
            id: best,
            category: record.def.category,
            command: Arc::clone(&record.command),
            cancel: record.cancel.clone(),
        })
    }

    /// Record a job's outcome. A job already marked `Cancelled` keeps that
    /// status: cancellation is terminal and never upgraded to `Completed`.
    pub fn complete_job(&self, id: JobId, success: bool, error: Option<String>) -> bool {
        let changed = {
            let mut jobs = self.jobs.lock();
            let record = match jobs.get_mut(&id) {
                Some(record) => record,
                None => return false,
            };

            let now = Instant::now();
            let duration_ms = record
                .started_at
                .map(|s| now.duration_since(s).as_millis() as u64)
                .unwrap_or(0);

            if record.status == JobStatus::Cancelled {
                // Worker drained a cancelled job; keep the status, note
                // the finish time.
                record.completed_at.get_or_insert(now);
                record.result.get_or_insert(JobResult {
                    success: false,
                    error,
                    duration_ms,
                });
                false
            } else if record.status.is_terminal() {
                false
            } else {
                record.status = if success { JobStatus::Completed } else { JobStatus::Failed };
                record.completed_at = Some(now);
                record.progress = 100;
                record.result = Some(JobResult { success, error, duration_ms });
                let _ = record.status_tx.send(record.status);
                if success {
                    self.stats.completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
        };

        if changed {
            self.queue_changed.notify_waiters();
        }
        changed
    }

    /// Cancel one job. Returns `false` when the job is unknown or already
    /// terminal.
    pub fn cancel_job(&self, id: JobId) -> bool {
        let to_signal = {
            let mut jobs = self.jobs.lock();
            match jobs.get_mut(&id) {
                Some(record) if !record.status.is_terminal() => {
                    record.status = JobStatus::Cancelled;
                    record.completed_at = Some(Instant::now());
                    let _ = record.status_tx.send(JobStatus::Cancelled);
                    self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                    Some((record.cancel.clone(), Arc::clone(&record.command)))
                }
                _ => None,
            }
        };

        match to_signal {
            Some((token, command)) => {
                // Signal outside the lock; command.cancel() is user code.
                token.cancel();
                command.cancel();
                self.queue_changed.notify_waiters();
                debug!(%id, "job cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every live job for a page, optionally narrowed to one book.
    pub fn cancel_page_jobs(&self, page_index: PageIndex, book_path: Option<&str>) -> usize {
        let matching = self.collect_live_ids(|def| {
            def.page_index == Some(page_index)
                && book_path.map_or(true, |b| def.book_path.as_deref() == Some(b))
        });
        matching.into_iter().filter(|id| self.cancel_job(*id)).count()
    }

    /// Cancel every live job in a category.
    pub fn cancel_category_jobs(&self, category: JobCategory) -> usize {
        let matching = self.collect_live_ids(|def| def.category == category);
        matching.into_iter().filter(|id| self.cancel_job(*id)).count()
    }

    /// Cancel everything still live. Used at teardown.
    pub fn cancel_all(&self) -> usize {
        let matching = self.collect_live_ids(|_| true);
        matching.into_iter().filter(|id| self.cancel_job(*id)).count()
    }

    fn collect_live_ids<F: Fn(&JobDefinition) -> bool>(&self, pred: F) -> Vec<JobId> {
        self.jobs
            .lock()
            .values()
            .filter(|r| !r.status.is_terminal() && pred(&r.def))
            .map(|r| r.def.id)
            .collect()
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.lock().get(&id).map(|r| r.status)
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs.lock().get(&id).map(|r| JobSnapshot {
            id: r.def.id,
            category: r.def.category,
            priority: r.def.priority,
            page_index: r.def.page_index,
            book_path: r.def.book_path.clone(),
            status: r.status,
            progress: r.progress,
            result: r.result.clone(),
        })
    }

    pub fn set_progress(&self, id: JobId, progress: u8) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(record) if !record.status.is_terminal() => {
                record.progress = progress.min(100);
                true
            }
            _ => false,
        }
    }

    /// Subscribe to a job's status. `None` when the record is gone.
    pub fn watch_job(&self, id: JobId) -> Option<watch::Receiver<JobStatus>> {
        self.jobs.lock().get(&id).map(|r| r.status_tx.subscribe())
    }

    /// Resolve once the job reaches a terminal state. `None` when the
    /// record is already gone.
    pub async fn wait_for_job(&self, id: JobId) -> Option<JobStatus> {
        let mut rx = self.watch_job(id)?;
        loop {
            let status = *rx.borrow();
            if status.is_terminal() {
                return Some(status);
            }
            if rx.changed().await.is_err() {
                // Sender dropped with the record; report the last status.
                return Some(*rx.borrow());
            }
        }
    }

    /// Drop terminal records older than the retention window. Returns how
    /// many were removed.
    pub fn cleanup(&self) -> usize {
        let cutoff = Instant::now();
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, r| {
            !(r.status.is_terminal()
                && r.completed_at
                    .map(|at| cutoff.duration_since(at) >= self.retention)
                    .unwrap_or(false))
        });
        before - jobs.len()
    }

    pub fn pending_count(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|r| r.status == JobStatus::Pending)
            .count()
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|r| r.status == JobStatus::Running)
            .count()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }
}
