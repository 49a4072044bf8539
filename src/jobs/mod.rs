// # Job Scheduling System
//
// Typed jobs over a priority scheduler and a partitioned worker pool.
//
// ## Overview
//
// Work enters as a `(category, priority, command)` triple. The scheduler
// keeps one record per job and hands pending work to whichever worker
// asks first within its priority band:
//
// - **Primary workers** serve `Normal..=Critical`, the interactive path.
// - **Auxiliary workers** serve `Idle..=Low`: preloads and maintenance.
// - A pool of one runs a single *limited* auxiliary worker covering the
//   whole range.
//
// Same-priority jobs start in submission order; a higher-priority pending
// job wins the next scheduling decision but never preempts a running one.
//
// ## Cancellation
//
// Jobs can be cancelled by id, by `(page, book)`, or by category. Each
// command holds a `CancelToken` it must observe between suspension
// points; a cancelled job is terminal and is never reported completed,
// even if its command body finishes afterwards.
//
// ## Completion
//
// Every record carries a status watch channel fired inside
// `complete_job`, so awaiting terminal state is a subscription rather
// than a poll. Terminal records stay queryable for a grace period, then
// the sweeper drops them.

pub mod engine;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use engine::{EngineStatsSnapshot, JobEngine, JobEngineConfig};
pub use scheduler::{FetchedJob, JobScheduler, SchedulerStatsSnapshot};
pub use types::{
    JobCategory, JobCommand, JobDefinition, JobId, JobPriority, JobResult, JobSnapshot, JobStatus,
};
pub use worker::{BusyTracker, WorkerConfig, WorkerHandle};
