// Job model shared by the scheduler, the workers, and every component
// that submits work.

use crate::common::{CancelToken, PageIndex};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Scheduler-assigned job identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// What kind of work a job carries. Cancellation by category relies on
/// this: a preload wave cancels `PageAhead` without touching the
/// `PageView` job for the page in view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobCategory {
    /// Load the page currently in view.
    PageView,

    /// Speculative load of a neighboring page.
    PageAhead,

    /// Thumbnail production.
    Thumbnail,

    /// Super-resolution work.
    Upscale,

    /// Background cache maintenance.
    CacheMaintenance,
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobCategory::PageView => write!(f, "page-view"),
            JobCategory::PageAhead => write!(f, "page-ahead"),
            JobCategory::Thumbnail => write!(f, "thumbnail"),
            JobCategory::Upscale => write!(f, "upscale"),
            JobCategory::CacheMaintenance => write!(f, "cache-maintenance"),
        }
    }
}

/// Scheduling priority. Declaration order is the ordering: `Idle` lowest,
/// `Critical` highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum JobPriority {
    Idle,
    Low,
    Normal,
    High,
    Critical,
}

impl JobPriority {
    /// Numeric weight, higher = more urgent.
    pub fn value(&self) -> u8 {
        match self {
            JobPriority::Idle => 0,
            JobPriority::Low => 20,
            JobPriority::Normal => 50,
            JobPriority::High => 80,
            JobPriority::Critical => 100,
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Idle => write!(f, "idle"),
            JobPriority::Low => write!(f, "low"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Job lifecycle. Transitions run `Pending → Running → {Completed, Failed,
/// Cancelled}`; a job may also go straight from `Pending` to `Cancelled`.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The work a job carries.
///
/// `execute` produces no value: results flow through the pipeline's own
/// channels (cache inserts, events). The command must observe the cancel
/// token at every suspension boundary and return promptly once it fires.
#[async_trait]
pub trait JobCommand: Send + Sync {
    async fn execute(&self, cancel: &CancelToken) -> Result<()>;

    /// Extra cooperative signal on top of the token, for commands holding
    /// resources the token cannot reach. Must be idempotent.
    fn cancel(&self) {}
}

/// Immutable facts about a job, fixed at submission.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub id: JobId,
    pub category: JobCategory,
    pub priority: JobPriority,
    pub page_index: Option<PageIndex>,
    pub book_path: Option<String>,
    pub created_at: Instant,
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Point-in-time view of a job for status queries.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub category: JobCategory,
    pub priority: JobPriority,
    pub page_index: Option<PageIndex>,
    pub book_path: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<JobResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Critical > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
        assert!(JobPriority::Low > JobPriority::Idle);
        assert_eq!(JobPriority::Critical.value(), 100);
        assert_eq!(JobPriority::Idle.value(), 0);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
