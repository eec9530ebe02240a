//! Scheduling metadata attached to a job while it is admitted.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Default retry budget for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One queue entry per admitted job; removed when the job reaches a terminal
/// status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub priority: i32,
    pub scheduled_at: Timestamp,
    /// Set when a worker begins execution; cleared again on re-admission.
    pub started_at: Option<Timestamp>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueueEntry {
    /// Whether another automatic retry is within budget.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
