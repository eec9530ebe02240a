//! Job lifecycle states and the forward-only transition rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Execution status of a job.
///
/// The machine is `Pending -> Processing -> {Completed | Failed | Cancelled}`
/// with the extra legal edge `Pending -> Cancelled` (cancel before start).
/// Statuses never move backward and terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed and Cancelled are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// A no-op transition (`self == next`) is always allowed so that repeated
    /// progress writes carrying the current status stay idempotent.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            JobStatus::Pending => {
                matches!(next, JobStatus::Processing | JobStatus::Cancelled)
            }
            JobStatus::Processing => next.is_terminal(),
            // Terminal states accept nothing else.
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(CoreError::Internal(format!(
                "Unknown job status in storage: \"{other}\""
            ))),
        }
    }
}
