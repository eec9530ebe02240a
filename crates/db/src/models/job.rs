//! Row models for the `jobs` and `job_queue` tables.

use sqlx::FromRow;
use uuid::Uuid;

use resona_core::error::CoreError;
use resona_core::job::Job;
use resona_core::queue::QueueEntry;
use resona_core::types::Timestamp;

/// A row from the `jobs` table. Status and tool are stored as their string
/// wire forms; input/output references as JSONB arrays.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub tool_type: String,
    pub settings: serde_json::Value,
    pub input_refs: serde_json::Value,
    pub output_refs: serde_json::Value,
    pub status: String,
    pub progress: f32,
    pub error_message: Option<String>,
    pub priority: i32,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl JobRow {
    /// Convert into the domain model, failing if a stored enum or JSON array
    /// no longer parses (which would indicate a corrupted row).
    pub fn into_domain(self) -> Result<Job, CoreError> {
        let refs = |value: serde_json::Value, column: &str| -> Result<Vec<String>, CoreError> {
            serde_json::from_value(value)
                .map_err(|e| CoreError::Internal(format!("Bad {column} JSON for job: {e}")))
        };

        Ok(Job {
            id: self.id,
            owner_id: self.owner_id,
            tool_type: self.tool_type.parse()?,
            settings: self.settings,
            input_refs: refs(self.input_refs, "input_refs")?,
            output_refs: refs(self.output_refs, "output_refs")?,
            status: self.status.parse()?,
            progress: self.progress,
            error_message: self.error_message,
            priority: self.priority,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

/// A row from the `job_queue` table.
#[derive(Debug, Clone, FromRow)]
pub struct QueueEntryRow {
    pub job_id: Uuid,
    pub priority: i32,
    pub scheduled_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub retry_count: i32,
    pub max_retries: i32,
}

impl QueueEntryRow {
    pub fn into_domain(self) -> QueueEntry {
        QueueEntry {
            job_id: self.job_id,
            priority: self.priority,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            retry_count: self.retry_count.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
        }
    }
}
