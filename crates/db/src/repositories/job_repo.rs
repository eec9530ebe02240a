//! Repository for the `jobs` table.
//!
//! Status strings come from `JobStatus::as_str`; no literal appears here
//! that the domain enum does not produce.

use sqlx::PgPool;
use uuid::Uuid;

use resona_core::job::NewJob;
use resona_core::status::JobStatus;

use crate::models::JobRow;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, tool_type, settings, input_refs, output_refs, \
    status, progress, error_message, priority, created_at, completed_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Terminal statuses, excluded from overwrite by terminal transitions.
const TERMINAL: [JobStatus; 3] = [
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

/// CRUD operations for audio processing jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job with a caller-assigned id.
    pub async fn insert(pool: &PgPool, id: Uuid, input: &NewJob) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, owner_id, tool_type, settings, input_refs, status, priority) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(input.owner_id)
            .bind(input.tool_type.as_str())
            .bind(&input.settings)
            .bind(serde_json::json!(input.input_refs))
            .bind(JobStatus::Pending.as_str())
            .bind(input.priority)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a user's jobs, most recent first.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(owner_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }

    /// Update progress and optionally the status. Terminal statuses also set
    /// `completed_at`. Returns the number of rows touched.
    pub async fn update_progress(
        pool: &PgPool,
        id: Uuid,
        progress: f32,
        status: Option<JobStatus>,
    ) -> Result<u64, sqlx::Error> {
        let result = match status {
            None => {
                sqlx::query("UPDATE jobs SET progress = $2 WHERE id = $1")
                    .bind(id)
                    .bind(progress)
                    .execute(pool)
                    .await?
            }
            Some(status) if status.is_terminal() => {
                sqlx::query(
                    "UPDATE jobs \
                     SET progress = $2, status = $3, completed_at = NOW() \
                     WHERE id = $1 AND status NOT IN ($4, $5, $6)",
                )
                .bind(id)
                .bind(progress)
                .bind(status.as_str())
                .bind(TERMINAL[0].as_str())
                .bind(TERMINAL[1].as_str())
                .bind(TERMINAL[2].as_str())
                .execute(pool)
                .await?
            }
            Some(status) => {
                sqlx::query("UPDATE jobs SET progress = $2, status = $3 WHERE id = $1")
                    .bind(id)
                    .bind(progress)
                    .bind(status.as_str())
                    .execute(pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    /// Mark a job completed with its output references.
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        output_refs: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, output_refs = $3, progress = 100, completed_at = NOW() \
             WHERE id = $1 AND status NOT IN ($4, $5, $6)",
        )
        .bind(id)
        .bind(JobStatus::Completed.as_str())
        .bind(serde_json::json!(output_refs))
        .bind(TERMINAL[0].as_str())
        .bind(TERMINAL[1].as_str())
        .bind(TERMINAL[2].as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Mark a job failed with a human-readable error message.
    pub async fn fail(pool: &PgPool, id: Uuid, error_message: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1 AND status NOT IN ($4, $5, $6)",
        )
        .bind(id)
        .bind(JobStatus::Failed.as_str())
        .bind(error_message)
        .bind(TERMINAL[0].as_str())
        .bind(TERMINAL[1].as_str())
        .bind(TERMINAL[2].as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cancel a job unless it already reached a terminal status.
    pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, completed_at = NOW() \
             WHERE id = $1 AND status NOT IN ($3, $4, $5)",
        )
        .bind(id)
        .bind(JobStatus::Cancelled.as_str())
        .bind(TERMINAL[0].as_str())
        .bind(TERMINAL[1].as_str())
        .bind(TERMINAL[2].as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
