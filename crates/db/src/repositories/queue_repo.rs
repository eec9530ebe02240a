//! Repository for the `job_queue` table.

use sqlx::PgPool;
use uuid::Uuid;

use resona_core::status::JobStatus;

use crate::models::QueueEntryRow;

/// Column list for `job_queue` queries.
const COLUMNS: &str = "job_id, priority, scheduled_at, started_at, retry_count, max_retries";

/// Operations on queue entries (one per admitted, non-terminal job).
pub struct QueueRepo;

impl QueueRepo {
    pub async fn insert(
        pool: &PgPool,
        job_id: Uuid,
        priority: i32,
        max_retries: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_queue (job_id, priority, max_retries) VALUES ($1, $2, $3)",
        )
        .bind(job_id)
        .bind(priority)
        .bind(max_retries)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_job(
        pool: &PgPool,
        job_id: Uuid,
    ) -> Result<Option<QueueEntryRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM job_queue WHERE job_id = $1");
        sqlx::query_as::<_, QueueEntryRow>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Stamp `started_at` when a worker claims the job.
    pub async fn mark_started(pool: &PgPool, job_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE job_queue SET started_at = NOW() WHERE job_id = $1")
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Increment the retry counter and clear `started_at` for re-admission.
    /// Returns the new count.
    pub async fn record_retry(pool: &PgPool, job_id: Uuid) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE job_queue \
             SET retry_count = retry_count + 1, started_at = NULL \
             WHERE job_id = $1 \
             RETURNING retry_count",
        )
        .bind(job_id)
        .fetch_optional(pool)
        .await
    }

    /// Remove the entry once its job reaches a terminal status.
    pub async fn remove(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM job_queue WHERE job_id = $1")
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Entries that were started but whose job never reached a terminal
    /// status - the set a restarting scheduler has to recover.
    pub async fn stale_started(pool: &PgPool) -> Result<Vec<QueueEntryRow>, sqlx::Error> {
        let query = format!(
            "SELECT q.{} FROM job_queue q \
             JOIN jobs j ON j.id = q.job_id \
             WHERE q.started_at IS NOT NULL \
               AND j.status NOT IN ($1, $2, $3) \
             ORDER BY q.scheduled_at ASC",
            COLUMNS.replace(", ", ", q.")
        );
        sqlx::query_as::<_, QueueEntryRow>(&query)
            .bind(JobStatus::Completed.as_str())
            .bind(JobStatus::Failed.as_str())
            .bind(JobStatus::Cancelled.as_str())
            .fetch_all(pool)
            .await
    }

    /// Entries never claimed by a worker, in admission order.
    pub async fn unstarted(pool: &PgPool) -> Result<Vec<QueueEntryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_queue \
             WHERE started_at IS NULL \
             ORDER BY scheduled_at ASC"
        );
        sqlx::query_as::<_, QueueEntryRow>(&query).fetch_all(pool).await
    }
}
