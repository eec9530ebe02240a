//! [`JobStore`] backed by PostgreSQL.

use async_trait::async_trait;
use uuid::Uuid;

use resona_core::error::CoreError;
use resona_core::job::{Job, NewJob};
use resona_core::queue::{QueueEntry, DEFAULT_MAX_RETRIES};
use resona_core::status::JobStatus;
use resona_core::store::JobStore;
use resona_core::types::{JobId, OwnerId};

use crate::repositories::{JobRepo, QueueRepo};
use crate::DbPool;

/// Durable job store; the production implementation.
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn internal(err: sqlx::Error) -> CoreError {
        CoreError::Internal(format!("Database error: {err}"))
    }

    async fn fetch(&self, id: JobId) -> Result<Job, CoreError> {
        JobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(Self::internal)?
            .ok_or_else(|| CoreError::job_not_found(id))?
            .into_domain()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, CoreError> {
        let id = Uuid::now_v7();
        let priority = new_job.priority;

        let row = JobRepo::insert(&self.pool, id, &new_job)
            .await
            .map_err(Self::internal)?;
        QueueRepo::insert(&self.pool, id, priority, DEFAULT_MAX_RETRIES as i32)
            .await
            .map_err(Self::internal)?;

        row.into_domain()
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, CoreError> {
        match JobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(Self::internal)?
        {
            Some(row) => Ok(Some(row.into_domain()?)),
            None => Ok(None),
        }
    }

    async fn list_by_owner(&self, owner: OwnerId, limit: i64) -> Result<Vec<Job>, CoreError> {
        JobRepo::list_by_owner(&self.pool, owner, limit)
            .await
            .map_err(Self::internal)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }

    async fn update_progress(
        &self,
        id: JobId,
        progress: f32,
        status: Option<JobStatus>,
    ) -> Result<(), CoreError> {
        let touched = JobRepo::update_progress(&self.pool, id, progress, status)
            .await
            .map_err(Self::internal)?;

        if touched == 0 {
            // Distinguish "unknown job" from "terminal guard held the write".
            let current = self.fetch(id).await?;
            if !current.status.is_terminal() {
                return Err(CoreError::Conflict(format!(
                    "Progress write to job {id} was rejected in status {}",
                    current.status
                )));
            }
        } else if let Some(status) = status {
            if status.is_terminal() {
                QueueRepo::remove(&self.pool, id)
                    .await
                    .map_err(Self::internal)?;
            }
        }
        Ok(())
    }

    async fn complete(&self, id: JobId, output_refs: &[String]) -> Result<(), CoreError> {
        let touched = JobRepo::complete(&self.pool, id, output_refs)
            .await
            .map_err(Self::internal)?;
        if touched == 0 {
            // Either unknown or already terminal; surface only the former.
            self.fetch(id).await?;
            return Ok(());
        }
        QueueRepo::remove(&self.pool, id)
            .await
            .map_err(Self::internal)
    }

    async fn fail(&self, id: JobId, error_message: &str) -> Result<(), CoreError> {
        let touched = JobRepo::fail(&self.pool, id, error_message)
            .await
            .map_err(Self::internal)?;
        if touched == 0 {
            self.fetch(id).await?;
            return Ok(());
        }
        QueueRepo::remove(&self.pool, id)
            .await
            .map_err(Self::internal)
    }

    async fn cancel(&self, id: JobId) -> Result<Job, CoreError> {
        let touched = JobRepo::cancel(&self.pool, id)
            .await
            .map_err(Self::internal)?;
        if touched > 0 {
            QueueRepo::remove(&self.pool, id)
                .await
                .map_err(Self::internal)?;
        }
        // Return whatever the job looks like now; if it was already terminal
        // the record is untouched and that outcome stands.
        self.fetch(id).await
    }

    async fn queue_entry(&self, id: JobId) -> Result<Option<QueueEntry>, CoreError> {
        Ok(QueueRepo::find_by_job(&self.pool, id)
            .await
            .map_err(Self::internal)?
            .map(|row| row.into_domain()))
    }

    async fn mark_started(&self, id: JobId) -> Result<(), CoreError> {
        let touched = QueueRepo::mark_started(&self.pool, id)
            .await
            .map_err(Self::internal)?;
        if touched == 0 {
            return Err(CoreError::job_not_found(id));
        }
        Ok(())
    }

    async fn record_retry(&self, id: JobId) -> Result<u32, CoreError> {
        QueueRepo::record_retry(&self.pool, id)
            .await
            .map_err(Self::internal)?
            .map(|count| count.max(0) as u32)
            .ok_or_else(|| CoreError::job_not_found(id))
    }

    async fn stale_started(&self) -> Result<Vec<QueueEntry>, CoreError> {
        Ok(QueueRepo::stale_started(&self.pool)
            .await
            .map_err(Self::internal)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect())
    }

    async fn unstarted(&self) -> Result<Vec<QueueEntry>, CoreError> {
        Ok(QueueRepo::unstarted(&self.pool)
            .await
            .map_err(Self::internal)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect())
    }
}
