//! In-memory [`JobStore`] implementation.
//!
//! Backs brokerless deployments (no `DATABASE_URL`) and the engine test
//! suites. Semantics match the PostgreSQL store: forward-only status
//! transitions, terminal outcomes win races, queue entries live from
//! admission to terminal status.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use resona_core::error::CoreError;
use resona_core::job::{Job, NewJob};
use resona_core::queue::{QueueEntry, DEFAULT_MAX_RETRIES};
use resona_core::status::JobStatus;
use resona_core::store::JobStore;
use resona_core::types::{JobId, OwnerId};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    entries: HashMap<JobId, QueueEntry>,
}

/// Volatile job store; jobs do not survive a process restart.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_terminal(job: &mut Job, status: JobStatus) {
        job.status = status;
        job.completed_at = Some(chrono::Utc::now());
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, CoreError> {
        let now = chrono::Utc::now();
        let job = Job {
            id: Uuid::now_v7(),
            owner_id: new_job.owner_id,
            tool_type: new_job.tool_type,
            settings: new_job.settings,
            input_refs: new_job.input_refs,
            output_refs: Vec::new(),
            status: JobStatus::Pending,
            progress: 0.0,
            error_message: None,
            priority: new_job.priority,
            created_at: now,
            completed_at: None,
        };
        let entry = QueueEntry {
            job_id: job.id,
            priority: job.priority,
            scheduled_at: now,
            started_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        };

        let mut inner = self.inner.write().await;
        inner.entries.insert(job.id, entry);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, CoreError> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner: OwnerId, limit: i64) -> Result<Vec<Job>, CoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.owner_id == owner)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn update_progress(
        &self,
        id: JobId,
        progress: f32,
        status: Option<JobStatus>,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        let Inner { jobs, entries } = &mut *inner;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::job_not_found(id))?;

        if job.status.is_terminal() {
            // The terminal outcome wins any race with a late progress write.
            return Ok(());
        }

        if let Some(next) = status {
            if !job.status.can_transition_to(next) {
                return Err(CoreError::Conflict(format!(
                    "Illegal status transition {} -> {next} for job {id}",
                    job.status
                )));
            }
            if next.is_terminal() {
                Self::apply_terminal(job, next);
                entries.remove(&id);
            } else {
                job.status = next;
            }
        }

        job.progress = progress;
        Ok(())
    }

    async fn complete(&self, id: JobId, output_refs: &[String]) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        let Inner { jobs, entries } = &mut *inner;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::job_not_found(id))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        job.output_refs = output_refs.to_vec();
        job.progress = 100.0;
        Self::apply_terminal(job, JobStatus::Completed);
        entries.remove(&id);
        Ok(())
    }

    async fn fail(&self, id: JobId, error_message: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        let Inner { jobs, entries } = &mut *inner;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::job_not_found(id))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        job.error_message = Some(error_message.to_string());
        Self::apply_terminal(job, JobStatus::Failed);
        entries.remove(&id);
        Ok(())
    }

    async fn cancel(&self, id: JobId) -> Result<Job, CoreError> {
        let mut inner = self.inner.write().await;
        let Inner { jobs, entries } = &mut *inner;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::job_not_found(id))?;
        if !job.status.is_terminal() {
            Self::apply_terminal(job, JobStatus::Cancelled);
            entries.remove(&id);
        }
        Ok(job.clone())
    }

    async fn queue_entry(&self, id: JobId) -> Result<Option<QueueEntry>, CoreError> {
        Ok(self.inner.read().await.entries.get(&id).cloned())
    }

    async fn mark_started(&self, id: JobId) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::job_not_found(id))?;
        entry.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn record_retry(&self, id: JobId) -> Result<u32, CoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::job_not_found(id))?;
        entry.retry_count += 1;
        entry.started_at = None;
        Ok(entry.retry_count)
    }

    async fn stale_started(&self) -> Result<Vec<QueueEntry>, CoreError> {
        let inner = self.inner.read().await;
        let mut stale: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|e| {
                e.started_at.is_some()
                    && inner
                        .jobs
                        .get(&e.job_id)
                        .is_some_and(|j| !j.status.is_terminal())
            })
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(stale)
    }

    async fn unstarted(&self) -> Result<Vec<QueueEntry>, CoreError> {
        let inner = self.inner.read().await;
        let mut open: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|e| e.started_at.is_none())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(open)
    }
}
