//! Durable job and queue-entry persistence contract.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::job::{Job, NewJob};
use crate::queue::QueueEntry;
use crate::status::JobStatus;
use crate::types::{JobId, OwnerId};

/// Source of truth for job existence, status and terminal outcome.
///
/// Implementations must be safe for concurrent readers with one logical
/// writer per job (the owning worker, plus the scheduler for admission and
/// cancellation). Reads are read-after-write consistent for the same job.
///
/// The workspace ships two implementations: a PostgreSQL store (durable
/// across restarts) and an in-memory store for brokerless deployments and
/// tests.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job plus its queue entry, both in their initial state.
    async fn create(&self, new_job: NewJob) -> Result<Job, CoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, CoreError>;

    /// Jobs belonging to `owner`, most recent first.
    async fn list_by_owner(&self, owner: OwnerId, limit: i64) -> Result<Vec<Job>, CoreError>;

    /// Write a progress percentage and optionally advance the status.
    ///
    /// Fails with `NotFound` for unknown ids and `Conflict` for a backward
    /// status transition. Writes against a job that already reached a
    /// terminal status are ignored (the terminal outcome wins any race).
    /// Terminal statuses also set `completed_at`. Repeated calls with
    /// equal-or-greater progress for the same status are idempotent in
    /// effect.
    async fn update_progress(
        &self,
        id: JobId,
        progress: f32,
        status: Option<JobStatus>,
    ) -> Result<(), CoreError>;

    /// Terminal success: record outputs, progress 100, `completed_at`, and
    /// drop the queue entry.
    async fn complete(&self, id: JobId, output_refs: &[String]) -> Result<(), CoreError>;

    /// Terminal failure: record the human-readable error, `completed_at`,
    /// and drop the queue entry.
    async fn fail(&self, id: JobId, error_message: &str) -> Result<(), CoreError>;

    /// Cancel unless already terminal, and return the resulting job.
    ///
    /// When the job already reached a terminal status the record is left
    /// untouched and returned as-is; the race between cancellation and
    /// completion is resolved in favour of whichever wrote first.
    async fn cancel(&self, id: JobId) -> Result<Job, CoreError>;

    async fn queue_entry(&self, id: JobId) -> Result<Option<QueueEntry>, CoreError>;

    /// Stamp `started_at` on the queue entry when a worker claims the job.
    async fn mark_started(&self, id: JobId) -> Result<(), CoreError>;

    /// Increment the retry counter, clear `started_at`, and return the new
    /// count. Called when a job is re-admitted after a transient failure.
    async fn record_retry(&self, id: JobId) -> Result<u32, CoreError>;

    /// Queue entries that were started but whose job never reached a
    /// terminal status - the recovery set scanned after a process restart.
    async fn stale_started(&self) -> Result<Vec<QueueEntry>, CoreError>;

    /// Queue entries never claimed by a worker. A restarting scheduler
    /// re-admits these verbatim (no retry cost).
    async fn unstarted(&self) -> Result<Vec<QueueEntry>, CoreError>;
}
