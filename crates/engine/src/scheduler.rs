//! Job admission, dispatch ordering, cancellation and restart recovery.

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use resona_core::error::CoreError;
use resona_core::job::{Job, NewJob};
use resona_core::progress::ProgressSnapshot;
use resona_core::status::JobStatus;
use resona_core::store::JobStore;
use resona_core::tool::ToolType;
use resona_core::types::{JobId, OwnerId, Timestamp};
use resona_core::ProcessingBackend;

use crate::bus::ProgressBus;
use crate::config::EngineConfig;
use crate::worker;

/// Admission payload for [`Scheduler::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub owner_id: OwnerId,
    pub tool_type: ToolType,
    pub settings: serde_json::Value,
    pub input_refs: Vec<String>,
    pub priority: i32,
}

/// Point-in-time queue counters; observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub active_count: usize,
    pub worker_count: usize,
}

/// What a cancellation request achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was cancelled outright (it was still pending, or the record
    /// was cancellable directly).
    Cancelled,
    /// The job is running; its worker will observe the signal between steps.
    CancelRequested,
    /// The job had already reached this terminal status; nothing changed.
    AlreadyTerminal(JobStatus),
}

impl CancelOutcome {
    /// The status string reported to the caller. Cancellation is always
    /// acknowledged; a job that already finished reports its actual outcome.
    pub fn status_label(self) -> &'static str {
        match self {
            CancelOutcome::Cancelled | CancelOutcome::CancelRequested => {
                JobStatus::Cancelled.as_str()
            }
            CancelOutcome::AlreadyTerminal(status) => status.as_str(),
        }
    }
}

/// Heap entry for the pending queue. Ordered so the `BinaryHeap` max element
/// is the next job to dispatch: lowest priority value first, FIFO by
/// `scheduled_at` within a priority band, job id as the final tiebreak for a
/// total order.
#[derive(Debug, Clone)]
pub(crate) struct PendingEntry {
    pub(crate) job_id: JobId,
    pub(crate) priority: i32,
    pub(crate) scheduled_at: Timestamp,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.scheduled_at.cmp(&self.scheduled_at))
            .then_with(|| other.job_id.cmp(&self.job_id))
    }
}

pub(crate) struct SchedulerInner {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) backend: Arc<dyn ProcessingBackend>,
    pub(crate) bus: Arc<ProgressBus>,
    pub(crate) config: EngineConfig,
    /// Jobs admitted but not yet claimed by a worker.
    pending: Mutex<BinaryHeap<PendingEntry>>,
    /// Cancellation token per running job. Lock order: `pending` before
    /// `running`, always.
    running: Mutex<HashMap<JobId, CancellationToken>>,
    notify: Notify,
    pub(crate) shutdown: CancellationToken,
}

impl SchedulerInner {
    /// Atomically move the next pending entry into the running set.
    ///
    /// The running token is registered while the pending lock is held, so a
    /// concurrent cancel always finds the job in exactly one of the two
    /// collections.
    pub(crate) fn claim_next(&self) -> Option<(PendingEntry, CancellationToken)> {
        let mut pending = self.pending.lock().unwrap();
        let entry = pending.pop()?;
        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap()
            .insert(entry.job_id, token.clone());
        Some((entry, token))
    }

    pub(crate) fn release(&self, job_id: JobId) {
        self.running.lock().unwrap().remove(&job_id);
    }

    /// Put a job (back) on the pending heap and wake a worker.
    pub(crate) fn admit(&self, entry: PendingEntry) {
        self.pending.lock().unwrap().push(entry);
        self.notify.notify_one();
    }

    pub(crate) async fn idle_wait(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.notify.notified() => {}
        }
    }
}

/// Admission and dispatch authority over the job queue.
///
/// Owns a bounded pool of worker tasks that pull jobs in priority order and
/// execute them against the processing backend. Cheaply cloneable.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ProcessingBackend>,
        bus: Arc<ProgressBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                backend,
                bus,
                config,
                pending: Mutex::new(BinaryHeap::new()),
                running: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawn the worker pool. Idempotent use is not supported; call once.
    pub fn start(&self) {
        for worker_id in 0..self.inner.config.worker_count {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(worker::worker_loop(inner, worker_id));
        }
        tracing::info!(
            worker_count = self.inner.config.worker_count,
            "Scheduler started"
        );
    }

    /// Signal all workers to stop after their current job.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    /// Create a job and make it visible to workers. Returns immediately.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job, CoreError> {
        if request.tool_type.requires_input() && request.input_refs.is_empty() {
            return Err(CoreError::Validation(format!(
                "Tool \"{}\" requires at least one input file",
                request.tool_type
            )));
        }

        let job = self
            .inner
            .store
            .create(NewJob {
                owner_id: request.owner_id,
                tool_type: request.tool_type,
                settings: request.settings,
                input_refs: request.input_refs,
                priority: request.priority,
            })
            .await?;

        self.inner.admit(PendingEntry {
            job_id: job.id,
            priority: job.priority,
            scheduled_at: job.created_at,
        });

        tracing::info!(
            job_id = %job.id,
            tool_type = %job.tool_type,
            owner_id = %job.owner_id,
            priority = job.priority,
            inputs = job.input_refs.len(),
            "Job enqueued",
        );
        Ok(job)
    }

    /// Cancel a pending or running job on behalf of its owner.
    ///
    /// A pending job is removed from the queue and marked cancelled without
    /// ever touching the backend. A running job gets its cancellation signal
    /// raised and becomes cancelled once the worker observes it. A job that
    /// already finished is left untouched.
    pub async fn cancel(
        &self,
        job_id: JobId,
        requesting_owner_id: OwnerId,
    ) -> Result<CancelOutcome, CoreError> {
        let job = self
            .inner
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))?;

        if job.owner_id != requesting_owner_id {
            return Err(CoreError::Forbidden(
                "Cannot cancel another user's job".into(),
            ));
        }

        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(job.status));
        }

        // Resolve where the job currently lives. Lock order matches
        // `claim_next` (pending, then running) so the in-flight handoff
        // window is closed.
        enum Hit {
            Dequeued,
            Signalled,
            Elsewhere,
        }
        let hit = {
            let mut pending = self.inner.pending.lock().unwrap();
            let before = pending.len();
            pending.retain(|e| e.job_id != job_id);
            if pending.len() < before {
                Hit::Dequeued
            } else if let Some(token) = self.inner.running.lock().unwrap().get(&job_id) {
                token.cancel();
                Hit::Signalled
            } else {
                Hit::Elsewhere
            }
        };

        match hit {
            Hit::Dequeued => {
                let cancelled = self.inner.store.cancel(job_id).await?;
                self.publish_cancelled(&cancelled).await;
                tracing::info!(job_id = %job_id, "Pending job cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            Hit::Signalled => {
                tracing::info!(job_id = %job_id, "Cancellation signalled to worker");
                Ok(CancelOutcome::CancelRequested)
            }
            Hit::Elsewhere => {
                // Not queued and not running: the job finished (or was torn
                // down) between our status read and the lock. The store is
                // authoritative; cancel resolves the race either way.
                let resolved = self.inner.store.cancel(job_id).await?;
                if resolved.status == JobStatus::Cancelled {
                    self.publish_cancelled(&resolved).await;
                    Ok(CancelOutcome::Cancelled)
                } else {
                    Ok(CancelOutcome::AlreadyTerminal(resolved.status))
                }
            }
        }
    }

    /// Counters for observability; never used for correctness.
    pub fn queue_status(&self) -> QueueStatus {
        let pending_count = self.inner.pending.lock().unwrap().len();
        let active_count = self.inner.running.lock().unwrap().len();
        QueueStatus {
            pending_count,
            active_count,
            worker_count: self.inner.config.worker_count,
        }
    }

    /// Re-admit or fail work left over from a previous process.
    ///
    /// Entries that were started but never reached a terminal status are
    /// retried while budget remains, otherwise failed. Entries that were
    /// never started are simply re-admitted.
    pub async fn recover(&self) -> Result<(), CoreError> {
        let store = &self.inner.store;

        // Snapshot both sets before mutating anything: re-admitting a stale
        // entry clears its started_at, which must not land it in the
        // never-started pass as well.
        let stale = store.stale_started().await?;
        let fresh = store.unstarted().await?;

        for entry in stale {
            if entry.can_retry() {
                let retries = store.record_retry(entry.job_id).await?;
                tracing::warn!(
                    job_id = %entry.job_id,
                    retries,
                    "Re-admitting job interrupted by restart",
                );
                self.inner.admit(PendingEntry {
                    job_id: entry.job_id,
                    priority: entry.priority,
                    scheduled_at: entry.scheduled_at,
                });
            } else {
                tracing::warn!(
                    job_id = %entry.job_id,
                    "Retry budget exhausted after restart, failing job",
                );
                store
                    .fail(entry.job_id, "No progress after restart")
                    .await?;
            }
        }

        for entry in fresh {
            self.inner.admit(PendingEntry {
                job_id: entry.job_id,
                priority: entry.priority,
                scheduled_at: entry.scheduled_at,
            });
        }

        Ok(())
    }

    async fn publish_cancelled(&self, job: &Job) {
        self.inner
            .bus
            .publish(ProgressSnapshot {
                job_id: job.id,
                progress: job.progress,
                status: JobStatus::Cancelled,
                message: "Job cancelled by user".into(),
                current_step: "Cancelled".into(),
                current_step_num: 1,
                total_steps: job.total_steps(),
                estimated_time_remaining: None,
                updated_at: chrono::Utc::now(),
            })
            .await;
    }
}
