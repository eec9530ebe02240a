//! Worker loop: claims queued jobs and drives each through the execution
//! protocol (init, one step per input, finalize), reporting progress through
//! the bus and status changes through the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use resona_core::error::CoreError;
use resona_core::job::Job;
use resona_core::progress::{estimate_remaining_secs, step_progress, ProgressSnapshot};
use resona_core::status::JobStatus;
use resona_core::ProcessError;

use crate::scheduler::{PendingEntry, SchedulerInner};

pub(crate) async fn worker_loop(inner: Arc<SchedulerInner>, worker_id: usize) {
    tracing::info!(worker_id, "Worker started");
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }
        let Some((entry, cancel)) = inner.claim_next() else {
            inner.idle_wait().await;
            continue;
        };

        let job_id = entry.job_id;
        let requeue = run_claimed(&inner, entry, cancel).await;
        // Release before re-admitting so a retry claimed by another worker
        // never has its fresh cancellation token clobbered.
        inner.release(job_id);
        if let Some(entry) = requeue {
            inner.admit(entry);
        }
    }
    tracing::info!(worker_id, "Worker stopped");
}

/// Execute one claimed job under the soft and hard deadlines.
///
/// Returns a `PendingEntry` when the job should be re-admitted (transient
/// failure within the retry budget).
async fn run_claimed(
    inner: &SchedulerInner,
    entry: PendingEntry,
    cancel: CancellationToken,
) -> Option<PendingEntry> {
    let job_id = entry.job_id;
    let job = match inner.store.get(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::error!(job_id = %job_id, "Claimed job missing from store");
            return None;
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load claimed job");
            return None;
        }
    };
    if job.status.is_terminal() {
        // Cancelled (or otherwise finished) between admission and claim.
        return None;
    }

    // Soft deadline: raise the same cooperative signal a user cancellation
    // would, remembering that the deadline (not the user) pulled it.
    let soft_fired = Arc::new(AtomicBool::new(false));
    let soft_timer = {
        let cancel = cancel.clone();
        let fired = Arc::clone(&soft_fired);
        let deadline = inner.config.soft_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            fired.store(true, Ordering::SeqCst);
            cancel.cancel();
        })
    };

    let outcome = tokio::time::timeout(
        inner.config.hard_timeout,
        execute(inner, &job, &cancel, &soft_fired),
    )
    .await;
    soft_timer.abort();

    match outcome {
        Ok(Ok(decision)) => decision,
        Ok(Err(e)) => {
            tracing::error!(job_id = %job_id, error = %e, "Job execution aborted on store error");
            None
        }
        Err(_) => {
            // Hard deadline: force the terminal status directly, whatever
            // state the (now dropped) execution future was in.
            let message = format!(
                "Processing exceeded the hard deadline of {}s",
                inner.config.hard_timeout.as_secs()
            );
            tracing::error!(job_id = %job_id, "{message}");
            if let Err(e) = inner.store.fail(job_id, &message).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record hard timeout");
            }
            let last = inner.bus.latest(job_id).await;
            publish(
                inner,
                &job,
                last.as_ref().map_or(0.0, |s| s.progress),
                JobStatus::Failed,
                message,
                "Error",
                last.as_ref().map_or(1, |s| s.current_step_num),
                None,
            )
            .await;
            None
        }
    }
}

/// Drive the job through init, per-input, and finalize steps.
///
/// `Err` means a store write failed (the job is left for restart recovery);
/// job-level failures are absorbed into the job record and `Ok(None)`
/// returned.
async fn execute(
    inner: &SchedulerInner,
    job: &Job,
    cancel: &CancellationToken,
    soft_fired: &AtomicBool,
) -> Result<Option<PendingEntry>, CoreError> {
    let store = &inner.store;
    let job_id = job.id;
    let total_steps = job.total_steps();
    let input_count = job.input_refs.len();

    store.mark_started(job_id).await?;
    store
        .update_progress(job_id, 0.0, Some(JobStatus::Processing))
        .await?;
    publish(
        inner,
        job,
        0.0,
        JobStatus::Processing,
        "Starting audio processing".into(),
        "Initializing",
        1,
        None,
    )
    .await;

    let started = Instant::now();
    let mut output_refs: Vec<String> = Vec::with_capacity(input_count);

    for (index, input_ref) in job.input_refs.iter().enumerate() {
        // Cancellation is cooperative: checked between steps, never
        // mid-backend-call.
        if cancel.is_cancelled() {
            return finish_cancelled(inner, job, output_refs.len(), soft_fired).await;
        }

        match inner
            .backend
            .process(job.tool_type, &job.settings, input_ref)
            .await
        {
            Ok(output_ref) => {
                output_refs.push(output_ref);
                let steps_done = (index + 1) as u32;
                let progress = step_progress(steps_done, total_steps);
                store.update_progress(job_id, progress, None).await?;
                publish(
                    inner,
                    job,
                    progress,
                    JobStatus::Processing,
                    format!("Processed file {} of {input_count}", index + 1),
                    &format!("Processing {input_ref}"),
                    steps_done + 1,
                    estimate_remaining_secs(
                        started.elapsed().as_secs_f64(),
                        steps_done,
                        total_steps,
                    ),
                )
                .await;
            }
            Err(error) => {
                return finish_failed(inner, job, error, output_refs.len()).await;
            }
        }
    }

    if cancel.is_cancelled() {
        return finish_cancelled(inner, job, output_refs.len(), soft_fired).await;
    }

    // Finalize: aggregate outputs and close the job out.
    store.complete(job_id, &output_refs).await?;
    publish(
        inner,
        job,
        100.0,
        JobStatus::Completed,
        "Audio processing completed successfully".into(),
        "Finalizing",
        total_steps,
        None,
    )
    .await;
    tracing::info!(job_id = %job_id, outputs = output_refs.len(), "Job completed");
    Ok(None)
}

/// Apply the retry policy to a backend failure.
///
/// Transient failures are retried only while no input step has completed;
/// partial progress is never replayed. Everything else becomes a terminal
/// failure carrying the backend's message.
async fn finish_failed(
    inner: &SchedulerInner,
    job: &Job,
    error: ProcessError,
    completed_steps: usize,
) -> Result<Option<PendingEntry>, CoreError> {
    let job_id = job.id;

    if error.is_transient() && completed_steps == 0 {
        if let Some(entry) = inner.store.queue_entry(job_id).await? {
            if entry.can_retry() {
                let retries = inner.store.record_retry(job_id).await?;
                tracing::warn!(
                    job_id = %job_id,
                    retries,
                    error = %error,
                    "Transient backend failure, re-admitting job",
                );
                return Ok(Some(PendingEntry {
                    job_id,
                    priority: entry.priority,
                    scheduled_at: entry.scheduled_at,
                }));
            }
        }
    }

    let message = error.message().to_string();
    tracing::error!(job_id = %job_id, error = %message, "Job failed");
    inner.store.fail(job_id, &message).await?;

    let progress = step_progress(completed_steps as u32, job.total_steps());
    publish(
        inner,
        job,
        progress,
        JobStatus::Failed,
        format!("Processing failed: {message}"),
        "Error",
        completed_steps as u32 + 1,
        None,
    )
    .await;
    Ok(None)
}

async fn finish_cancelled(
    inner: &SchedulerInner,
    job: &Job,
    completed_steps: usize,
    soft_fired: &AtomicBool,
) -> Result<Option<PendingEntry>, CoreError> {
    let message = if soft_fired.load(Ordering::SeqCst) {
        "Processing exceeded the soft deadline"
    } else {
        "Job cancelled by user"
    };
    inner.store.cancel(job.id).await?;

    let progress = step_progress(completed_steps as u32, job.total_steps());
    publish(
        inner,
        job,
        progress,
        JobStatus::Cancelled,
        message.into(),
        "Cancelled",
        completed_steps as u32 + 1,
        None,
    )
    .await;
    tracing::info!(job_id = %job.id, "{message}");
    Ok(None)
}

#[allow(clippy::too_many_arguments)]
async fn publish(
    inner: &SchedulerInner,
    job: &Job,
    progress: f32,
    status: JobStatus,
    message: String,
    current_step: &str,
    current_step_num: u32,
    estimated_time_remaining: Option<f64>,
) {
    inner
        .bus
        .publish(ProgressSnapshot {
            job_id: job.id,
            progress,
            status,
            message,
            current_step: current_step.to_string(),
            current_step_num,
            total_steps: job.total_steps(),
            estimated_time_remaining,
            updated_at: chrono::Utc::now(),
        })
        .await;
}
