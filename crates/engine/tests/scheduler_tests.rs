//! End-to-end scheduler tests against the in-memory store and a scripted
//! processing backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use resona_core::error::CoreError;
use resona_core::job::Job;
use resona_core::progress::ProgressSnapshot;
use resona_core::status::JobStatus;
use resona_core::store::JobStore;
use resona_core::tool::ToolType;
use resona_core::types::{JobId, OwnerId};
use resona_core::{ProcessError, ProcessingBackend};
use resona_engine::{
    CancelOutcome, EngineConfig, EnqueueRequest, MemoryJobStore, ProgressBus, ProgressCache,
    Scheduler, SubscriptionRegistry,
};

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

struct TestBackend {
    /// Input refs in invocation order.
    calls: Mutex<Vec<String>>,
    /// Per-input failure plan: (remaining failures, transient?).
    fail_plan: Mutex<HashMap<String, (u32, bool)>>,
    /// When set, every call sleeps this long before returning.
    call_delay: Option<Duration>,
    /// Inputs that must acquire a gate permit before proceeding.
    gated: Vec<String>,
    gate: Arc<Semaphore>,
}

impl TestBackend {
    fn ok() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_plan: Mutex::new(HashMap::new()),
            call_delay: None,
            gated: Vec::new(),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Fail `times` calls for `input` before succeeding.
    fn failing(self, input: &str, times: u32, transient: bool) -> Self {
        self.fail_plan
            .lock()
            .unwrap()
            .insert(input.to_string(), (times, transient));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// Make `input` block until a permit is released via `release`.
    fn gated_on(mut self, input: &str) -> Self {
        self.gated.push(input.to_string());
        self
    }

    fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessingBackend for TestBackend {
    async fn process(
        &self,
        _tool: ToolType,
        _settings: &serde_json::Value,
        input_ref: &str,
    ) -> Result<String, ProcessError> {
        self.calls.lock().unwrap().push(input_ref.to_string());

        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        if self.gated.iter().any(|g| g == input_ref) {
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
        }

        let failure = {
            let mut plan = self.fail_plan.lock().unwrap();
            match plan.get_mut(input_ref) {
                Some((remaining, transient)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*transient)
                }
                _ => None,
            }
        };
        match failure {
            Some(true) => Err(ProcessError::Transient(format!(
                "backend unreachable while processing {input_ref}"
            ))),
            Some(false) => Err(ProcessError::Permanent(format!(
                "unsupported sample layout in {input_ref}"
            ))),
            None => Ok(format!("processed_{input_ref}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    scheduler: Scheduler,
    store: Arc<MemoryJobStore>,
    bus: Arc<ProgressBus>,
    backend: Arc<TestBackend>,
}

fn harness(backend: TestBackend, workers: usize) -> Harness {
    harness_with(backend, workers, EngineConfig::default())
}

fn harness_with(backend: TestBackend, workers: usize, mut config: EngineConfig) -> Harness {
    config.worker_count = workers;
    let store = Arc::new(MemoryJobStore::new());
    let backend = Arc::new(backend);
    let bus = Arc::new(ProgressBus::new(
        Arc::new(ProgressCache::new(Duration::from_secs(60))),
        Arc::new(SubscriptionRegistry::new()),
    ));
    let scheduler = Scheduler::new(store.clone(), backend.clone(), bus.clone(), config);
    Harness {
        scheduler,
        store,
        bus,
        backend,
    }
}

fn request(owner: OwnerId, inputs: &[&str]) -> EnqueueRequest {
    EnqueueRequest {
        owner_id: owner,
        tool_type: ToolType::AudioReverse,
        settings: serde_json::json!({}),
        input_refs: inputs.iter().map(|s| s.to_string()).collect(),
        priority: 5,
    }
}

async fn wait_for_status(store: &Arc<MemoryJobStore>, id: JobId, status: JobStatus) -> Job {
    for _ in 0..500 {
        let job = store.get(id).await.unwrap().unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            !(job.status.is_terminal() && job.status != status),
            "job reached terminal status {} while waiting for {status}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for job {id} to become {status}");
}

async fn drain(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressSnapshot>,
) -> Vec<ProgressSnapshot> {
    // Settle, then collect whatever was pushed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut snapshots = Vec::new();
    while let Ok(snapshot) = rx.try_recv() {
        snapshots.push(snapshot);
    }
    snapshots
}

// ---------------------------------------------------------------------------
// Completion path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_inputs_complete_with_formula_progress() {
    let h = harness(TestBackend::ok(), 1);
    let owner = Uuid::new_v4();

    let job = h
        .scheduler
        .enqueue(request(owner, &["a.wav", "b.wav", "c.wav"]))
        .await
        .unwrap();
    let (initial, _, mut rx) = h.bus.attach(job.id).await;
    assert!(initial.is_none());

    h.scheduler.start();
    let done = wait_for_status(&h.store, job.id, JobStatus::Completed).await;

    assert_eq!(done.progress, 100.0);
    assert!(done.completed_at.is_some());
    assert_eq!(
        done.output_refs,
        vec!["processed_a.wav", "processed_b.wav", "processed_c.wav"]
    );

    let snapshots = drain(&mut rx).await;
    let progresses: Vec<f32> = snapshots.iter().map(|s| s.progress).collect();
    assert_eq!(progresses, vec![0.0, 20.0, 40.0, 60.0, 100.0]);

    // Every snapshot is Processing except the final Completed one, and
    // total_steps is inputs + 2 throughout.
    for snapshot in &snapshots[..snapshots.len() - 1] {
        assert_eq!(snapshot.status, JobStatus::Processing);
        assert_eq!(snapshot.total_steps, 5);
    }
    let last = snapshots.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.current_step_num, last.total_steps);

    // Monotonic progress while processing.
    for pair in progresses.windows(2) {
        assert!(pair[1] >= pair[0]);
    }

    assert_eq!(h.backend.calls(), vec!["a.wav", "b.wav", "c.wav"]);
}

#[tokio::test]
async fn estimated_time_remaining_appears_after_first_step() {
    let h = harness(TestBackend::ok().with_delay(Duration::from_millis(20)), 1);
    let job = h
        .scheduler
        .enqueue(request(Uuid::new_v4(), &["a.wav", "b.wav"]))
        .await
        .unwrap();
    let (_, _, mut rx) = h.bus.attach(job.id).await;

    h.scheduler.start();
    wait_for_status(&h.store, job.id, JobStatus::Completed).await;

    let snapshots = drain(&mut rx).await;
    assert!(snapshots[0].estimated_time_remaining.is_none());
    let after_first = &snapshots[1];
    assert!(after_first.estimated_time_remaining.unwrap() > 0.0);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelling_a_pending_job_never_touches_the_backend() {
    // No workers started: the job stays pending.
    let h = harness(TestBackend::ok(), 1);
    let owner = Uuid::new_v4();
    let job = h.scheduler.enqueue(request(owner, &["a.wav"])).await.unwrap();
    assert_eq!(h.scheduler.queue_status().pending_count, 1);

    let outcome = h.scheduler.cancel(job.id, owner).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);
    assert_eq!(outcome.status_label(), "cancelled");

    let cancelled = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.progress, 0.0);
    assert!(cancelled.completed_at.is_some());

    assert!(h.backend.calls().is_empty());
    assert_eq!(h.scheduler.queue_status().pending_count, 0);

    // The cancellation is observable through the bus as well.
    let latest = h.bus.latest(job.id).await.unwrap();
    assert_eq!(latest.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_a_running_job_stops_between_steps() {
    let h = harness(TestBackend::ok().gated_on("slow.wav"), 1);
    let owner = Uuid::new_v4();
    let job = h
        .scheduler
        .enqueue(request(owner, &["slow.wav", "next.wav"]))
        .await
        .unwrap();

    h.scheduler.start();

    // Wait until the worker is inside the gated backend call.
    for _ in 0..500 {
        if !h.backend.calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.backend.calls(), vec!["slow.wav"]);

    let outcome = h.scheduler.cancel(job.id, owner).await.unwrap();
    assert_eq!(outcome, CancelOutcome::CancelRequested);

    // The in-flight step runs to its end; the signal is observed after it.
    h.backend.release(1);
    let cancelled = wait_for_status(&h.store, job.id, JobStatus::Cancelled).await;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(h.backend.calls(), vec!["slow.wav"]);
}

#[tokio::test]
async fn cancel_by_non_owner_is_forbidden() {
    let h = harness(TestBackend::ok(), 1);
    let owner = Uuid::new_v4();
    let job = h.scheduler.enqueue(request(owner, &["a.wav"])).await.unwrap();

    let err = h.scheduler.cancel(job.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));

    // Untouched.
    let unchanged = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, JobStatus::Pending);
}

#[tokio::test]
async fn cancel_of_unknown_job_is_not_found() {
    let h = harness(TestBackend::ok(), 1);
    let err = h
        .scheduler
        .cancel(Uuid::now_v7(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn cancel_after_completion_reports_the_terminal_status() {
    let h = harness(TestBackend::ok(), 1);
    let owner = Uuid::new_v4();
    let job = h.scheduler.enqueue(request(owner, &["a.wav"])).await.unwrap();

    h.scheduler.start();
    wait_for_status(&h.store, job.id, JobStatus::Completed).await;

    let outcome = h.scheduler.cancel(job.id, owner).await.unwrap();
    assert_eq!(outcome, CancelOutcome::AlreadyTerminal(JobStatus::Completed));
    assert_eq!(outcome.status_label(), "completed");
}

// ---------------------------------------------------------------------------
// Failure and retry policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn permanent_failure_mid_batch_fails_without_retry() {
    let h = harness(TestBackend::ok().failing("b.wav", u32::MAX, false), 1);
    let job = h
        .scheduler
        .enqueue(request(Uuid::new_v4(), &["a.wav", "b.wav", "c.wav"]))
        .await
        .unwrap();
    let (_, _, mut rx) = h.bus.attach(job.id).await;

    h.scheduler.start();
    let failed = wait_for_status(&h.store, job.id, JobStatus::Failed).await;

    let message = failed.error_message.unwrap();
    assert!(message.contains("b.wav"));

    // Exactly one attempt at the failing input, and the third is never tried.
    assert_eq!(h.backend.calls(), vec!["a.wav", "b.wav"]);

    let last = drain(&mut rx).await.pop().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert!(!last.message.is_empty());
}

#[tokio::test]
async fn transient_failure_before_first_step_retries_until_budget_exhausted() {
    let h = harness(TestBackend::ok().failing("a.wav", u32::MAX, true), 1);
    let job = h
        .scheduler
        .enqueue(request(Uuid::new_v4(), &["a.wav"]))
        .await
        .unwrap();

    h.scheduler.start();
    let failed = wait_for_status(&h.store, job.id, JobStatus::Failed).await;

    // Initial attempt plus max_retries re-admissions.
    assert_eq!(h.backend.calls().len(), 4);
    assert!(failed.error_message.unwrap().contains("unreachable"));
    assert!(h.store.queue_entry(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn transient_failure_recovers_on_a_later_attempt() {
    let h = harness(TestBackend::ok().failing("a.wav", 1, true), 1);
    let job = h
        .scheduler
        .enqueue(request(Uuid::new_v4(), &["a.wav"]))
        .await
        .unwrap();

    h.scheduler.start();
    let done = wait_for_status(&h.store, job.id, JobStatus::Completed).await;

    assert_eq!(h.backend.calls().len(), 2);
    assert_eq!(done.output_refs, vec!["processed_a.wav"]);
}

#[tokio::test]
async fn transient_failure_after_a_completed_step_is_not_retried() {
    let h = harness(TestBackend::ok().failing("b.wav", 1, true), 1);
    let job = h
        .scheduler
        .enqueue(request(Uuid::new_v4(), &["a.wav", "b.wav"]))
        .await
        .unwrap();

    h.scheduler.start();
    let failed = wait_for_status(&h.store, job.id, JobStatus::Failed).await;

    // Partial progress is not replayed: one attempt each, then failure.
    assert_eq!(h.backend.calls(), vec!["a.wav", "b.wav"]);
    assert!(failed.error_message.is_some());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_jobs_do_not_cross_contaminate_snapshots() {
    let h = harness(TestBackend::ok().with_delay(Duration::from_millis(5)), 2);
    let owner = Uuid::new_v4();

    let job_a = h
        .scheduler
        .enqueue(request(owner, &["a1.wav", "a2.wav"]))
        .await
        .unwrap();
    let job_b = h
        .scheduler
        .enqueue(request(owner, &["b1.wav", "b2.wav"]))
        .await
        .unwrap();

    let (_, _, mut rx_a) = h.bus.attach(job_a.id).await;
    let (_, _, mut rx_b) = h.bus.attach(job_b.id).await;

    h.scheduler.start();
    wait_for_status(&h.store, job_a.id, JobStatus::Completed).await;
    wait_for_status(&h.store, job_b.id, JobStatus::Completed).await;

    let snapshots_a = drain(&mut rx_a).await;
    let snapshots_b = drain(&mut rx_b).await;

    // init + 2 files + finalize each, all carrying their own job id.
    assert_eq!(snapshots_a.len(), 4);
    assert_eq!(snapshots_b.len(), 4);
    assert!(snapshots_a.iter().all(|s| s.job_id == job_a.id));
    assert!(snapshots_b.iter().all(|s| s.job_id == job_b.id));
}

#[tokio::test]
async fn queue_status_reflects_a_saturated_pool() {
    let h = harness(TestBackend::ok().gated_on("x.wav"), 2);
    let owner = Uuid::new_v4();
    for _ in 0..5 {
        h.scheduler.enqueue(request(owner, &["x.wav"])).await.unwrap();
    }

    h.scheduler.start();

    // Both workers pick up a job and block inside the backend.
    for _ in 0..500 {
        if h.scheduler.queue_status().active_count == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let status = h.scheduler.queue_status();
    assert_eq!(status.active_count, 2);
    assert_eq!(status.pending_count, 3);
    assert_eq!(status.worker_count, 2);
}

#[tokio::test]
async fn a_single_worker_drains_by_priority_then_fifo() {
    let h = harness(TestBackend::ok(), 1);
    let owner = Uuid::new_v4();

    let mut req = request(owner, &["low.wav"]);
    req.priority = 9;
    let low = h.scheduler.enqueue(req).await.unwrap();

    let mut req = request(owner, &["urgent.wav"]);
    req.priority = 1;
    h.scheduler.enqueue(req).await.unwrap();

    let mut req = request(owner, &["mid.wav"]);
    req.priority = 5;
    h.scheduler.enqueue(req).await.unwrap();

    h.scheduler.start();
    // The lowest-urgency job runs last; once it is done all three are.
    wait_for_status(&h.store, low.id, JobStatus::Completed).await;

    // All three are done; dispatch order followed the priority values.
    let calls = h.backend.calls();
    assert_eq!(calls[0], "urgent.wav");
    assert_eq!(calls[1], "mid.wav");
    assert_eq!(calls[2], "low.wav");
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hard_deadline_force_fails_a_stuck_job() {
    let config = EngineConfig {
        soft_timeout: Duration::from_secs(60),
        hard_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let h = harness_with(
        TestBackend::ok().with_delay(Duration::from_secs(30)),
        1,
        config,
    );
    let job = h
        .scheduler
        .enqueue(request(Uuid::new_v4(), &["a.wav"]))
        .await
        .unwrap();

    h.scheduler.start();
    let failed = wait_for_status(&h.store, job.id, JobStatus::Failed).await;
    assert!(failed.error_message.unwrap().contains("hard deadline"));
}

#[tokio::test]
async fn soft_deadline_cancels_between_steps() {
    let config = EngineConfig {
        soft_timeout: Duration::from_millis(30),
        hard_timeout: Duration::from_secs(60),
        ..Default::default()
    };
    let h = harness_with(
        TestBackend::ok().with_delay(Duration::from_millis(80)),
        1,
        config,
    );
    let job = h
        .scheduler
        .enqueue(request(Uuid::new_v4(), &["a.wav", "b.wav"]))
        .await
        .unwrap();
    let (_, _, mut rx) = h.bus.attach(job.id).await;

    h.scheduler.start();
    wait_for_status(&h.store, job.id, JobStatus::Cancelled).await;

    // The first step ran, the second never started.
    assert_eq!(h.backend.calls(), vec!["a.wav"]);
    let last = drain(&mut rx).await.pop().unwrap();
    assert_eq!(last.status, JobStatus::Cancelled);
    assert!(last.message.contains("soft deadline"));
}

// ---------------------------------------------------------------------------
// Admission and recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_without_inputs_is_rejected_synchronously() {
    let h = harness(TestBackend::ok(), 1);
    let err = h
        .scheduler
        .enqueue(request(Uuid::new_v4(), &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(h.scheduler.queue_status().pending_count, 0);
}

#[tokio::test]
async fn recovery_readmits_interrupted_jobs_with_retry_budget() {
    let h = harness(TestBackend::ok(), 1);

    // Simulate a job that a previous process claimed and then abandoned.
    let job = h
        .store
        .create(resona_core::job::NewJob {
            owner_id: Uuid::new_v4(),
            tool_type: ToolType::AudioReverse,
            settings: serde_json::json!({}),
            input_refs: vec!["a.wav".into()],
            priority: 5,
        })
        .await
        .unwrap();
    h.store.mark_started(job.id).await.unwrap();
    h.store
        .update_progress(job.id, 0.0, Some(JobStatus::Processing))
        .await
        .unwrap();

    h.scheduler.recover().await.unwrap();
    assert_eq!(h.scheduler.queue_status().pending_count, 1);
    let entry = h.store.queue_entry(job.id).await.unwrap().unwrap();
    assert_eq!(entry.retry_count, 1);

    h.scheduler.start();
    wait_for_status(&h.store, job.id, JobStatus::Completed).await;
}

#[tokio::test]
async fn recovery_fails_jobs_with_exhausted_retry_budget() {
    let h = harness(TestBackend::ok(), 1);

    let job = h
        .store
        .create(resona_core::job::NewJob {
            owner_id: Uuid::new_v4(),
            tool_type: ToolType::AudioReverse,
            settings: serde_json::json!({}),
            input_refs: vec!["a.wav".into()],
            priority: 5,
        })
        .await
        .unwrap();
    for _ in 0..3 {
        h.store.record_retry(job.id).await.unwrap();
    }
    h.store.mark_started(job.id).await.unwrap();
    h.store
        .update_progress(job.id, 0.0, Some(JobStatus::Processing))
        .await
        .unwrap();

    h.scheduler.recover().await.unwrap();

    let failed = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("No progress after restart")
    );
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn recovery_readmits_never_started_entries_without_retry_cost() {
    let h = harness(TestBackend::ok(), 1);

    let job = h
        .store
        .create(resona_core::job::NewJob {
            owner_id: Uuid::new_v4(),
            tool_type: ToolType::AudioReverse,
            settings: serde_json::json!({}),
            input_refs: vec!["a.wav".into()],
            priority: 5,
        })
        .await
        .unwrap();

    h.scheduler.recover().await.unwrap();
    assert_eq!(h.scheduler.queue_status().pending_count, 1);
    let entry = h.store.queue_entry(job.id).await.unwrap().unwrap();
    assert_eq!(entry.retry_count, 0);

    h.scheduler.start();
    wait_for_status(&h.store, job.id, JobStatus::Completed).await;
}
