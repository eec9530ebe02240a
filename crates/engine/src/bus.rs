//! Single integration point for progress propagation.

use std::sync::Arc;

use tokio::sync::mpsc;

use resona_core::progress::ProgressSnapshot;
use resona_core::types::JobId;

use crate::cache::ProgressCache;
use crate::registry::{SubscriberId, SubscriptionRegistry};

/// Writes the progress cache and fans out to live subscribers.
///
/// The cache write strictly precedes the push attempt, so a concurrent poll
/// reader observes the update even when push delivery fails. Per-job
/// snapshot order is whatever the single owning worker publishes; nothing is
/// guaranteed across jobs or across subscribers.
pub struct ProgressBus {
    cache: Arc<ProgressCache>,
    registry: Arc<SubscriptionRegistry>,
}

impl ProgressBus {
    pub fn new(cache: Arc<ProgressCache>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { cache, registry }
    }

    /// Publish a snapshot: cache first, then best-effort push.
    pub async fn publish(&self, snapshot: ProgressSnapshot) {
        self.cache.insert(snapshot.clone()).await;
        self.registry.push(&snapshot).await;
    }

    /// Latest cached snapshot for a job, if any.
    pub async fn latest(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        self.cache.get(job_id).await
    }

    /// Attach a live subscriber to a job.
    ///
    /// If a snapshot is already cached it is returned for immediate delivery,
    /// so a late attacher starts from the current state rather than silence.
    pub async fn attach(
        &self,
        job_id: JobId,
    ) -> (
        Option<ProgressSnapshot>,
        SubscriberId,
        mpsc::UnboundedReceiver<ProgressSnapshot>,
    ) {
        let (subscriber_id, rx) = self.registry.attach(job_id).await;
        let initial = self.cache.get(job_id).await;
        (initial, subscriber_id, rx)
    }

    pub async fn detach(&self, job_id: JobId, subscriber_id: SubscriberId) {
        self.registry.detach(job_id, subscriber_id).await;
    }

    pub async fn subscriber_count(&self, job_id: JobId) -> usize {
        self.registry.subscriber_count(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use resona_core::status::JobStatus;

    fn bus() -> ProgressBus {
        ProgressBus::new(
            Arc::new(ProgressCache::new(Duration::from_secs(60))),
            Arc::new(SubscriptionRegistry::new()),
        )
    }

    fn snapshot(job_id: JobId, progress: f32) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id,
            progress,
            status: JobStatus::Processing,
            message: String::new(),
            current_step: "Processing".into(),
            current_step_num: 2,
            total_steps: 3,
            estimated_time_remaining: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_is_readable_via_latest_even_without_subscribers() {
        let bus = bus();
        let job = uuid::Uuid::now_v7();

        bus.publish(snapshot(job, 33.33)).await;

        assert_eq!(bus.latest(job).await.unwrap().progress, 33.33);
    }

    #[tokio::test]
    async fn attach_delivers_cached_snapshot_then_live_pushes() {
        let bus = bus();
        let job = uuid::Uuid::now_v7();

        bus.publish(snapshot(job, 20.0)).await;

        let (initial, _, mut rx) = bus.attach(job).await;
        assert_eq!(initial.unwrap().progress, 20.0);

        bus.publish(snapshot(job, 40.0)).await;
        assert_eq!(rx.recv().await.unwrap().progress, 40.0);
    }

    #[tokio::test]
    async fn detach_stops_delivery() {
        let bus = bus();
        let job = uuid::Uuid::now_v7();

        let (_, id, mut rx) = bus.attach(job).await;
        bus.detach(job, id).await;

        bus.publish(snapshot(job, 60.0)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(job).await, 0);
    }
}
