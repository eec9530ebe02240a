//! Live observer connections grouped by job.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use resona_core::progress::ProgressSnapshot;
use resona_core::types::JobId;

/// Identifies one subscription within the registry.
pub type SubscriberId = Uuid;

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<ProgressSnapshot>,
}

/// Tracks live subscriptions per job and prunes dead ones.
///
/// The registry is the sole owner of subscriptions: they are created on
/// attach and destroyed on detach, disconnect (receiver dropped), or a
/// failed push. Safe for concurrent attach/detach/push from independent
/// tasks; designed to be shared via `Arc`.
pub struct SubscriptionRegistry {
    subscribers: RwLock<HashMap<JobId, Vec<Subscriber>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new subscription for a job.
    ///
    /// Returns the subscriber id (for detach) and the receiver half the
    /// transport layer forwards messages from.
    pub async fn attach(
        &self,
        job_id: JobId,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<ProgressSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers
            .write()
            .await
            .entry(job_id)
            .or_default()
            .push(Subscriber { id, sender: tx });
        (id, rx)
    }

    /// Remove one subscription; empty per-job groups are dropped entirely.
    pub async fn detach(&self, job_id: JobId, subscriber_id: SubscriberId) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(group) = subscribers.get_mut(&job_id) {
            group.retain(|s| s.id != subscriber_id);
            if group.is_empty() {
                subscribers.remove(&job_id);
            }
        }
    }

    /// Best-effort push to every live subscriber of the snapshot's job.
    ///
    /// At most once per subscriber, no retry: a failed send means the
    /// receiver is gone, and that subscription is detached on the spot.
    pub async fn push(&self, snapshot: &ProgressSnapshot) {
        let mut subscribers = self.subscribers.write().await;
        let Some(group) = subscribers.get_mut(&snapshot.job_id) else {
            return;
        };
        group.retain(|s| s.sender.send(snapshot.clone()).is_ok());
        if group.is_empty() {
            subscribers.remove(&snapshot.job_id);
        }
    }

    /// Number of live subscriptions for a job.
    pub async fn subscriber_count(&self, job_id: JobId) -> usize {
        self.subscribers
            .read()
            .await
            .get(&job_id)
            .map_or(0, Vec::len)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
