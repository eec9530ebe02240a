//! Short-lived cache of the latest progress snapshot per job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use resona_core::progress::ProgressSnapshot;
use resona_core::types::JobId;

/// How often the sweeper task evicts expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Last-write-wins snapshot cache with a bounded TTL per entry.
///
/// Independent of the durable job store: an entry may be absent for an
/// existing job (never started, or evicted), in which case the store remains
/// authoritative for coarse status.
pub struct ProgressCache {
    entries: RwLock<HashMap<JobId, (ProgressSnapshot, Instant)>>,
    ttl: Duration,
}

impl ProgressCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Overwrite the snapshot for a job and refresh its TTL.
    pub async fn insert(&self, snapshot: ProgressSnapshot) {
        let mut entries = self.entries.write().await;
        entries.insert(snapshot.job_id, (snapshot, Instant::now()));
    }

    /// Latest snapshot for a job, if present and not expired.
    pub async fn get(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        let entries = self.entries.read().await;
        let (snapshot, written_at) = entries.get(&job_id)?;
        if written_at.elapsed() > self.ttl {
            return None;
        }
        Some(snapshot.clone())
    }

    /// Drop expired entries; returns how many were evicted.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, written_at)| written_at.elapsed() <= self.ttl);
        before - entries.len()
    }

    /// Spawn the periodic eviction task; runs until `cancel` is triggered.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.purge_expired().await;
                        if evicted > 0 {
                            tracing::debug!(evicted, "Expired progress snapshots evicted");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resona_core::status::JobStatus;

    fn snapshot(job_id: JobId, progress: f32) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id,
            progress,
            status: JobStatus::Processing,
            message: String::new(),
            current_step: "Initializing".into(),
            current_step_num: 1,
            total_steps: 3,
            estimated_time_remaining: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_overwrites_previous_snapshot() {
        let cache = ProgressCache::new(Duration::from_secs(60));
        let id = uuid::Uuid::now_v7();

        cache.insert(snapshot(id, 20.0)).await;
        cache.insert(snapshot(id, 40.0)).await;

        let latest = cache.get(id).await.unwrap();
        assert_eq!(latest.progress, 40.0);
    }

    #[tokio::test]
    async fn missing_job_reads_absent() {
        let cache = ProgressCache::new(Duration::from_secs(60));
        assert!(cache.get(uuid::Uuid::now_v7()).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_purgeable() {
        let cache = ProgressCache::new(Duration::from_millis(10));
        let id = uuid::Uuid::now_v7();
        cache.insert(snapshot(id, 20.0)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get(id).await.is_none());
        assert_eq!(cache.purge_expired().await, 1);
    }
}
