//! Progress snapshots and the step-to-percentage arithmetic.

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;
use crate::types::{JobId, Timestamp};

/// The latest known progress detail for one job.
///
/// Snapshots are ephemeral: they live in the progress cache with a bounded
/// TTL and are pushed to live subscribers. The durable job record remains
/// authoritative for status when no snapshot is cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub progress: f32,
    pub status: JobStatus,
    pub message: String,
    /// Human-readable label of the step in flight (e.g. `"Initializing"`,
    /// `"Processing track2.wav"`).
    pub current_step: String,
    /// 1-based step counter; reaches `total_steps` exactly on completion.
    pub current_step_num: u32,
    pub total_steps: u32,
    /// Seconds, derived from elapsed time per completed step; absent until at
    /// least one input step has finished.
    pub estimated_time_remaining: Option<f64>,
    pub updated_at: Timestamp,
}

/// Percentage for `steps_done` completed steps out of `total_steps`.
///
/// Rounded to two decimals so the same step count always serializes to the
/// same value regardless of float noise upstream.
pub fn step_progress(steps_done: u32, total_steps: u32) -> f32 {
    if total_steps == 0 {
        return 0.0;
    }
    let raw = steps_done as f64 / total_steps as f64 * 100.0;
    (raw * 100.0).round() as f32 / 100.0
}

/// Estimated seconds remaining given elapsed seconds and step counts.
///
/// Returns `None` until at least one step has completed, since there is no
/// basis for a rate before that.
pub fn estimate_remaining_secs(elapsed_secs: f64, steps_done: u32, total_steps: u32) -> Option<f64> {
    if steps_done == 0 || total_steps <= steps_done {
        return None;
    }
    let per_step = elapsed_secs / steps_done as f64;
    Some(per_step * (total_steps - steps_done) as f64)
}
