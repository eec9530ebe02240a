//! The job entity and its creation payload.

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;
use crate::tool::ToolType;
use crate::types::{JobId, OwnerId, Timestamp};

/// Default dispatch priority; lower values run sooner.
pub const DEFAULT_PRIORITY: i32 = 5;

/// One durable unit of requested audio work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub tool_type: ToolType,
    /// Opaque tool configuration, passed through to the processing backend.
    pub settings: serde_json::Value,
    /// Ordered input file references; processed in order.
    pub input_refs: Vec<String>,
    /// Output file references, filled in when the job completes.
    pub output_refs: Vec<String>,
    pub status: JobStatus,
    /// Percentage in `0.0..=100.0`; non-decreasing while processing.
    pub progress: f32,
    pub error_message: Option<String>,
    pub priority: i32,
    pub created_at: Timestamp,
    /// Set exactly when `status` becomes terminal.
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// Total number of execution steps for this job: one per input plus the
    /// init and finalize bookends.
    pub fn total_steps(&self) -> u32 {
        self.input_refs.len() as u32 + 2
    }
}

/// Payload for creating a job. Validation (tool/input coherence, priority
/// range) happens at admission, before this reaches a store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: OwnerId,
    pub tool_type: ToolType,
    pub settings: serde_json::Value,
    pub input_refs: Vec<String>,
    pub priority: i32,
}
