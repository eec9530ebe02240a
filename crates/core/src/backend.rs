//! Processing backend contract.
//!
//! A backend turns one input reference into one output reference according
//! to the job's tool and settings. Failures carry a transient/permanent
//! classification so the worker can apply the retry policy without
//! inspecting error internals.

use async_trait::async_trait;

use crate::tool::ToolType;

/// A classified processing failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
    /// Infrastructure trouble (backend unreachable, timed out before doing
    /// work). Eligible for automatic retry while no step of the job has
    /// completed yet.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// The work itself failed (bad input, unsupported settings, tool error).
    /// Never retried automatically.
    #[error("processing failed: {0}")]
    Permanent(String),
}

impl ProcessError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProcessError::Transient(msg) | ProcessError::Permanent(msg) => msg,
        }
    }
}

/// Executes the actual audio transformation for a single input file.
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    /// Process one input reference, returning the output reference.
    async fn process(
        &self,
        tool: ToolType,
        settings: &serde_json::Value,
        input_ref: &str,
    ) -> Result<String, ProcessError>;
}
