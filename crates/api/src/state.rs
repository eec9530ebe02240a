use std::sync::Arc;

use resona_core::store::JobStore;
use resona_engine::{ProgressBus, Scheduler};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Job admission, dispatch and cancellation.
    pub scheduler: Scheduler,
    /// Progress cache reads and WebSocket subscription management.
    pub bus: Arc<ProgressBus>,
    /// Durable job records (status and history reads).
    pub store: Arc<dyn JobStore>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
