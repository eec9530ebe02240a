//! Queue observability handlers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Response for GET /queue/status.
#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub pending_count: usize,
    pub active_count: usize,
    pub worker_count: usize,
}

/// GET /api/v1/queue/status
///
/// Point-in-time queue counters. Observability only; numbers can be stale
/// by the time the response is read.
pub async fn get_queue_status(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let status = state.scheduler.queue_status();
    Ok(Json(DataResponse {
        data: QueueStatusResponse {
            pending_count: status.pending_count,
            active_count: status.active_count,
            worker_count: status.worker_count,
        },
    }))
}
