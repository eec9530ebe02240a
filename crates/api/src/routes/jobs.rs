//! Route definitions for the `/jobs` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;
use crate::ws;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                 -> list_jobs
/// POST   /                 -> submit_job
/// GET    /{id}             -> get_job
/// GET    /{id}/progress    -> job_progress
/// DELETE /{id}             -> cancel_job
/// GET    /{id}/ws          -> progress WebSocket
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/{id}/progress", get(jobs::job_progress))
        .route("/{id}/ws", get(ws::job_progress_ws))
}
