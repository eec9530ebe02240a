//! Handlers for the `/jobs` resource.
//!
//! Identity is caller-supplied: every request names the `owner_id` it acts
//! for, and ownership checks gate cancellation. Processing failures are
//! never surfaced here; they are observable only through the job record and
//! the progress channel.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use resona_core::error::CoreError;
use resona_core::job::DEFAULT_PRIORITY;
use resona_core::tool::ToolType;
use resona_core::types::JobId;
use resona_engine::EnqueueRequest;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Request body for `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    pub owner_id: Uuid,
    /// Tool name in wire form, e.g. `"vocal_remover"`.
    pub tool_type: String,
    /// Opaque tool settings, passed through to the processing backend.
    #[serde(default = "empty_settings")]
    pub settings: serde_json::Value,
    #[validate(length(min = 1, max = 64))]
    pub input_refs: Vec<String>,
    /// Lower runs sooner; defaults to the mid-range value.
    #[validate(range(min = 0, max = 9))]
    pub priority: Option<i32>,
}

fn empty_settings() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub owner_id: Uuid,
    /// Maximum number of results. Defaults to 50.
    pub limit: Option<i64>,
}

/// Query parameters for `DELETE /api/v1/jobs/{id}`.
#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub owner_id: Uuid,
}

/// Response body for `DELETE /api/v1/jobs/{id}`.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// `"cancelled"`, or the terminal status the job had already reached.
    pub status: &'static str,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Enqueue a new processing job. Returns 201 with the created job; execution
/// happens asynchronously on the worker pool.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;

    let tool_type: ToolType = input
        .tool_type
        .parse()
        .map_err(AppError::Core)?;

    let job = state
        .scheduler
        .enqueue(EnqueueRequest {
            owner_id: input.owner_id,
            tool_type,
            settings: input.settings,
            input_refs: input.input_refs,
            priority: input.priority.unwrap_or(DEFAULT_PRIORITY),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs?owner_id=...&limit=...
///
/// The caller's job history, most recent first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .store
        .list_by_owner(params.owner_id, params.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .store
        .get(job_id)
        .await?
        .ok_or_else(|| CoreError::job_not_found(job_id))?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/progress
///
/// Latest progress snapshot from the cache. 404 when no snapshot is cached;
/// the caller should fall back to `GET /jobs/{id}` for coarse status.
pub async fn job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state
        .bus
        .latest(job_id)
        .await
        .ok_or(CoreError::NotFound {
            entity: "Progress",
            id: job_id,
        })?;
    Ok(Json(DataResponse { data: snapshot }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{id}?owner_id=...
///
/// Cancel a pending or running job. Cancellation is always acknowledged; if
/// the job already finished, the response carries the terminal status it
/// reached instead.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Query(params): Query<CancelQuery>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.scheduler.cancel(job_id, params.owner_id).await?;

    tracing::info!(job_id = %job_id, outcome = ?outcome, "Cancellation handled");

    Ok(Json(DataResponse {
        data: CancelResponse {
            status: outcome.status_label(),
        },
    }))
}
