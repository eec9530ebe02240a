//! Per-job WebSocket progress push.
//!
//! On attach the connection immediately receives the cached snapshot for its
//! job if one exists, then one message per published update. Clients may
//! send a `ping` text frame as an idle heartbeat and get `pong` back; client
//! silence is never treated as cancellation. Delivery is best-effort - a
//! client that needs certainty polls `GET /jobs/{id}/progress`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use resona_core::job_events::{HEARTBEAT_PING, HEARTBEAT_PONG, MSG_TYPE_PROGRESS_UPDATE};
use resona_core::progress::ProgressSnapshot;
use resona_core::types::JobId;

use crate::state::AppState;

/// GET /api/v1/jobs/{id}/ws
pub async fn job_progress_ws(
    ws: WebSocketUpgrade,
    Path(job_id): Path<JobId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, job_id))
}

/// Manage one subscription for the lifetime of its socket.
async fn handle_socket(socket: WebSocket, state: AppState, job_id: JobId) {
    let (initial, subscriber_id, mut updates) = state.bus.attach(job_id).await;
    tracing::info!(job_id = %job_id, subscriber_id = %subscriber_id, "Progress subscriber attached");

    let (mut sink, mut stream) = socket.split();

    if let Some(snapshot) = initial {
        if sink.send(push_frame(&snapshot)).await.is_err() {
            state.bus.detach(job_id, subscriber_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(snapshot) => {
                    if sink.send(push_frame(&snapshot)).await.is_err() {
                        break;
                    }
                }
                // Registry dropped the sender (detached elsewhere).
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) if text.as_str() == HEARTBEAT_PING => {
                    if sink.send(Message::Text(HEARTBEAT_PONG.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(job_id = %job_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    state.bus.detach(job_id, subscriber_id).await;
    tracing::info!(job_id = %job_id, subscriber_id = %subscriber_id, "Progress subscriber detached");
}

/// Serialize a snapshot into the push message format.
fn push_frame(snapshot: &ProgressSnapshot) -> Message {
    let payload = serde_json::json!({
        "type": MSG_TYPE_PROGRESS_UPDATE,
        "job_id": snapshot.job_id,
        "progress": snapshot.progress,
        "status": snapshot.status,
        "message": snapshot.message,
        "current_step": snapshot.current_step,
        "current_step_num": snapshot.current_step_num,
        "total_steps": snapshot.total_steps,
        "estimated_time_remaining": snapshot.estimated_time_remaining,
        "timestamp": snapshot.updated_at,
    });
    Message::Text(payload.to_string().into())
}
