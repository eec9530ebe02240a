//! WebSocket message type constants for the job progress push channel.

/// Progress update pushed on every publish for a subscribed job.
pub const MSG_TYPE_PROGRESS_UPDATE: &str = "progress_update";

/// Client-initiated idle heartbeat text frame.
pub const HEARTBEAT_PING: &str = "ping";

/// Server acknowledgment of a client heartbeat.
pub const HEARTBEAT_PONG: &str = "pong";
