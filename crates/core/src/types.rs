/// Job identifiers are UUIDv7 so they sort by creation time.
pub type JobId = uuid::Uuid;

/// Owner identity is caller-supplied and opaque to this service.
pub type OwnerId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
