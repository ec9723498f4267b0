/// Opaque task identifier assigned by the queue backend at enqueue time.
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
