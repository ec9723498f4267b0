//! Progress protocol between worker and gateway.
//!
//! The worker serializes a [`ProgressReport`] into the task's result slot
//! on the queue backend; the gateway reads the latest one back when it
//! maps a task's status. Only the last write is kept.
//!
//! The JSON shape (`{"percentage": 10, "message": "..."}`) is the wire
//! contract between the two processes and must not change.

use serde::{Deserialize, Serialize};

/// Lowest reportable percentage.
pub const MIN_PERCENTAGE: i32 = 0;

/// Highest reportable percentage.
pub const MAX_PERCENTAGE: i32 = 100;

/// A worker's self-reported completion state for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub percentage: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ProgressReport {
    /// Build a report, clamping the percentage into `0..=100`.
    pub fn new(percentage: i32, message: impl Into<String>) -> Self {
        Self {
            percentage: percentage.clamp(MIN_PERCENTAGE, MAX_PERCENTAGE),
            message: message.into(),
        }
    }

    /// Serialize to the bytes stored in the result slot.
    pub fn to_bytes(&self) -> Vec<u8> {
        // A struct of an integer and a string cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a stored result slot. Returns `None` for empty or foreign data.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        serde_json::from_slice(bytes).ok()
    }
}
