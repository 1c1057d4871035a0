//! Notification records and the live-channel frame decoder.
//!
//! Every server-to-client frame on the live channel is one JSON-encoded
//! [`NotificationRecord`]. There is no envelope and no batching.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single notification as seen by the client.
///
/// `id` is server-assigned and stable across updates. Only `is_read` is ever
/// mutated client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: i64,
    pub title: String,
    pub contents: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub warn_level: u8,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Check the constraints serde cannot express.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.id < 0 {
            return Err(FrameError::Schema(format!(
                "id must be non-negative, got {}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Why a frame could not be turned into a [`NotificationRecord`].
#[derive(Debug)]
pub enum FrameError {
    /// The frame is not valid JSON, or a required field is missing or mistyped.
    Malformed(serde_json::Error),
    /// The frame parsed but violates a record constraint.
    Schema(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Malformed(err) => write!(f, "malformed frame: {err}"),
            FrameError::Schema(msg) => write!(f, "invalid frame: {msg}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Malformed(err) => Some(err),
            FrameError::Schema(_) => None,
        }
    }
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::Malformed(err)
    }
}

/// Decode and validate one text frame.
pub fn decode_frame(text: &str) -> Result<NotificationRecord, FrameError> {
    let record: NotificationRecord = serde_json::from_str(text)?;
    record.validate()?;
    Ok(record)
}
