//! Error types for event decoding.

use thiserror::Error;

/// Errors that can occur while decoding a raw runtime event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The bytes were not a JSON object of the expected shape.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// The event carried neither an action nor a legacy status field.
    #[error("event has no action")]
    MissingAction,

    /// The event timestamp is outside the representable range.
    #[error("invalid event timestamp: {0}")]
    InvalidTimestamp(i64),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Malformed(err.to_string())
    }
}
