//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while decoding a frame into a request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field '{field}': expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

impl ProtocolError {
    /// Returns whether the payload failed to parse at all, as opposed to
    /// parsing into something that is not a valid request.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::Json(_) | ProtocolError::InvalidUtf8 | ProtocolError::NotAnObject(_)
        )
    }
}
