//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] linerpc_protocol::ProtocolError),

    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    /// The server answered with an `error` response.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
