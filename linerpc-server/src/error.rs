//! Server error types.

use thiserror::Error;

/// Server errors.
///
/// None of these reach a peer as a response frame: request-level failures
/// are reported through [`DispatchError`](crate::dispatcher::DispatchError).
/// A `ServerError` ends the connection it occurred on, or startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] linerpc_protocol::ProtocolError),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the connection simply went away, either because the
    /// peer dropped it mid-exchange or because the server is stopping.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ServerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            ServerError::Http(e) => e.is_incomplete_message(),
            ServerError::ShuttingDown => true,
            ServerError::Protocol(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_is_disconnect() {
        let err = ServerError::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(err.is_disconnect());

        let err = ServerError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_disconnect());

        assert!(ServerError::ShuttingDown.is_disconnect());

        let err = ServerError::Protocol(linerpc_protocol::ProtocolError::InvalidUtf8);
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_display() {
        assert_eq!(ServerError::ShuttingDown.to_string(), "server shutting down");
        let err = ServerError::Protocol(linerpc_protocol::ProtocolError::InvalidUtf8);
        assert!(err.to_string().starts_with("protocol error"));
    }
}
