//! Error types for the room session client.

use std::fmt;

use thiserror::Error;

/// Errors that can occur when using the room session client.
///
/// Only caller-ordering and validation problems are returned directly from
/// [`RoomSession`](crate::RoomSession) methods. Failures of a join attempt
/// (unreachable server, server rejection, lost connection) surface through
/// [`SessionState::Failed`](crate::SessionState::Failed) instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The signaling endpoint could not be reached or the handshake failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// The base server address is malformed.
    #[error("invalid server address: {0}")]
    InvalidEndpoint(String),

    /// The room intent or chat text was rejected before reaching the server.
    #[error("invalid request: {0}")]
    InvalidIntent(String),

    /// Attempted a room operation but the session is not active.
    #[error("not in an active room")]
    NotActive,

    /// A join/create attempt is already in flight or a room is active.
    #[error("a room session is already in progress")]
    SessionBusy,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted settings could not be interpreted.
    #[error("configuration error: {0}")]
    Config(String),
}

/// A specialized [`Result`] type for room session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Why a join/create attempt or an active session ended.
///
/// Carried by [`SessionState::Failed`](crate::SessionState::Failed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The endpoint was unreachable or the handshake failed.
    Connect(String),
    /// The server rejected the request; the message is the server's, verbatim.
    Server(String),
    /// The transport closed without the caller leaving the room.
    ConnectionLost(Option<String>),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(detail) => write!(f, "could not connect: {detail}"),
            Self::Server(message) => f.write_str(message),
            Self::ConnectionLost(Some(detail)) => write!(f, "connection lost: {detail}"),
            Self::ConnectionLost(None) => f.write_str("connection lost"),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn server_reason_is_displayed_verbatim() {
        let reason = FailureReason::Server("wrong password".into());
        assert_eq!(reason.to_string(), "wrong password");
    }

    #[test]
    fn connection_lost_without_detail() {
        assert_eq!(
            FailureReason::ConnectionLost(None).to_string(),
            "connection lost"
        );
    }

    #[test]
    fn serde_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SessionError = err.into();
        assert!(matches!(err, SessionError::Serialization(_)));
    }
}
