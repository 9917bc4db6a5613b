//! Transport abstraction for the room signaling protocol.
//!
//! The [`Transport`] trait is a bidirectional channel of text frames between
//! the client and the signaling server. Every frame is one complete JSON
//! object, so implementations handle framing themselves (WebSocket frames in
//! the default [`WebSocketTransport`](crate::transports::WebSocketTransport)).
//!
//! A [`Connector`] opens a transport for an endpoint string. The session
//! controller only ever talks to a `Connector`, which keeps connection setup
//! swappable in tests and for alternative transports.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use room_session_client::error::SessionError;
//! use room_session_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SessionError> {
//!         // Send the JSON text frame over your transport
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         // Receive the next JSON text frame
//!         // Return None when the connection is closed cleanly
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         unimplemented!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, SessionError> {
//!         let _ = endpoint;
//!         Ok(Box::new(MyTransport {}))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;

/// A bidirectional text frame transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame
/// and each call to [`recv`](Transport::recv) returns one.
///
/// # Object Safety
///
/// This trait is object-safe; connectors hand out `Box<dyn Transport>`.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the connection
/// loop polls it inside `tokio::select!`. Cancelling it and calling it again
/// must not lose a frame.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] or
    /// [`SessionError::TransportClosed`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SessionError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the server closed the connection cleanly
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations still
    /// release their resources in that case.
    async fn close(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        (**self).close().await
    }
}

/// Opens a ready [`Transport`] to a signaling endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `endpoint` (for example `wss://host/ws`) and return a
    /// transport on which the handshake has completed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] if the endpoint is unreachable or
    /// the handshake fails.
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, SessionError>;
}
