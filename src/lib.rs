//! # Room Session Client
//!
//! Async client for creating, joining and chatting in rooms on a signaling
//! server that speaks JSON text frames over WebSocket.
//!
//! A [`RoomSession`] turns a [`RoomIntent`] into a join/create request,
//! follows the server's answers through a small state machine
//! ([`SessionMachine`]) and keeps a de-duplicated chat history
//! ([`MessageLog`]) for the active room. Its [`SessionState`] is published on
//! a `watch` channel for whatever presentation layer sits on top.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any backend
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   `WebSocketTransport` and `WebSocketConnector`
//! - **Sans-IO core**: [`SessionMachine`] can be driven and tested without a network
//! - **Helper process bridge**: [`ProcessBridge`] for deployments that create
//!   rooms through an external program
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use room_session_client::{RoomIntent, RoomSession, SessionConfig, SessionState};
//!
//! # async fn run() -> room_session_client::Result<()> {
//! let config = SessionConfig::from_base_url("http://localhost:5000")?;
//! let mut session = RoomSession::websocket(config);
//!
//! session.submit(RoomIntent::create("alice")).await?;
//! if let SessionState::Active { room_code, .. } = session.wait_for_settled().await {
//!     println!("share this code: {room_code}");
//!     session.send_chat("hello").await?;
//! }
//! session.leave().await;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bridge;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod intent;
pub mod machine;
pub mod message_log;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use bridge::{BridgeRequest, BridgeResponse, ProcessBridge, RoomBridge};
pub use config::{ClientSettings, SessionConfig};
pub use connection::{ConnectionEvent, SignalingConnection};
pub use endpoint::ConnectionTarget;
pub use error::{FailureReason, Result, SessionError};
pub use intent::{RoomIntent, RoomMode};
pub use machine::{Outcome, Role, SessionMachine, SessionState};
pub use message_log::MessageLog;
pub use protocol::{ChatMessage, ClientFrame, ServerEvent, ServerFrame};
pub use session::RoomSession;
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
