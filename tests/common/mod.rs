#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for room session integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`MockConnector`] that hands it
//! out, and helpers that build server frame JSON strings.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use room_session_client::{Connector, SessionError, Transport};
use serde_json::json;
use tokio::sync::mpsc;

// ── MockTransport ───────────────────────────────────────────────────

/// Scripted transport for integration testing.
///
/// Scripted server frames are replayed in order by `recv()`. An explicit
/// `None` entry is a clean close by the server. Once the script runs out,
/// further frames can be pushed through the [`ServerHandle`]; until then
/// `recv()` waits.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, SessionError>>>,
    live: mpsc::UnboundedReceiver<Option<String>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct ServerHandle {
    push: mpsc::UnboundedSender<Option<String>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a transport with the given scripted incoming frames.
    pub fn new(incoming: Vec<Option<Result<String, SessionError>>>) -> (Self, ServerHandle) {
        let (push, live) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            live,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, ServerHandle { push, sent, closed })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        if let Some(item) = self.incoming.pop_front() {
            return item;
        }
        match self.live.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) => None,
            // Test dropped its handle: hang until the session shuts down.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl ServerHandle {
    /// Deliver a frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.push.send(Some(frame.into()));
    }

    /// Close the connection from the server side.
    pub fn hang_up(&self) {
        let _ = self.push.send(None);
    }

    /// Frames the client sent, decoded as JSON.
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Wait until the client has sent `count` frames.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<serde_json::Value> {
        for _ in 0..200 {
            if self.sent.lock().unwrap().len() >= count {
                return self.sent();
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("client never sent {count} frames; got {:?}", self.sent());
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out scripted transports, one per `connect` call, and records the
/// endpoints it was asked for.
#[derive(Clone, Default)]
pub struct MockConnector {
    queue: Arc<StdMutex<VecDeque<Result<MockTransport, SessionError>>>>,
    endpoints: Arc<StdMutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport scripted with `incoming`; returns its handle.
    pub fn script(&self, incoming: Vec<Option<Result<String, SessionError>>>) -> ServerHandle {
        let (transport, handle) = MockTransport::new(incoming);
        self.queue.lock().unwrap().push_back(Ok(transport));
        handle
    }

    /// Queue a connect failure.
    pub fn refuse(&self, detail: &str) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Err(SessionError::Connect(detail.into())));
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, SessionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(SessionError::Connect("no scripted transport".into())),
        }
    }
}

// ── Server frame helpers ────────────────────────────────────────────

pub fn created_json(room: &str) -> String {
    json!({"type": "created", "room": room}).to_string()
}

pub fn joined_json(room: &str, host: &str) -> String {
    json!({"type": "joined", "room": room, "user": host}).to_string()
}

pub fn gotjoined_json(user: &str) -> String {
    json!({"type": "gotjoined", "user": user}).to_string()
}

pub fn error_json(message: &str) -> String {
    json!({"type": "error", "message": message}).to_string()
}

pub fn chat_json(id: &str, sender: &str, text: &str) -> String {
    json!({
        "type": "message",
        "id": id,
        "text": text,
        "sender": sender,
        "timestamp": "2024-01-01T00:00:00Z",
    })
    .to_string()
}

pub fn bye_json() -> String {
    json!({"type": "bye"}).to_string()
}

/// Wrap a frame as a scripted successful `recv`.
pub fn frame(text: String) -> Option<Result<String, SessionError>> {
    Some(Ok(text))
}

/// Route `tracing` output through the test harness; `RUST_LOG` filters it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
