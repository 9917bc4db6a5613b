//! Signaling connection: one transport, one background I/O loop.
//!
//! [`SignalingConnection`] is a thin handle around a background task that
//! owns the [`Transport`]. Outgoing [`ClientFrame`]s are queued on an
//! unbounded channel; incoming text frames are decoded into [`ServerEvent`]s
//! and handed, strictly in arrival order, to the single consumer registered
//! with [`SignalingConnection::on_event`].
//!
//! The connection never reconnects on its own. When the transport ends for any
//! reason other than [`close`](SignalingConnection::close), the consumer
//! receives one final [`ConnectionEvent::Closed`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SessionConfig::from_base_url("http://localhost:5000")?;
//! let mut connection =
//!     SignalingConnection::open(&WebSocketConnector, &config.target, &config).await?;
//!
//! let (tx, mut events) = tokio::sync::mpsc::channel(16);
//! connection.on_event(tx);
//! connection.send(&intent.to_frame());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Server(ServerEvent::RoomCreated { room_code }) => { /* … */ }
//!         ConnectionEvent::Closed { .. } => break,
//!         _ => {}
//!     }
//! }
//! connection.close().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::config::SessionConfig;
use crate::endpoint::ConnectionTarget;
use crate::error::{Result, SessionError};
use crate::protocol::{ClientFrame, ServerEvent, ServerFrame};
use crate::transport::{Connector, Transport};

/// What a [`SignalingConnection`] delivers to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A decoded server frame.
    Server(ServerEvent),
    /// The transport ended without [`close`](SignalingConnection::close)
    /// being called. Always the last event.
    Closed { reason: Option<String> },
}

/// The registered consumer, shared with the I/O loop.
type HandlerSlot = Arc<Mutex<Option<mpsc::Sender<ConnectionEvent>>>>;

/// Handle to an open connection to the signaling server.
pub struct SignalingConnection {
    /// Serialized frames waiting to be written by the I/O loop.
    frame_tx: mpsc::UnboundedSender<String>,
    handler: HandlerSlot,
    /// Cleared by the I/O loop when the transport ends.
    ready: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl SignalingConnection {
    /// Open a connection to the endpoint derived from `target`.
    ///
    /// Suspends until the connector reports the transport ready. No
    /// application data is sent here.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] if the endpoint cannot be reached or
    /// the handshake fails, and [`SessionError::Timeout`] if
    /// [`SessionConfig::connect_timeout`] elapses first.
    pub async fn open(
        connector: &dyn Connector,
        target: &ConnectionTarget,
        config: &SessionConfig,
    ) -> Result<Self> {
        let endpoint = target.endpoint();
        debug!(endpoint = %endpoint, "opening signaling connection");

        let connecting = connector.connect(&endpoint);
        let transport = match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| SessionError::Timeout)??,
            None => connecting.await?,
        };

        Ok(Self::from_transport(transport, config.shutdown_timeout))
    }

    /// Start the I/O loop over an already-connected transport.
    pub fn from_transport(transport: impl Transport, shutdown_timeout: Duration) -> Self {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handler: HandlerSlot = Arc::new(Mutex::new(None));
        let ready = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(connection_loop(
            transport,
            frame_rx,
            Arc::clone(&handler),
            Arc::clone(&ready),
            shutdown_rx,
        ));

        Self {
            frame_tx,
            handler,
            ready,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        }
    }

    /// Register the consumer of decoded events, replacing any previous one.
    ///
    /// The replaced sender is dropped, so its receiver observes the channel
    /// closing once it has drained what was already delivered. Frames that
    /// arrive while no consumer is registered are dropped, so register before
    /// sending the first request.
    pub fn on_event(&self, handler: mpsc::Sender<ConnectionEvent>) {
        let previous = lock_slot(&self.handler).replace(handler);
        if previous.is_some() {
            debug!("replaced connection event handler");
        }
    }

    /// Serialize `frame` and queue it for transmission.
    ///
    /// Calling this on a connection that is not ready is a caller-ordering
    /// issue: the frame is discarded with a warning and no error is raised.
    pub fn send(&self, frame: &ClientFrame) {
        if !self.is_ready() {
            warn!("signaling connection not ready, dropping outgoing frame");
            return;
        }
        let json = match frame.encode() {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize ClientFrame: {e}");
                return;
            }
        };
        if self.frame_tx.send(json).is_err() {
            warn!("signaling connection loop has exited, dropping outgoing frame");
        }
    }

    /// Returns `true` while the transport is open and not closing.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Close the connection. Idempotent and safe to call in any state.
    ///
    /// The event handler is detached first; once this returns no further
    /// events are delivered and the transport has been released.
    pub async fn close(&mut self) {
        let detached = lock_slot(&self.handler).take();
        drop(detached);
        self.ready.store(false, Ordering::Release);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout so a stuck transport cannot keep the
        // task alive after we return.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection loop aborted: {join_err}");
                    }
                }
            }
            debug!("signaling connection closed");
        }
    }
}

impl std::fmt::Debug for SignalingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingConnection")
            .field("ready", &self.is_ready())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for SignalingConnection {
    fn drop(&mut self) {
        // No executor context for a graceful close here; abort the loop so
        // the transport is dropped with it.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn lock_slot(
    slot: &HandlerSlot,
) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<ConnectionEvent>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── I/O loop ────────────────────────────────────────────────────────

/// Background loop that multiplexes outgoing frames, shutdown and incoming
/// frames via `tokio::select!`.
///
/// Exits when:
/// - shutdown is requested (or the handle is gone), including while waiting
///   for room in a full event channel
/// - the transport returns `None` or an error
/// - a send fails
async fn connection_loop(
    mut transport: impl Transport,
    mut frame_rx: mpsc::UnboundedReceiver<String>,
    handler: HandlerSlot,
    ready: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("connection loop started");

    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                match frame {
                    Some(json) => {
                        if let Err(e) = transport.send(json).await {
                            error!("transport send error: {e}");
                            ready.store(false, Ordering::Release);
                            let closed = ConnectionEvent::Closed {
                                reason: Some(format!("transport send error: {e}")),
                            };
                            deliver(&handler, closed, &mut shutdown_rx).await;
                            break;
                        }
                    }
                    None => {
                        debug!("frame channel closed, shutting down connection loop");
                        shut_down(&mut transport, &ready).await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                shut_down(&mut transport, &ready).await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match ServerFrame::decode(&text) {
                        Ok(frame) => match frame.into_event() {
                            Some(event) => {
                                let event = ConnectionEvent::Server(event);
                                let delivery = deliver(&handler, event, &mut shutdown_rx).await;
                                if delivery == Delivery::Shutdown {
                                    shut_down(&mut transport, &ready).await;
                                    break;
                                }
                            }
                            None => warn!("ignoring server frame of unknown type: {text}"),
                        },
                        Err(e) => warn!("dropping malformed server frame: {e} (raw: {text})"),
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        ready.store(false, Ordering::Release);
                        let closed = ConnectionEvent::Closed {
                            reason: Some(format!("transport receive error: {e}")),
                        };
                        deliver(&handler, closed, &mut shutdown_rx).await;
                        break;
                    }
                    None => {
                        debug!("transport closed by server");
                        ready.store(false, Ordering::Release);
                        let closed = ConnectionEvent::Closed { reason: None };
                        deliver(&handler, closed, &mut shutdown_rx).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("connection loop exited");
}

async fn shut_down(transport: &mut impl Transport, ready: &AtomicBool) {
    ready.store(false, Ordering::Release);
    if let Err(e) = transport.close().await {
        debug!("transport close failed: {e}");
    }
}

/// How a call to [`deliver`] ended.
#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    /// Handed over, or there was no one to hand it to.
    Done,
    /// Shutdown was requested while waiting for channel capacity. The
    /// shutdown receiver has completed and must not be polled again.
    Shutdown,
}

/// Hand `event` to the registered consumer, waiting for channel capacity
/// unless shutdown is requested first.
async fn deliver(
    handler: &HandlerSlot,
    event: ConnectionEvent,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Delivery {
    let sender = lock_slot(handler).clone();
    let Some(sender) = sender else {
        debug!("no event handler registered, dropping event");
        return Delivery::Done;
    };
    tokio::select! {
        biased;
        _ = shutdown_rx => {
            debug!("shutdown requested while delivering event");
            Delivery::Shutdown
        }
        sent = sender.send(event) => {
            if sent.is_err() {
                debug!("event receiver dropped");
            }
            Delivery::Done
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
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// Records sent frames and replays scripted incoming ones. An explicit
    /// `None` entry is a clean close; once the script runs out `recv` hangs.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, SessionError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, SessionError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), SessionError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out a transport that hangs in `recv` (or a scripted error).
    struct StaticConnector(StdMutex<Option<std::result::Result<MockTransport, SessionError>>>);

    #[async_trait]
    impl Connector for StaticConnector {
        async fn connect(
            &self,
            _endpoint: &str,
        ) -> std::result::Result<Box<dyn Transport>, SessionError> {
            match self.0.lock().unwrap().take() {
                Some(Ok(transport)) => Ok(Box::new(transport)),
                Some(Err(e)) => Err(e),
                None => Err(SessionError::Connect("already used".into())),
            }
        }
    }

    struct NeverConnector;

    #[async_trait]
    impl Connector for NeverConnector {
        async fn connect(
            &self,
            _endpoint: &str,
        ) -> std::result::Result<Box<dyn Transport>, SessionError> {
            std::future::pending().await
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::from_base_url("http://localhost:5000")
            .unwrap()
            .with_shutdown_timeout(Duration::from_millis(200))
    }

    fn join_frame() -> ClientFrame {
        ClientFrame::Join {
            room: String::new(),
            from: "alice".into(),
            password: String::new(),
            create: true,
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok(r#"{"type":"created","room":"ABC123"}"#.into())),
            Some(Ok(
                r#"{"type":"message","id":"m1","text":"hi","sender":"bob","timestamp":"t1"}"#
                    .into(),
            )),
        ]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));
        let (tx, mut rx) = mpsc::channel(8);
        conn.on_event(tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            ConnectionEvent::Server(ServerEvent::RoomCreated {
                room_code: "ABC123".into()
            })
        );
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            ConnectionEvent::Server(ServerEvent::ChatMessage(_))
        ));

        conn.close().await;
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_dropped() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok("garbage".into())),
            Some(Ok(r#"{"type":"offer","sdp":"x"}"#.into())),
            Some(Ok(r#"{"type":"error"}"#.into())),
            Some(Ok(r#"{"type":"error","message":"room full"}"#.into())),
        ]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));
        let (tx, mut rx) = mpsc::channel(8);
        conn.on_event(tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ConnectionEvent::Server(ServerEvent::Error {
                message: "room full".into()
            })
        );
        conn.close().await;
    }

    #[tokio::test]
    async fn send_writes_encoded_frame() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));
        conn.send(&join_frame());

        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let frames = sent.lock().unwrap();
            assert_eq!(frames.len(), 1);
            let decoded: ClientFrame = serde_json::from_str(&frames[0]).unwrap();
            assert_eq!(decoded, join_frame());
        }
        conn.close().await;
    }

    #[tokio::test]
    async fn clean_close_by_server_emits_closed() {
        let (transport, _sent, _closed) = MockTransport::new(vec![None]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));
        let (tx, mut rx) = mpsc::channel(8);
        conn.on_event(tx);

        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Closed { reason: None }
        );
        assert!(!conn.is_ready());
        conn.close().await;
    }

    #[tokio::test]
    async fn receive_error_emits_closed_with_reason() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Err(
            SessionError::TransportReceive("boom".into()),
        ))]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));
        let (tx, mut rx) = mpsc::channel(8);
        conn.on_event(tx);

        let ConnectionEvent::Closed { reason } = rx.recv().await.unwrap() else {
            panic!("expected Closed");
        };
        assert!(reason.unwrap().contains("boom"));
        conn.close().await;
    }

    #[tokio::test]
    async fn send_when_not_ready_is_a_noop() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));
        conn.close().await;

        conn.send(&join_frame());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_closes_transport() {
        let (transport, _sent, closed) = MockTransport::new(vec![]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));

        conn.close().await;
        conn.close().await;
        assert!(closed.load(Ordering::Relaxed));
        assert!(!conn.is_ready());
    }

    #[tokio::test]
    async fn no_events_after_close() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));
        let (tx, mut rx) = mpsc::channel(8);
        conn.on_event(tx);

        conn.close().await;
        // The handler was detached and the loop is gone: the channel is closed
        // with nothing in it, not even a Closed event.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn replacing_handler_detaches_previous() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(200));
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        conn.on_event(tx1);
        conn.on_event(tx2);

        assert!(rx1.recv().await.is_none());
        conn.close().await;
    }

    #[tokio::test]
    async fn open_uses_connector() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![Some(Ok(r#"{"type":"bye"}"#.into()))]);
        let connector = StaticConnector(StdMutex::new(Some(Ok(transport))));
        let mut conn = SignalingConnection::open(&connector, &config().target, &config())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        conn.on_event(tx);
        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Server(ServerEvent::Bye)
        );
        conn.close().await;
    }

    #[tokio::test]
    async fn open_propagates_connect_error() {
        let connector = StaticConnector(StdMutex::new(Some(Err(SessionError::Connect(
            "refused".into(),
        )))));
        let err = SignalingConnection::open(&connector, &config().target, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Connect(_)));
    }

    #[tokio::test]
    async fn open_honours_connect_timeout() {
        let config = config().with_connect_timeout(Duration::from_millis(30));
        let err = SignalingConnection::open(&NeverConnector, &config.target, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout));
    }

    /// Transport whose `close` never finishes, to exercise the abort path.
    struct HangingCloseTransport {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for HangingCloseTransport {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), SessionError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn close_aborts_stuck_transport() {
        let dropped = Arc::new(AtomicBool::new(false));
        let transport = HangingCloseTransport {
            dropped: Arc::clone(&dropped),
        };
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_millis(20));
        conn.close().await;
        assert!(dropped.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn close_is_prompt_when_consumer_is_full() {
        let burst = (0..5)
            .map(|i| {
                Some(Ok(format!(
                    r#"{{"type":"message","id":"m{i}","text":"hi","sender":"bob","timestamp":"t"}}"#
                )))
            })
            .collect();
        let (transport, _sent, closed) = MockTransport::new(burst);
        let mut conn = SignalingConnection::from_transport(transport, Duration::from_secs(2));
        let (tx, _rx) = mpsc::channel(1);
        conn.on_event(tx);

        // Let the loop fill the channel and block on the second event.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        conn.close().await;
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "close took {:?}",
            started.elapsed()
        );
        // The transport was closed gracefully rather than aborted.
        assert!(closed.load(Ordering::Relaxed));
    }
}
