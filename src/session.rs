//! Room session controller.
//!
//! [`RoomSession`] is the handle an application holds. Each call to
//! [`RoomSession::submit`] starts one attempt: a background task opens a
//! [`SignalingConnection`], sends the join/create request, and feeds every
//! server event through the [`SessionMachine`] one at a time. The resulting
//! [`SessionState`] is published on a `watch` channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SessionConfig::from_base_url("http://localhost:5000")?;
//! let mut session = RoomSession::websocket(config);
//!
//! session.submit(RoomIntent::create("alice")).await?;
//! match session.wait_for_settled().await {
//!     SessionState::Active { room_code, .. } => println!("hosting {room_code}"),
//!     SessionState::Failed { reason } => eprintln!("{reason}"),
//!     _ => {}
//! }
//!
//! session.send_chat("hello").await?;
//! for message in session.messages().await {
//!     println!("{}: {}", message.sender, message.text);
//! }
//! session.leave().await;
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::connection::{ConnectionEvent, SignalingConnection};
use crate::error::{Result, SessionError};
use crate::intent::RoomIntent;
use crate::machine::{Outcome, SessionMachine, SessionState};
use crate::protocol::{ChatMessage, ClientFrame};
use crate::transport::Connector;

/// State shared between the handle and the session task.
struct Shared {
    machine: Mutex<SessionMachine>,
    state_tx: watch::Sender<SessionState>,
}

impl Shared {
    /// Publish the machine's state to observers if it changed.
    fn publish(&self, machine: &SessionMachine) {
        let next = machine.state();
        self.state_tx.send_if_modified(|current| {
            if current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
    }
}

/// One in-flight or active connection attempt.
struct Attempt {
    cmd_tx: mpsc::UnboundedSender<ClientFrame>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

/// Handle to a room session.
///
/// Exactly one room at a time. The session never reconnects on its own: after
/// a failure, submit a new [`RoomIntent`].
pub struct RoomSession {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    attempt: Option<Attempt>,
}

impl RoomSession {
    /// Create an idle session that opens connections through `connector`.
    pub fn new(config: SessionConfig, connector: impl Connector) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                machine: Mutex::new(SessionMachine::new()),
                state_tx,
            }),
            attempt: None,
        }
    }

    /// Create an idle session that connects over WebSocket.
    #[cfg(feature = "transport-websocket")]
    pub fn websocket(config: SessionConfig) -> Self {
        Self::new(config, crate::transports::WebSocketConnector)
    }

    /// Start creating or joining a room.
    ///
    /// Returns once the attempt has started; the state is
    /// [`SessionState::Connecting`] at that point. Use
    /// [`wait_for_settled`](Self::wait_for_settled) or
    /// [`subscribe`](Self::subscribe) to learn the outcome.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidIntent`] if the intent fails validation.
    /// - [`SessionError::SessionBusy`] while connecting or in a room.
    pub async fn submit(&mut self, intent: RoomIntent) -> Result<()> {
        let intent = intent.validate()?;

        if self.shared.machine.lock().await.state().is_busy() {
            return Err(SessionError::SessionBusy);
        }
        // A previous attempt that failed has already finished; reap it.
        self.stop_attempt().await;

        {
            let mut machine = self.shared.machine.lock().await;
            machine.begin(intent)?;
            self.shared.publish(&machine);
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(session_task(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            self.config.clone(),
            cmd_rx,
            shutdown_rx,
        ));

        self.attempt = Some(Attempt {
            cmd_tx,
            shutdown_tx: Some(shutdown_tx),
            task,
        });
        Ok(())
    }

    /// Send a chat message to the active room.
    ///
    /// The message shows up in [`messages`](Self::messages) once the server
    /// relays it back.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotActive`] unless the session is in a room.
    /// - [`SessionError::InvalidIntent`] if `text` is blank.
    /// - [`SessionError::TransportClosed`] if the session task has exited.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let frame = self.shared.machine.lock().await.chat_frame(text)?;
        let Some(attempt) = &self.attempt else {
            return Err(SessionError::NotActive);
        };
        attempt
            .cmd_tx
            .send(frame)
            .map_err(|_| SessionError::TransportClosed)
    }

    /// Leave the room or cancel the attempt in progress.
    ///
    /// Closes the connection, clears the message log and returns to
    /// [`SessionState::Idle`]. Safe to call in any state; a no-op when idle.
    /// Once this returns no further event is applied.
    pub async fn leave(&mut self) {
        self.stop_attempt().await;

        let mut machine = self.shared.machine.lock().await;
        if machine.state() == &SessionState::Idle {
            return;
        }
        debug!("leaving room session");
        machine.reset();
        self.shared.publish(&machine);
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Snapshot of the chat history of the current room, in arrival order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.shared.machine.lock().await.log().snapshot()
    }

    /// Guests that joined the room this session hosts.
    pub async fn guests(&self) -> Vec<String> {
        self.shared.machine.lock().await.guests().to_vec()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the state is anything other than
    /// [`SessionState::Connecting`] and return it.
    ///
    /// There is no built-in limit on the join round trip; wrap this in
    /// [`tokio::time::timeout`] and call [`leave`](Self::leave) on expiry to
    /// impose one.
    pub async fn wait_for_settled(&self) -> SessionState {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|state| *state != SessionState::Connecting).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }

    /// Signal the session task and wait for it, aborting it if it does not
    /// finish in time.
    async fn stop_attempt(&mut self) {
        let Some(mut attempt) = self.attempt.take() else {
            return;
        };
        if let Some(tx) = attempt.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // The task closes its connection, which may itself take up to the
        // shutdown timeout.
        let limit = self.config.shutdown_timeout.saturating_mul(2);
        match tokio::time::timeout(limit, &mut attempt.task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => warn!("session task terminated with join error: {join_err}"),
            Err(_) => {
                warn!("session task did not exit within timeout; aborting task");
                attempt.task.abort();
                if let Err(join_err) = attempt.task.await {
                    debug!("session task aborted: {join_err}");
                }
            }
        }
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("target", &self.config.target)
            .field("state", &self.state())
            .field("has_attempt", &self.attempt.is_some())
            .finish()
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.task.abort();
        }
    }
}

// ── Session task ────────────────────────────────────────────────────

/// Drive one attempt: open the connection, send the join request, then apply
/// events until the session ends or shutdown is requested.
async fn session_task(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientFrame>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let opened = tokio::select! {
        biased;
        _ = &mut shutdown_rx => {
            debug!("session cancelled while connecting");
            return;
        }
        result = SignalingConnection::open(connector.as_ref(), &config.target, &config) => result,
    };

    let mut connection = match opened {
        Ok(connection) => connection,
        Err(e) => {
            let mut machine = shared.machine.lock().await;
            machine.connect_failed(e.to_string());
            shared.publish(&machine);
            return;
        }
    };

    let (event_tx, mut events) = mpsc::channel(config.event_channel_capacity);
    connection.on_event(event_tx);

    if let Some(frame) = shared.machine.lock().await.connected() {
        connection.send(&frame);
    }

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!("session shutdown requested");
                connection.close().await;
                return;
            }

            Some(frame) = cmd_rx.recv() => connection.send(&frame),

            event = events.recv() => {
                let mut machine = shared.machine.lock().await;
                let outcome = match event {
                    Some(ConnectionEvent::Server(event)) => machine.handle(event),
                    Some(ConnectionEvent::Closed { reason }) => machine.connection_lost(reason),
                    None => machine.connection_lost(None),
                };
                shared.publish(&machine);
                drop(machine);

                if outcome == Outcome::Ended {
                    connection.close().await;
                    return;
                }
            }
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
    use crate::error::FailureReason;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::time::Duration;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(
            &self,
            endpoint: &str,
        ) -> std::result::Result<Box<dyn Transport>, SessionError> {
            Err(SessionError::Connect(format!("{endpoint}: refused")))
        }
    }

    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
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
            .with_shutdown_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn starts_idle() {
        let session = RoomSession::new(config(), RefusingConnector);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.messages().await.is_empty());
    }

    #[tokio::test]
    async fn leave_when_idle_is_noop() {
        let mut session = RoomSession::new(config(), RefusingConnector);
        let mut rx = session.subscribe();
        session.leave().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn send_chat_when_idle_fails() {
        let session = RoomSession::new(config(), RefusingConnector);
        assert!(matches!(
            session.send_chat("hi").await,
            Err(SessionError::NotActive)
        ));
    }

    #[tokio::test]
    async fn invalid_intent_is_rejected_locally() {
        let mut session = RoomSession::new(config(), RefusingConnector);
        let err = session.submit(RoomIntent::create(" ")).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidIntent(_)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn connect_failure_settles_in_failed() {
        let mut session = RoomSession::new(config(), RefusingConnector);
        session.submit(RoomIntent::create("alice")).await.unwrap();

        let state = session.wait_for_settled().await;
        let SessionState::Failed {
            reason: FailureReason::Connect(detail),
        } = state
        else {
            panic!("expected connect failure, got {state:?}");
        };
        assert!(detail.contains("ws://localhost:5000/ws"));
    }

    #[tokio::test]
    async fn leave_cancels_pending_connect() {
        let mut session = RoomSession::new(config(), StalledConnector);
        session.submit(RoomIntent::create("alice")).await.unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(matches!(
            session.submit(RoomIntent::create("alice")).await,
            Err(SessionError::SessionBusy)
        ));

        session.leave().await;
        assert_eq!(session.state(), SessionState::Idle);
    }
}
