//! Room session state machine.
//!
//! [`SessionMachine`] is the transition table of a room session with no I/O
//! of its own: the caller feeds it connection outcomes and [`ServerEvent`]s
//! and it answers with the frame to send or an [`Outcome`] telling the caller
//! whether the connection should be torn down. [`RoomSession`](crate::RoomSession)
//! drives it over a real connection; tests drive it directly.
//!
//! ```text
//!            submit                created / joined
//!   Idle ───────────────▶ Connecting ───────────────▶ Active
//!    ▲                       │   │                      │ │
//!    │      connect error    │   │ error                │ │ chat message
//!    │  ┌────────────────────┘   ▼                      │ └──▶ Active
//!    │  │                    Failed ◀── connection lost ┘
//!    │  ▼                       │
//!    └──────── leave / reset ───┘
//! ```

use tracing::{debug, info, warn};

use crate::error::{FailureReason, Result, SessionError};
use crate::intent::{RoomIntent, RoomMode};
use crate::message_log::MessageLog;
use crate::protocol::{ClientFrame, ServerEvent};

/// The participant's role in the active room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the room.
    Host,
    /// Joined someone else's room.
    Guest,
}

/// Current state of a room session. Exactly one is current at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No room and no connection.
    #[default]
    Idle,
    /// Connection opening or join/create request awaiting the server.
    Connecting,
    /// In a room.
    Active {
        /// Room code confirmed by the server.
        room_code: String,
        role: Role,
        /// For a guest, the host; for a host, the most recent guest.
        peer: Option<String>,
    },
    /// The attempt or session ended; submit a new intent to retry.
    Failed { reason: FailureReason },
}

impl SessionState {
    /// Returns `true` in [`SessionState::Active`].
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Returns `true` while an attempt is in flight or a room is active.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active { .. })
    }

    /// The confirmed room code, when active.
    pub fn room_code(&self) -> Option<&str> {
        match self {
            Self::Active { room_code, .. } => Some(room_code),
            _ => None,
        }
    }
}

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Outcome {
    /// State or message log changed.
    Applied,
    /// Stale, duplicate or out-of-place event; nothing changed.
    Ignored,
    /// The session failed; the connection should be closed.
    Ended,
}

/// Transition table for one room session.
#[derive(Debug, Default)]
pub struct SessionMachine {
    state: SessionState,
    intent: Option<RoomIntent>,
    log: MessageLog,
    guests: Vec<String>,
    join_sent: bool,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Guests that joined while this client hosts the room, in join order.
    pub fn guests(&self) -> &[String] {
        &self.guests
    }

    /// The intent of the current attempt.
    pub fn intent(&self) -> Option<&RoomIntent> {
        self.intent.as_ref()
    }

    /// Start an attempt: `Idle | Failed → Connecting`.
    ///
    /// Anything left from a previous attempt is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionBusy`] while connecting or active.
    pub fn begin(&mut self, intent: RoomIntent) -> Result<()> {
        if self.state.is_busy() {
            return Err(SessionError::SessionBusy);
        }
        self.reset();
        debug!(mode = ?intent.mode, "session: connecting");
        self.intent = Some(intent);
        self.state = SessionState::Connecting;
        Ok(())
    }

    /// The transport is ready. Returns the join/create frame the first time
    /// this is called for an attempt, and `None` afterwards or when no
    /// attempt is connecting.
    pub fn connected(&mut self) -> Option<ClientFrame> {
        if self.state != SessionState::Connecting || self.join_sent {
            return None;
        }
        let frame = self.intent.as_ref()?.to_frame();
        self.join_sent = true;
        Some(frame)
    }

    /// Opening the connection failed: `Connecting → Failed{Connect}`.
    pub fn connect_failed(&mut self, detail: impl Into<String>) {
        if self.state != SessionState::Connecting {
            return;
        }
        let detail = detail.into();
        warn!("session: connect failed: {detail}");
        self.state = SessionState::Failed {
            reason: FailureReason::Connect(detail),
        };
    }

    /// The transport closed without the caller leaving.
    pub fn connection_lost(&mut self, detail: Option<String>) -> Outcome {
        if !self.state.is_busy() {
            return Outcome::Ignored;
        }
        warn!(?detail, "session: connection lost");
        self.state = SessionState::Failed {
            reason: FailureReason::ConnectionLost(detail),
        };
        Outcome::Ended
    }

    /// Apply one server event.
    pub fn handle(&mut self, event: ServerEvent) -> Outcome {
        let kind = event.kind();
        let mode = self.intent.as_ref().map(|intent| intent.mode);

        match (event, &self.state) {
            (ServerEvent::RoomCreated { room_code }, SessionState::Connecting)
                if mode == Some(RoomMode::Create) =>
            {
                info!(room_code = %room_code, "session: room created");
                self.state = SessionState::Active {
                    room_code,
                    role: Role::Host,
                    peer: None,
                };
                Outcome::Applied
            }
            (ServerEvent::RoomJoined { room_code, host }, SessionState::Connecting)
                if mode == Some(RoomMode::Join) =>
            {
                info!(room_code = %room_code, ?host, "session: joined room");
                self.state = SessionState::Active {
                    room_code,
                    role: Role::Guest,
                    peer: host,
                };
                Outcome::Applied
            }
            (ServerEvent::Error { message }, SessionState::Connecting) => {
                warn!("session: server rejected request: {message}");
                self.state = SessionState::Failed {
                    reason: FailureReason::Server(message),
                };
                Outcome::Ended
            }
            (ServerEvent::Error { message }, SessionState::Active { .. }) => {
                warn!("session: server error while active: {message}");
                Outcome::Ignored
            }
            (ServerEvent::ChatMessage(message), SessionState::Active { .. }) => {
                if self.log.append(message) {
                    Outcome::Applied
                } else {
                    debug!("session: duplicate chat message ignored");
                    Outcome::Ignored
                }
            }
            (
                ServerEvent::GuestJoined { user },
                SessionState::Active {
                    role: Role::Host, ..
                },
            ) => {
                info!(user = %user, "session: guest joined");
                if !self.guests.contains(&user) {
                    self.guests.push(user.clone());
                }
                if let SessionState::Active { peer, .. } = &mut self.state {
                    *peer = Some(user);
                }
                Outcome::Applied
            }
            (ServerEvent::Bye, state) if state.is_busy() => {
                info!("session: server ended the session");
                self.state = SessionState::Failed {
                    reason: FailureReason::ConnectionLost(Some(
                        "server ended the session".into(),
                    )),
                };
                Outcome::Ended
            }
            (_, state) => {
                debug!(event = kind, ?state, "session: ignoring out-of-place event");
                Outcome::Ignored
            }
        }
    }

    /// Build a chat frame for the active room.
    ///
    /// The message is not added to the log; the server's relayed copy is.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotActive`] unless active and
    /// [`SessionError::InvalidIntent`] for blank text.
    pub fn chat_frame(&self, text: &str) -> Result<ClientFrame> {
        let (SessionState::Active { room_code, .. }, Some(intent)) = (&self.state, &self.intent)
        else {
            return Err(SessionError::NotActive);
        };
        if text.trim().is_empty() {
            return Err(SessionError::InvalidIntent(
                "chat message must not be empty".into(),
            ));
        }
        Ok(ClientFrame::Message {
            room: room_code.clone(),
            from: intent.display_name.clone(),
            text: text.to_string(),
        })
    }

    /// Back to `Idle` with an empty log.
    pub fn reset(&mut self) {
        if self.state != SessionState::Idle {
            debug!("session: reset to idle");
        }
        self.state = SessionState::Idle;
        self.intent = None;
        self.log.clear();
        self.guests.clear();
        self.join_sent = false;
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
    use crate::protocol::ChatMessage;

    fn chat(id: &str) -> ServerEvent {
        ServerEvent::ChatMessage(ChatMessage {
            id: id.into(),
            text: "hi".into(),
            sender: "bob".into(),
            timestamp: "t1".into(),
        })
    }

    fn created(code: &str) -> ServerEvent {
        ServerEvent::RoomCreated {
            room_code: code.into(),
        }
    }

    fn hosting(code: &str) -> SessionMachine {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::create("alice")).unwrap();
        let _ = m.connected();
        assert_eq!(m.handle(created(code)), Outcome::Applied);
        m
    }

    #[test]
    fn create_adopts_server_code() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::create("alice").with_room_code("MINE01"))
            .unwrap();
        let frame = m.connected().unwrap();
        assert!(matches!(frame, ClientFrame::Join { ref room, create: true, .. } if room == "MINE01"));

        assert_eq!(m.handle(created("SRV999")), Outcome::Applied);
        assert_eq!(
            m.state(),
            &SessionState::Active {
                room_code: "SRV999".into(),
                role: Role::Host,
                peer: None
            }
        );
    }

    #[test]
    fn join_frame_is_sent_once() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::create("alice")).unwrap();
        assert!(m.connected().is_some());
        assert!(m.connected().is_none());
    }

    #[test]
    fn join_becomes_guest_with_host_peer() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::join("bob", "ABC123")).unwrap();
        let _ = m.connected();
        let outcome = m.handle(ServerEvent::RoomJoined {
            room_code: "ABC123".into(),
            host: Some("alice".into()),
        });
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(
            m.state(),
            &SessionState::Active {
                room_code: "ABC123".into(),
                role: Role::Guest,
                peer: Some("alice".into())
            }
        );
    }

    #[test]
    fn confirmation_for_the_other_mode_is_ignored() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::join("bob", "ABC123")).unwrap();
        assert_eq!(m.handle(created("ABC123")), Outcome::Ignored);
        assert_eq!(m.state(), &SessionState::Connecting);
    }

    #[test]
    fn server_error_fails_attempt_with_verbatim_message() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::join("bob", "ABC123").with_password("nope"))
            .unwrap();
        let outcome = m.handle(ServerEvent::Error {
            message: "Wrong password".into(),
        });
        assert_eq!(outcome, Outcome::Ended);
        assert_eq!(
            m.state(),
            &SessionState::Failed {
                reason: FailureReason::Server("Wrong password".into())
            }
        );
        assert!(m.log().is_empty());
    }

    #[test]
    fn stale_confirmation_while_active_is_ignored() {
        let mut m = hosting("ABC123");
        assert_eq!(m.handle(created("OTHER1")), Outcome::Ignored);
        assert_eq!(m.state().room_code(), Some("ABC123"));
    }

    #[test]
    fn chat_is_deduplicated() {
        let mut m = hosting("ABC123");
        assert_eq!(m.handle(chat("m1")), Outcome::Applied);
        assert_eq!(m.handle(chat("m1")), Outcome::Ignored);
        assert_eq!(m.handle(chat("m2")), Outcome::Applied);
        let ids: Vec<_> = m.log().snapshot().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[test]
    fn chat_before_active_is_ignored() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::create("alice")).unwrap();
        assert_eq!(m.handle(chat("m1")), Outcome::Ignored);
        assert!(m.log().is_empty());
    }

    #[test]
    fn error_while_active_keeps_session() {
        let mut m = hosting("ABC123");
        let outcome = m.handle(ServerEvent::Error {
            message: "slow down".into(),
        });
        assert_eq!(outcome, Outcome::Ignored);
        assert!(m.state().is_active());
    }

    #[test]
    fn host_tracks_guests() {
        let mut m = hosting("ABC123");
        for user in ["bob", "carol", "bob"] {
            assert_eq!(
                m.handle(ServerEvent::GuestJoined { user: user.into() }),
                Outcome::Applied
            );
        }
        assert_eq!(m.guests(), ["bob", "carol"]);
        assert!(matches!(
            m.state(),
            SessionState::Active { peer: Some(p), .. } if p == "bob"
        ));
    }

    #[test]
    fn guest_ignores_guest_joined() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::join("bob", "ABC123")).unwrap();
        let _ = m.handle(ServerEvent::RoomJoined {
            room_code: "ABC123".into(),
            host: None,
        });
        assert_eq!(
            m.handle(ServerEvent::GuestJoined {
                user: "carol".into()
            }),
            Outcome::Ignored
        );
        assert!(m.guests().is_empty());
    }

    #[test]
    fn bye_ends_session() {
        let mut m = hosting("ABC123");
        assert_eq!(m.handle(ServerEvent::Bye), Outcome::Ended);
        assert!(matches!(
            m.state(),
            SessionState::Failed {
                reason: FailureReason::ConnectionLost(Some(_))
            }
        ));
    }

    #[test]
    fn connection_lost_from_any_busy_state() {
        let mut m = hosting("ABC123");
        assert_eq!(m.connection_lost(None), Outcome::Ended);
        assert_eq!(
            m.state(),
            &SessionState::Failed {
                reason: FailureReason::ConnectionLost(None)
            }
        );

        let mut idle = SessionMachine::new();
        assert_eq!(idle.connection_lost(None), Outcome::Ignored);
        assert_eq!(idle.state(), &SessionState::Idle);
    }

    #[test]
    fn connect_failure() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::create("alice")).unwrap();
        m.connect_failed("refused");
        assert_eq!(
            m.state(),
            &SessionState::Failed {
                reason: FailureReason::Connect("refused".into())
            }
        );
        assert!(m.connected().is_none());
    }

    #[test]
    fn begin_while_busy_is_rejected() {
        let mut m = SessionMachine::new();
        m.begin(RoomIntent::create("alice")).unwrap();
        assert!(matches!(
            m.begin(RoomIntent::create("alice")),
            Err(SessionError::SessionBusy)
        ));
    }

    #[test]
    fn begin_after_failure_starts_fresh() {
        let mut m = hosting("ABC123");
        let _ = m.handle(chat("m1"));
        let _ = m.connection_lost(None);

        m.begin(RoomIntent::join("alice", "XYZ789")).unwrap();
        assert_eq!(m.state(), &SessionState::Connecting);
        assert!(m.log().is_empty());
        assert!(m.connected().is_some());
    }

    #[test]
    fn chat_frame_requires_active() {
        let mut m = SessionMachine::new();
        assert!(matches!(m.chat_frame("hi"), Err(SessionError::NotActive)));

        m.begin(RoomIntent::create("alice")).unwrap();
        assert!(matches!(m.chat_frame("hi"), Err(SessionError::NotActive)));
    }

    #[test]
    fn chat_frame_is_not_logged_locally() {
        let m = hosting("ABC123");
        let frame = m.chat_frame("hello").unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                room: "ABC123".into(),
                from: "alice".into(),
                text: "hello".into()
            }
        );
        assert!(m.log().is_empty());
        assert!(matches!(
            m.chat_frame("   "),
            Err(SessionError::InvalidIntent(_))
        ));
    }

    #[test]
    fn reset_clears_everything() {
        let mut m = hosting("ABC123");
        let _ = m.handle(chat("m1"));
        m.reset();
        assert_eq!(m.state(), &SessionState::Idle);
        assert!(m.log().is_empty());
        assert!(m.intent().is_none());
    }
}
