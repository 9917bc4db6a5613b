//! Wire-compatible frame types for the room signaling protocol.
//!
//! Every frame is a single JSON object tagged by its `type` field. Outgoing
//! frames are [`ClientFrame`]s; incoming frames decode into [`ServerFrame`]
//! and are converted to the typed [`ServerEvent`]s the session consumes.
//!
//! Unknown incoming `type` values decode to [`ServerFrame::Unknown`] so that
//! newer servers can add events without breaking older clients. Extra fields
//! on known frames are ignored.

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ── Shared structs ──────────────────────────────────────────────────

/// A chat message relayed by the server.
///
/// All fields are opaque strings as far as the client is concerned; `id` is
/// the de-duplication key of the [`MessageLog`](crate::MessageLog).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: String,
    pub timestamp: String,
}

// ── Messages ────────────────────────────────────────────────────────

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Join an existing room, or create one when `create` is set.
    Join {
        /// Room code; empty when the server should pick one.
        room: String,
        /// Display name of the sender.
        from: String,
        /// Room password; empty when none.
        password: String,
        create: bool,
    },
    /// Chat text for everyone in `room`.
    Message {
        room: String,
        from: String,
        text: String,
    },
}

impl ClientFrame {
    /// Serialize to the JSON text sent over the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialization`](crate::SessionError::Serialization)
    /// if encoding fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// The room was created; `room` is the authoritative code.
    #[serde(rename = "created")]
    Created { room: String },
    /// Joined an existing room hosted by `user`.
    #[serde(rename = "joined")]
    Joined {
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },
    /// Sent to the host when a guest joins its room.
    #[serde(rename = "gotjoined")]
    GotJoined { user: String },
    /// The server rejected the last request.
    #[serde(rename = "error")]
    Error { message: String },
    /// A chat message relayed to every participant, including its sender.
    #[serde(rename = "message")]
    Message(ChatMessage),
    /// The server is ending the session.
    #[serde(rename = "bye")]
    Bye,
    /// Any `type` this client does not understand.
    #[serde(other, skip_serializing)]
    Unknown,
}

impl ServerFrame {
    /// Parse one incoming JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialization`](crate::SessionError::Serialization)
    /// if the text is not JSON, has no `type`, or a known `type` is missing
    /// required fields.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Convert into the event the session handles. `Unknown` has no event.
    pub fn into_event(self) -> Option<ServerEvent> {
        match self {
            Self::Created { room } => Some(ServerEvent::RoomCreated { room_code: room }),
            Self::Joined { room, user } => Some(ServerEvent::RoomJoined {
                room_code: room,
                host: user,
            }),
            Self::GotJoined { user } => Some(ServerEvent::GuestJoined { user }),
            Self::Error { message } => Some(ServerEvent::Error { message }),
            Self::Message(message) => Some(ServerEvent::ChatMessage(message)),
            Self::Bye => Some(ServerEvent::Bye),
            Self::Unknown => None,
        }
    }
}

/// Typed server events consumed by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A room requested with `create: true` now exists.
    RoomCreated { room_code: String },
    /// The client joined an existing room.
    RoomJoined {
        room_code: String,
        host: Option<String>,
    },
    /// A guest joined the room this client hosts.
    GuestJoined { user: String },
    /// The server rejected a request.
    Error { message: String },
    /// A chat message for the current room.
    ChatMessage(ChatMessage),
    /// The server ended the session.
    Bye,
}

impl ServerEvent {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoomCreated { .. } => "created",
            Self::RoomJoined { .. } => "joined",
            Self::GuestJoined { .. } => "gotjoined",
            Self::Error { .. } => "error",
            Self::ChatMessage(_) => "message",
            Self::Bye => "bye",
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
    fn join_frame_wire_format() {
        let frame = ClientFrame::Join {
            room: String::new(),
            from: "alice".into(),
            password: String::new(),
            create: true,
        };
        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "join",
                "room": "",
                "from": "alice",
                "password": "",
                "create": true
            })
        );
    }

    #[test]
    fn chat_frame_wire_format() {
        let frame = ClientFrame::Message {
            room: "ABC123".into(),
            from: "alice".into(),
            text: "hello".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "message",
                "room": "ABC123",
                "from": "alice",
                "text": "hello"
            })
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let frame = ServerFrame::decode(r#"{"type":"offer","sdp":"v=0"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Unknown);
        assert!(frame.into_event().is_none());
    }

    #[test]
    fn extra_fields_are_ignored() {
        let frame =
            ServerFrame::decode(r#"{"type":"created","room":"ABC123","peer":"1.2.3.4:5"}"#).unwrap();
        assert_eq!(
            frame.into_event(),
            Some(ServerEvent::RoomCreated {
                room_code: "ABC123".into()
            })
        );
    }

    #[test]
    fn joined_without_user_has_no_host() {
        let event = ServerFrame::decode(r#"{"type":"joined","room":"XYZ999"}"#)
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::RoomJoined {
                room_code: "XYZ999".into(),
                host: None
            }
        );
    }

    #[test]
    fn message_frame_decodes_chat() {
        let event = ServerFrame::decode(
            r#"{"type":"message","id":"m1","text":"hi","sender":"bob","timestamp":"t1"}"#,
        )
        .unwrap()
        .into_event()
        .unwrap();
        let ServerEvent::ChatMessage(msg) = event else {
            panic!("expected chat message, got {event:?}");
        };
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.sender, "bob");
    }

    #[test]
    fn missing_required_field_is_an_error() {
        assert!(ServerFrame::decode(r#"{"type":"error"}"#).is_err());
        assert!(ServerFrame::decode(r#"{"room":"ABC123"}"#).is_err());
        assert!(ServerFrame::decode("not json").is_err());
    }

    #[test]
    fn bye_decodes() {
        let event = ServerFrame::decode(r#"{"type":"bye"}"#)
            .unwrap()
            .into_event();
        assert_eq!(event, Some(ServerEvent::Bye));
    }
}
