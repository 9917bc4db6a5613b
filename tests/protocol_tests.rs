#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire format tests for the room signaling protocol.
//!
//! JSON fixtures mirror what the signaling server actually sends, including
//! frames this client does not handle (WebRTC offers and answers relayed
//! between peers), which must decode to `ServerFrame::Unknown`.

use room_session_client::protocol::{ChatMessage, ClientFrame, ServerEvent, ServerFrame};
use room_session_client::{RoomIntent, SessionError};
use serde_json::json;

fn decode_event(text: &str) -> Option<ServerEvent> {
    ServerFrame::decode(text).unwrap().into_event()
}

// ════════════════════════════════════════════════════════════════════
// Outgoing frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn create_request_matches_server_expectation() {
    let frame = RoomIntent::create("alice").validate().unwrap().to_frame();
    let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
    assert_eq!(
        value,
        json!({"type": "join", "room": "", "from": "alice", "password": "", "create": true})
    );
}

#[test]
fn join_request_with_password() {
    let frame = RoomIntent::join("bob", "k3x9qa")
        .with_password("s3cret")
        .validate()
        .unwrap()
        .to_frame();
    let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
    assert_eq!(
        value,
        json!({"type": "join", "room": "K3X9QA", "from": "bob", "password": "s3cret", "create": false})
    );
}

#[test]
fn chat_text_is_sent_verbatim() {
    let frame = ClientFrame::Message {
        room: "ABC123".into(),
        from: "alice".into(),
        text: "  spaced \"quoted\" ünïcödé  ".into(),
    };
    let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
    assert_eq!(value["text"], "  spaced \"quoted\" ünïcödé  ");
    assert_eq!(value["type"], "message");
}

// ════════════════════════════════════════════════════════════════════
// Incoming frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn server_fixtures_decode_to_events() {
    let cases = [
        (
            r#"{"type":"created","room":"ABC123"}"#,
            ServerEvent::RoomCreated {
                room_code: "ABC123".into(),
            },
        ),
        (
            r#"{"type":"joined","room":"ABC123","user":"alice"}"#,
            ServerEvent::RoomJoined {
                room_code: "ABC123".into(),
                host: Some("alice".into()),
            },
        ),
        (
            r#"{"type":"gotjoined","user":"bob"}"#,
            ServerEvent::GuestJoined { user: "bob".into() },
        ),
        (
            r#"{"type":"error","message":"Room ABC123 does not exist"}"#,
            ServerEvent::Error {
                message: "Room ABC123 does not exist".into(),
            },
        ),
        (r#"{"type":"bye"}"#, ServerEvent::Bye),
        (
            r#"{"type":"message","id":"7f1c","text":"hi","sender":"bob","timestamp":"1718000000.5"}"#,
            ServerEvent::ChatMessage(ChatMessage {
                id: "7f1c".into(),
                text: "hi".into(),
                sender: "bob".into(),
                timestamp: "1718000000.5".into(),
            }),
        ),
    ];

    for (raw, expected) in cases {
        assert_eq!(decode_event(raw), Some(expected), "decoding {raw}");
    }
}

#[test]
fn relayed_peer_frames_are_unknown() {
    for raw in [
        r#"{"type":"offer","sdp":"v=0\r\n...","from":"bob"}"#,
        r#"{"type":"answer","sdp":"v=0\r\n...","from":"alice"}"#,
        r#"{"type":"file","name":"a.txt"}"#,
    ] {
        assert_eq!(ServerFrame::decode(raw).unwrap(), ServerFrame::Unknown);
        assert!(decode_event(raw).is_none());
    }
}

#[test]
fn extra_fields_are_tolerated() {
    let event = decode_event(r#"{"type":"created","room":"ABC123","password":"x","ttl":30}"#);
    assert_eq!(
        event,
        Some(ServerEvent::RoomCreated {
            room_code: "ABC123".into()
        })
    );
}

#[test]
fn malformed_frames_are_errors() {
    for raw in [
        "",
        "not json",
        "[]",
        r#"{"room":"ABC123"}"#,
        r#"{"type":"created"}"#,
        r#"{"type":"message","id":"m1"}"#,
    ] {
        assert!(
            matches!(ServerFrame::decode(raw), Err(SessionError::Serialization(_))),
            "{raw:?} should not decode"
        );
    }
}
