#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for `RoomSession`.
//!
//! A `MockConnector` hands the session scripted transports; the tests play
//! the server through the returned `ServerHandle` and check the published
//! state, the message log and the frames the client sent.

mod common;

use std::time::Duration;

use room_session_client::{
    FailureReason, Role, RoomIntent, RoomSession, SessionConfig, SessionError, SessionState,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::{
    bye_json, chat_json, created_json, error_json, frame, gotjoined_json, init_tracing,
    joined_json, MockConnector, ServerHandle,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn config() -> SessionConfig {
    SessionConfig::from_base_url("http://localhost:5000/")
        .unwrap()
        .with_shutdown_timeout(Duration::from_millis(200))
}

fn session() -> (RoomSession, MockConnector) {
    init_tracing();
    let connector = MockConnector::new();
    (RoomSession::new(config(), connector.clone()), connector)
}

/// Wait for a state matching `pred`, failing after a second.
async fn wait_until(session: &RoomSession, pred: impl Fn(&SessionState) -> bool) -> SessionState {
    let mut rx = session.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for state")
        .unwrap()
        .clone();
    state
}

/// Host a room with code `code` and return the server handle.
async fn host(session: &mut RoomSession, connector: &MockConnector, code: &str) -> ServerHandle {
    let server = connector.script(vec![]);
    session.submit(RoomIntent::create("alice")).await.unwrap();
    server.wait_for_sent(1).await;
    server.push(created_json(code));
    let state = session.wait_for_settled().await;
    assert!(state.is_active(), "expected active, got {state:?}");
    server
}

// ════════════════════════════════════════════════════════════════════
// Create / join
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_room_scenario() {
    let (mut session, connector) = session();
    let server = connector.script(vec![]);

    assert_ok!(session.submit(RoomIntent::create("alice")).await);
    assert_eq!(session.state(), SessionState::Connecting);

    let sent = server.wait_for_sent(1).await;
    assert_eq!(
        sent[0],
        json!({"type": "join", "room": "", "from": "alice", "password": "", "create": true})
    );
    assert_eq!(connector.endpoints(), ["ws://localhost:5000/ws"]);

    server.push(created_json("ABC123"));
    assert_eq!(
        session.wait_for_settled().await,
        SessionState::Active {
            room_code: "ABC123".into(),
            role: Role::Host,
            peer: None,
        }
    );
    // Only the join request; nothing else until the user acts.
    assert_eq!(server.sent().len(), 1);

    session.leave().await;
}

#[tokio::test]
async fn server_assigned_code_wins() {
    let (mut session, connector) = session();
    let server = connector.script(vec![]);

    session
        .submit(RoomIntent::create("alice").with_room_code("mine01"))
        .await
        .unwrap();
    let sent = server.wait_for_sent(1).await;
    assert_eq!(sent[0]["room"], "MINE01");

    server.push(created_json("SRV777"));
    let state = session.wait_for_settled().await;
    assert_eq!(state.room_code(), Some("SRV777"));
    session.leave().await;
}

#[tokio::test]
async fn join_room_as_guest() {
    let (mut session, connector) = session();
    let server = connector.script(vec![]);

    session
        .submit(RoomIntent::join("bob", "abc123").with_password("pw"))
        .await
        .unwrap();
    let sent = server.wait_for_sent(1).await;
    assert_eq!(
        sent[0],
        json!({"type": "join", "room": "ABC123", "from": "bob", "password": "pw", "create": false})
    );

    server.push(joined_json("ABC123", "alice"));
    assert_eq!(
        session.wait_for_settled().await,
        SessionState::Active {
            room_code: "ABC123".into(),
            role: Role::Guest,
            peer: Some("alice".into()),
        }
    );
    session.leave().await;
}

#[tokio::test]
async fn wrong_password_fails_with_server_message() {
    let (mut session, connector) = session();
    let server = connector.script(vec![]);

    session
        .submit(RoomIntent::join("bob", "ABC123").with_password("nope"))
        .await
        .unwrap();
    server.wait_for_sent(1).await;
    server.push(error_json("Incorrect password"));

    assert_eq!(
        session.wait_for_settled().await,
        SessionState::Failed {
            reason: FailureReason::Server("Incorrect password".into())
        }
    );
    assert!(session.messages().await.is_empty());

    // The controller tears the connection down after a server rejection.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.is_closed());
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let (mut session, connector) = session();
    connector.refuse("connection refused");

    session.submit(RoomIntent::create("alice")).await.unwrap();
    let state = session.wait_for_settled().await;
    let SessionState::Failed {
        reason: FailureReason::Connect(detail),
    } = state
    else {
        panic!("expected connect failure, got {state:?}");
    };
    assert!(detail.contains("connection refused"));
}

#[tokio::test]
async fn retry_after_failure_uses_fresh_connection() {
    let (mut session, connector) = session();
    connector.refuse("down");
    session.submit(RoomIntent::create("alice")).await.unwrap();
    assert!(matches!(
        session.wait_for_settled().await,
        SessionState::Failed { .. }
    ));

    let server = connector.script(vec![]);
    session.submit(RoomIntent::create("alice")).await.unwrap();
    server.wait_for_sent(1).await;
    server.push(created_json("ABC123"));
    assert!(session.wait_for_settled().await.is_active());
    assert_eq!(connector.calls(), 2);
    session.leave().await;
}

#[tokio::test]
async fn submit_while_busy_is_rejected() {
    let (mut session, connector) = session();
    let _server = host(&mut session, &connector, "ABC123").await;

    let err = assert_err!(session.submit(RoomIntent::join("alice", "XYZ789")).await);
    assert!(matches!(err, SessionError::SessionBusy));
    assert_eq!(connector.calls(), 1);
    session.leave().await;
}

#[tokio::test]
async fn invalid_intent_never_connects() {
    let (mut session, connector) = session();
    let err = session
        .submit(RoomIntent::join("bob", "TOO-LONG"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidIntent(_)));
    assert_eq!(connector.calls(), 0);
    assert_eq!(session.state(), SessionState::Idle);
}

// ════════════════════════════════════════════════════════════════════
// Events while active
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn duplicate_messages_are_logged_once() {
    let (mut session, connector) = session();
    let server = host(&mut session, &connector, "ABC123").await;

    server.push(chat_json("m1", "bob", "hi"));
    server.push(chat_json("m1", "bob", "hi"));
    server.push(chat_json("m2", "bob", "still here"));
    // A bye afterwards marks the end of the stream so the log is settled.
    server.push(bye_json());
    wait_until(&session, |s| matches!(s, SessionState::Failed { .. })).await;

    let ids: Vec<_> = session
        .messages()
        .await
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, ["m1", "m2"]);
}

#[tokio::test]
async fn stale_confirmation_is_ignored() {
    let (mut session, connector) = session();
    let server = host(&mut session, &connector, "ABC123").await;

    server.push(created_json("OTHER1"));
    server.push(chat_json("m1", "bob", "hi"));
    for _ in 0..100 {
        if !session.messages().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(session.messages().await.len(), 1);
    assert_eq!(session.state().room_code(), Some("ABC123"));
    session.leave().await;
}

#[tokio::test]
async fn host_sees_guests_join() {
    let (mut session, connector) = session();
    let server = host(&mut session, &connector, "ABC123").await;

    server.push(gotjoined_json("bob"));
    let state = wait_until(&session, |s| {
        matches!(s, SessionState::Active { peer: Some(_), .. })
    })
    .await;
    assert_eq!(
        state,
        SessionState::Active {
            room_code: "ABC123".into(),
            role: Role::Host,
            peer: Some("bob".into()),
        }
    );
    assert_eq!(session.guests().await, ["bob"]);
    session.leave().await;
}

#[tokio::test]
async fn send_chat_goes_out_but_is_not_logged_locally() {
    let (mut session, connector) = session();
    let server = host(&mut session, &connector, "ABC123").await;

    assert_ok!(session.send_chat("hello").await);
    let sent = server.wait_for_sent(2).await;
    assert_eq!(
        sent[1],
        json!({"type": "message", "room": "ABC123", "from": "alice", "text": "hello"})
    );
    assert!(session.messages().await.is_empty());

    server.push(chat_json("m1", "alice", "hello"));
    for _ in 0..100 {
        if !session.messages().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(session.messages().await[0].text, "hello");
    session.leave().await;
}

#[tokio::test]
async fn send_chat_requires_active_room() {
    let (mut session, connector) = session();
    assert!(matches!(
        session.send_chat("hi").await,
        Err(SessionError::NotActive)
    ));

    let server = connector.script(vec![]);
    session.submit(RoomIntent::create("alice")).await.unwrap();
    server.wait_for_sent(1).await;
    assert!(matches!(
        session.send_chat("hi").await,
        Err(SessionError::NotActive)
    ));
    assert_eq!(server.sent().len(), 1);
    session.leave().await;
}

#[tokio::test]
async fn blank_chat_is_rejected() {
    let (mut session, connector) = session();
    let server = host(&mut session, &connector, "ABC123").await;
    assert!(matches!(
        session.send_chat("   ").await,
        Err(SessionError::InvalidIntent(_))
    ));
    assert_eq!(server.sent().len(), 1);
    session.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// Teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn leave_from_active_resets_everything() {
    let (mut session, connector) = session();
    let server = host(&mut session, &connector, "ABC123").await;
    server.push(chat_json("m1", "bob", "hi"));
    for _ in 0..100 {
        if !session.messages().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    session.leave().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.messages().await.is_empty());
    assert!(session.guests().await.is_empty());
    assert!(server.is_closed());

    // Nothing the server sends afterwards is applied.
    server.push(chat_json("m2", "bob", "anyone?"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.messages().await.is_empty());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn leave_when_idle_is_a_noop() {
    let (mut session, connector) = session();
    let mut rx = session.subscribe();
    session.leave().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!rx.has_changed().unwrap());
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn leave_while_connecting_cancels_attempt() {
    let (mut session, connector) = session();
    let server = connector.script(vec![]);
    session.submit(RoomIntent::create("alice")).await.unwrap();
    server.wait_for_sent(1).await;

    session.leave().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(server.is_closed());

    // A late confirmation does not resurrect the session.
    server.push(created_json("ABC123"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn server_hang_up_is_connection_lost() {
    let (mut session, connector) = session();
    let server = host(&mut session, &connector, "ABC123").await;

    server.hang_up();
    assert_eq!(
        wait_until(&session, |s| !s.is_active()).await,
        SessionState::Failed {
            reason: FailureReason::ConnectionLost(None)
        }
    );
}

#[tokio::test]
async fn receive_error_is_connection_lost() {
    let (mut session, connector) = session();
    let server = connector.script(vec![
        frame(created_json("ABC123")),
        Some(Err(SessionError::TransportReceive("reset by peer".into()))),
    ]);
    session.submit(RoomIntent::create("alice")).await.unwrap();

    let state = wait_until(&session, |s| matches!(s, SessionState::Failed { .. })).await;
    assert!(matches!(
        state,
        SessionState::Failed {
            reason: FailureReason::ConnectionLost(Some(ref detail))
        } if detail.contains("reset by peer")
    ));
    drop(server);
}

#[tokio::test]
async fn bye_ends_the_session() {
    let (mut session, connector) = session();
    let server = host(&mut session, &connector, "ABC123").await;

    server.push(bye_json());
    let state = wait_until(&session, |s| !s.is_active()).await;
    assert!(matches!(
        state,
        SessionState::Failed {
            reason: FailureReason::ConnectionLost(Some(_))
        }
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.is_closed());
}

#[tokio::test]
async fn observers_see_each_transition() {
    let (mut session, connector) = session();
    let mut rx = session.subscribe();
    let server = connector.script(vec![]);

    session.submit(RoomIntent::create("alice")).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), SessionState::Connecting);

    server.wait_for_sent(1).await;
    server.push(created_json("ABC123"));
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_active());

    session.leave().await;
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), SessionState::Idle);
}
