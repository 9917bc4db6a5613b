//! # Room Chat Example
//!
//! Creates or joins a room and chats from the terminal:
//!
//! 1. Resolve the server from `ROOM_SERVER_URL` or `./config.json`
//! 2. Create a room, or join one when a room code is given
//! 3. Print chat messages as the server relays them
//! 4. Send every line typed on stdin; `/quit` or Ctrl+C leaves the room
//!
//! ## Running
//!
//! ```sh
//! # Host a new room as "alice":
//! cargo run --example room_chat -- alice
//!
//! # Join room ABC123 as "bob" with a password:
//! ROOM_SERVER_URL=https://rooms.example.org cargo run --example room_chat -- bob ABC123 hunter2
//! ```

use std::time::Duration;

use room_session_client::{ClientSettings, RoomIntent, RoomSession, SessionConfig, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_URL: &str = "http://localhost:5000";
const SETTINGS_FILE: &str = "config.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let mut settings = ClientSettings::load(SETTINGS_FILE)?;
    if let Ok(url) = std::env::var("ROOM_SERVER_URL") {
        settings.server_url = Some(url);
    }
    let target = settings
        .target()?
        .unwrap_or(DEFAULT_URL.parse()?);
    settings.server_url = Some(target.to_string());
    settings.save(SETTINGS_FILE)?;

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "guest".to_string());
    let intent = match (args.next(), args.next()) {
        (Some(code), Some(password)) => RoomIntent::join(&name, code).with_password(password),
        (Some(code), None) => RoomIntent::join(&name, code),
        _ => RoomIntent::create(&name),
    };

    // ── Create / join ───────────────────────────────────────────────
    let config = SessionConfig::new(target).with_connect_timeout(Duration::from_secs(10));
    let mut session = RoomSession::websocket(config);
    session.submit(intent).await?;

    let settled = tokio::time::timeout(Duration::from_secs(15), session.wait_for_settled()).await;
    match settled {
        Ok(SessionState::Active {
            room_code, peer, ..
        }) => {
            tracing::info!("In room {room_code} (peer: {peer:?}). Type to chat, /quit to leave.");
        }
        Ok(SessionState::Failed { reason }) => {
            tracing::error!("{reason}");
            return Ok(());
        }
        Ok(other) => {
            tracing::warn!("unexpected state {other:?}");
            return Ok(());
        }
        Err(_) => {
            tracing::error!("timed out waiting for the server; is it running?");
            session.leave().await;
            return Ok(());
        }
    }

    // ── Chat loop ───────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state_rx = session.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let mut printed = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim() == "/quit" => break,
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => session.send_chat(&line).await?,
                    None => break,
                }
            }

            _ = ticker.tick() => {
                let messages = session.messages().await;
                for message in messages.iter().skip(printed) {
                    println!("[{}] {}: {}", message.timestamp, message.sender, message.text);
                }
                printed = messages.len();
            }

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                match state {
                    SessionState::Active { peer: Some(peer), .. } => {
                        tracing::info!("{peer} is here");
                    }
                    SessionState::Failed { reason } => {
                        tracing::warn!("{reason}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    session.leave().await;
    tracing::info!("Left the room");
    Ok(())
}
