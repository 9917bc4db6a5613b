//! Session tunables and persisted client settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::ConnectionTarget;
use crate::error::{Result, SessionError};

/// Default capacity of the connection event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown of a connection.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── SessionConfig ───────────────────────────────────────────────────

/// Configuration for a [`RoomSession`](crate::RoomSession).
///
/// The only required field is the server [`ConnectionTarget`]; everything else
/// has a default.
///
/// # Example
///
/// ```
/// use room_session_client::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::from_base_url("http://localhost:5000")
///     .unwrap()
///     .with_event_channel_capacity(64)
///     .with_shutdown_timeout(Duration::from_millis(250));
/// assert_eq!(config.target.endpoint(), "ws://localhost:5000/ws");
/// assert!(config.connect_timeout.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Signaling server to connect to.
    pub target: ConnectionTarget,
    /// Capacity of the channel carrying decoded server events from the
    /// connection to the session.
    ///
    /// The connection waits for room in the channel rather than dropping
    /// frames, so chat history is never lost to backpressure.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`close`](crate::SignalingConnection::close) waits for the
    /// transport to shut down gracefully before aborting the I/O task.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Upper bound on opening the transport. `None` waits as long as the
    /// connector does.
    pub connect_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Create a configuration for `target` with default values.
    pub fn new(target: ConnectionTarget) -> Self {
        Self {
            target,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: None,
        }
    }

    /// Parse `base_url` and create a configuration for it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidEndpoint`] if the address is malformed.
    pub fn from_base_url(base_url: &str) -> Result<Self> {
        Ok(Self::new(ConnectionTarget::parse(base_url)?))
    }

    /// Set the capacity of the event channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bound the time spent opening the transport.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

// ── ClientSettings ──────────────────────────────────────────────────

/// Settings remembered between runs, stored as a small JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Base address of the last signaling server used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

impl ClientSettings {
    /// Read settings from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the file exists but cannot be read and
    /// [`SessionError::Config`] if it is not a valid settings document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw)
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))
    }

    /// Write settings to `path`, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The remembered server as a [`ConnectionTarget`], if one is set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidEndpoint`] if the stored address is
    /// malformed.
    pub fn target(&self) -> Result<Option<ConnectionTarget>> {
        self.server_url
            .as_deref()
            .map(ConnectionTarget::parse)
            .transpose()
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
    fn config_defaults() {
        let config = SessionConfig::from_base_url("https://example.org").unwrap();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.connect_timeout.is_none());
    }

    #[test]
    fn config_builder_methods() {
        let config = SessionConfig::from_base_url("http://a")
            .unwrap()
            .with_event_channel_capacity(0)
            .with_shutdown_timeout(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(3));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn config_rejects_bad_url() {
        assert!(matches!(
            SessionConfig::from_base_url("localhost"),
            Err(SessionError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn settings_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ClientSettings::load(dir.path().join("config.json")).unwrap();
        assert_eq!(settings, ClientSettings::default());
        assert!(settings.target().unwrap().is_none());
    }

    #[test]
    fn settings_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let settings = ClientSettings {
            server_url: Some("http://localhost:5000".into()),
        };
        settings.save(&path).unwrap();

        let loaded = ClientSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(
            loaded.target().unwrap().unwrap().endpoint(),
            "ws://localhost:5000/ws"
        );
    }

    #[test]
    fn settings_ignore_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server_url":"https://x","theme":"dark"}"#).unwrap();
        let loaded = ClientSettings::load(&path).unwrap();
        assert_eq!(loaded.server_url.as_deref(), Some("https://x"));
    }

    #[test]
    fn settings_reject_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ClientSettings::load(&path),
            Err(SessionError::Config(_))
        ));
    }
}
