//! What the user asked for: create a room or join one.

use crate::error::{Result, SessionError};
use crate::protocol::ClientFrame;

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Whether the session creates a new room or joins an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMode {
    Create,
    Join,
}

/// Parameters for creating or joining a room.
///
/// Use [`RoomIntent::create`] or [`RoomIntent::join`] to construct one.
///
/// The session never makes up a room code: a `Create` intent without a code
/// sends an empty room string and adopts whatever code the server assigns.
///
/// # Example
///
/// ```
/// use room_session_client::{RoomIntent, RoomMode};
///
/// let intent = RoomIntent::join("bob", "abc123").with_password("hunter2");
/// let intent = intent.validate().unwrap();
/// assert_eq!(intent.mode, RoomMode::Join);
/// assert_eq!(intent.room_code.as_deref(), Some("ABC123"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomIntent {
    pub mode: RoomMode,
    /// Room code. Required for [`RoomMode::Join`].
    pub room_code: Option<String>,
    /// Name shown to the other participants.
    pub display_name: String,
    /// Room password, if the room has one.
    pub password: Option<String>,
}

impl RoomIntent {
    /// Intent to create a new room as `display_name`.
    pub fn create(display_name: impl Into<String>) -> Self {
        Self {
            mode: RoomMode::Create,
            room_code: None,
            display_name: display_name.into(),
            password: None,
        }
    }

    /// Intent to join room `room_code` as `display_name`.
    pub fn join(display_name: impl Into<String>, room_code: impl Into<String>) -> Self {
        Self {
            mode: RoomMode::Join,
            room_code: Some(room_code.into()),
            display_name: display_name.into(),
            password: None,
        }
    }

    /// Propose a room code.
    #[must_use]
    pub fn with_room_code(mut self, room_code: impl Into<String>) -> Self {
        self.room_code = Some(room_code.into());
        self
    }

    /// Set the room password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Normalize and check the intent before anything is sent.
    ///
    /// Room codes are trimmed and upper-cased, and an empty code counts as
    /// absent. A present code must be [`ROOM_CODE_LEN`] ASCII letters or
    /// digits. Empty passwords count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidIntent`] if the display name is blank,
    /// a `Join` intent has no room code, or the room code is malformed.
    pub fn validate(mut self) -> Result<Self> {
        if self.display_name.trim().is_empty() {
            return Err(SessionError::InvalidIntent(
                "display name must not be empty".into(),
            ));
        }

        self.room_code = self
            .room_code
            .map(|code| code.trim().to_ascii_uppercase())
            .filter(|code| !code.is_empty());
        self.password = self.password.filter(|p| !p.is_empty());

        match (&self.room_code, self.mode) {
            (None, RoomMode::Join) => {
                return Err(SessionError::InvalidIntent(
                    "a room code is required to join a room".into(),
                ));
            }
            (Some(code), _) if !is_valid_room_code(code) => {
                return Err(SessionError::InvalidIntent(format!(
                    "room code {code:?} must be {ROOM_CODE_LEN} letters or digits"
                )));
            }
            _ => {}
        }

        Ok(self)
    }

    /// The join/create request for this intent.
    pub fn to_frame(&self) -> ClientFrame {
        ClientFrame::Join {
            room: self.room_code.clone().unwrap_or_default(),
            from: self.display_name.clone(),
            password: self.password.clone().unwrap_or_default(),
            create: self.mode == RoomMode::Create,
        }
    }
}

fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric())
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
    fn create_without_code_sends_empty_room() {
        let intent = RoomIntent::create("alice").validate().unwrap();
        assert_eq!(
            intent.to_frame(),
            ClientFrame::Join {
                room: String::new(),
                from: "alice".into(),
                password: String::new(),
                create: true,
            }
        );
    }

    #[test]
    fn join_requires_room_code() {
        let mut intent = RoomIntent::join("bob", "ABC123");
        intent.room_code = None;
        assert!(matches!(
            intent.validate(),
            Err(SessionError::InvalidIntent(_))
        ));
        assert!(RoomIntent::join("bob", "   ").validate().is_err());
    }

    #[test]
    fn room_code_is_normalized() {
        let intent = RoomIntent::join("bob", " xy12zz ").validate().unwrap();
        assert_eq!(intent.room_code.as_deref(), Some("XY12ZZ"));
    }

    #[test]
    fn malformed_room_codes_are_rejected() {
        for code in ["ABC", "ABCDEFG", "AB-123", "ÄBC123"] {
            assert!(
                RoomIntent::create("alice")
                    .with_room_code(code)
                    .validate()
                    .is_err(),
                "{code} should be rejected"
            );
        }
    }

    #[test]
    fn blank_display_name_is_rejected() {
        assert!(RoomIntent::create("  ").validate().is_err());
    }

    #[test]
    fn join_frame_carries_password() {
        let intent = RoomIntent::join("bob", "ABC123")
            .with_password("pw")
            .validate()
            .unwrap();
        let ClientFrame::Join {
            room,
            password,
            create,
            ..
        } = intent.to_frame()
        else {
            panic!("expected join frame");
        };
        assert_eq!(room, "ABC123");
        assert_eq!(password, "pw");
        assert!(!create);
    }

    #[test]
    fn empty_password_counts_as_absent() {
        let intent = RoomIntent::create("alice")
            .with_password("")
            .validate()
            .unwrap();
        assert!(intent.password.is_none());
    }
}
