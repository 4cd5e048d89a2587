//! Status events broadcast to observers of a live session.
//!
//! Serialized camelCase so a front end can consume them as JSON.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Lifecycle of a live session.
///
/// `Idle → Connecting → Active → Closing → Idle`. A failed start and a
/// transport error both go straight back to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session. Devices released.
    #[default]
    Idle,
    /// Devices opened, waiting for the remote side to accept.
    Connecting,
    /// Microphone streaming and model audio playing.
    Active,
    /// Tearing down.
    Closing,
}

impl SessionState {
    /// `true` for `Connecting` and `Active`.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

// ---------------------------------------------------------------------------
// Status events
// ---------------------------------------------------------------------------

/// Emitted whenever the session state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionState,
    /// Optional human-readable detail (e.g. the error that ended a session).
    pub detail: Option<String>,
}

impl SessionStatusEvent {
    pub fn new(status: SessionState) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    pub fn with_detail(status: SessionState, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_lowercase_state_and_detail() {
        let event = SessionStatusEvent::with_detail(SessionState::Idle, "socket reset");
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "idle");
        assert_eq!(json["detail"], "socket reset");
    }

    #[test]
    fn status_event_round_trips() {
        let json = r#"{"status":"connecting","detail":null}"#;
        let event: SessionStatusEvent = serde_json::from_str(json).expect("deserialize");
        assert_eq!(event, SessionStatusEvent::new(SessionState::Connecting));
    }

    #[test]
    fn only_connecting_and_active_are_live() {
        assert!(!SessionState::Idle.is_live());
        assert!(SessionState::Connecting.is_live());
        assert!(SessionState::Active.is_live());
        assert!(!SessionState::Closing.is_live());
        assert_eq!(SessionState::default(), SessionState::Idle);
    }
}
