use serde::Serialize;

use crate::error::SessionErrorKind;

/// Lifecycle of one live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Error(SessionErrorKind),
    Closed,
}

impl SessionState {
    /// `Error` and `Closed` end the session instance
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Error(_) | SessionState::Closed)
    }

    /// Status line shown over the visualizer
    pub fn headline(&self, far_end_speaking: bool) -> &'static str {
        match self {
            SessionState::Idle => "",
            SessionState::Connecting => "Starting Live Talk...",
            SessionState::Active if far_end_speaking => "AI is speaking...",
            SessionState::Active => "Listening to you...",
            SessionState::Error(kind) => kind.headline(),
            SessionState::Closed => "Live Talk ended",
        }
    }
}

/// Text of the reply currently being spoken
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, piece: &str) {
        let piece = piece.trim();
        if piece.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(piece);
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Point-in-time view of a session for the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub headline: String,
    pub transcript: String,
    pub far_end_speaking: bool,
    /// Predicted start of the next playback fragment, seconds
    pub cursor: f64,
    pub live_sources: usize,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub fragments_skipped: u64,
    /// Fixed user-facing message when the session failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
}

impl SessionSnapshot {
    pub fn idle(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Idle,
            headline: String::new(),
            transcript: String::new(),
            far_end_speaking: false,
            cursor: 0.0,
            live_sources: 0,
            frames_sent: 0,
            frames_dropped: 0,
            fragments_skipped: 0,
            user_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_joins_with_single_space() {
        let mut transcript = Transcript::new();
        transcript.append("Hello");
        transcript.append(" there ");
        transcript.append("");
        assert_eq!(transcript.as_str(), "Hello there");

        transcript.clear();
        assert!(transcript.is_empty());
        transcript.append("Again");
        assert_eq!(transcript.as_str(), "Again");
    }

    #[test]
    fn test_headlines() {
        assert_eq!(SessionState::Connecting.headline(false), "Starting Live Talk...");
        assert_eq!(SessionState::Active.headline(true), "AI is speaking...");
        assert_eq!(SessionState::Active.headline(false), "Listening to you...");
        assert_eq!(
            SessionState::Error(SessionErrorKind::AuthorizationDenied).headline(false),
            "Authorization Required"
        );
        assert_eq!(
            SessionState::Error(SessionErrorKind::Transport).headline(false),
            "Session Error"
        );
        assert_eq!(SessionState::Closed.headline(false), "Live Talk ended");
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Active.is_terminal());
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut snapshot = SessionSnapshot::idle("abc");
        snapshot.state = SessionState::Error(SessionErrorKind::PermissionDenied);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"]["state"], "error");
        assert_eq!(json["state"]["kind"], "permission_denied");
        assert!(json.get("user_message").is_none());
    }
}
