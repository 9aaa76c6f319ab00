use serde::Serialize;
use thiserror::Error;

/// Errors raised anywhere in the voice pipeline.
///
/// Only the terminal kinds end a session; `FrameSendFailure` and
/// `DecodeFailure` are absorbed by the controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("Live service rejected the credential: {0}")]
    AuthorizationDenied(String),
    #[error("Live session failed: {0}")]
    Transport(String),
    #[error("Failed to send audio frame: {0}")]
    FrameSendFailure(String),
    #[error("Failed to decode audio fragment: {0}")]
    DecodeFailure(String),
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl VoiceError {
    /// Terminal kind for a session, `None` for errors recovered per frame.
    pub fn session_kind(&self) -> Option<SessionErrorKind> {
        match self {
            VoiceError::PermissionDenied(_) => Some(SessionErrorKind::PermissionDenied),
            VoiceError::AuthorizationDenied(_) => Some(SessionErrorKind::AuthorizationDenied),
            VoiceError::Transport(_) | VoiceError::Config(_) => Some(SessionErrorKind::Transport),
            VoiceError::Device(_) => Some(SessionErrorKind::Device),
            VoiceError::FrameSendFailure(_) | VoiceError::DecodeFailure(_) => None,
        }
    }
}

/// Why a session ended in the `Error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    PermissionDenied,
    AuthorizationDenied,
    Transport,
    Device,
}

impl SessionErrorKind {
    /// Message shown to the user. Remote payloads never leak through here.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionErrorKind::PermissionDenied => {
                "Microphone access was denied. Allow microphone access and try again."
            }
            SessionErrorKind::AuthorizationDenied => {
                "Authorization Error: Please select a valid paid-tier API Key."
            }
            SessionErrorKind::Transport => "An error occurred during the session.",
            SessionErrorKind::Device => "No usable audio device was found.",
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            SessionErrorKind::AuthorizationDenied => "Authorization Required",
            _ => "Session Error",
        }
    }
}
