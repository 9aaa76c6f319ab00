//! Remote live-session service, seen from the client as an opaque
//! bidirectional stream: open, send audio, receive events, close.

mod gemini;

pub use gemini::{parse_server_message, GeminiLiveTransport};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::audio::{pcm, AudioFrame, INPUT_SAMPLE_RATE};
use crate::config::VoiceConfig;
use crate::error::VoiceError;

/// What the service should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Parameters sent when a session is opened
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice_name: String,
    pub system_instruction: String,
    pub output_transcription: bool,
}

impl From<&VoiceConfig> for LiveConfig {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            model: config.model.clone(),
            response_modality: ResponseModality::Audio,
            voice_name: config.voice_name.clone(),
            system_instruction: config.system_instruction.clone(),
            output_transcription: config.output_transcription,
        }
    }
}

/// One encoded microphone frame on its way out
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub seq: u64,
    /// PCM16 little-endian
    pub pcm: Bytes,
}

impl AudioChunk {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            seq: frame.seq,
            pcm: Bytes::from(pcm::encode(&frame.samples)),
        }
    }

    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", INPUT_SAMPLE_RATE)
    }

    /// Printable form used on the wire
    pub fn to_base64(&self) -> String {
        pcm::to_base64(&self.pcm)
    }
}

/// Error reported by the service, kept away from the user
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteErrorDetails {
    pub message: String,
    /// HTTP status or WebSocket close code, when known
    pub code: Option<u16>,
}

impl RemoteErrorDetails {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Whether the credential or its entitlement was rejected
    pub fn is_authorization_failure(&self) -> bool {
        if matches!(self.code, Some(401) | Some(403)) {
            return true;
        }
        let upper = self.message.to_uppercase();
        ["PERMISSION_DENIED", "UNAUTHENTICATED", "API_KEY_INVALID", "API KEY NOT VALID"]
            .iter()
            .any(|marker| upper.contains(marker))
    }

    pub fn into_error(self) -> VoiceError {
        if self.is_authorization_failure() {
            VoiceError::AuthorizationDenied(self.message)
        } else {
            VoiceError::Transport(self.message)
        }
    }
}

/// Events pushed by the service, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Base64 PCM16 audio at the output rate
    AudioFragment(String),
    PartialTranscript(String),
    /// The user barged in while the reply was playing
    Interrupted,
    Error(RemoteErrorDetails),
    Closed,
}

/// Outbound half of an open session
pub trait LiveSender: Send {
    /// Queue one chunk without waiting. A full or closed queue is a
    /// `FrameSendFailure`; the chunk is dropped.
    fn send_audio(&self, chunk: AudioChunk) -> Result<(), VoiceError>;

    /// Ask the service to end the session. Calling twice is a no-op.
    fn close(&self);
}

/// An open session: outbound handle plus the ordered inbound event stream
pub struct LiveConnection {
    pub sender: Box<dyn LiveSender>,
    pub events: mpsc::Receiver<RemoteEvent>,
}

#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open a session; resolves once the service confirms it
    async fn open(&self, config: &LiveConfig) -> Result<LiveConnection, VoiceError>;
}

/// Side channel asking the user to pick another credential
pub trait CredentialPrompt: Send + Sync {
    fn prompt_reselect(&self);
}

impl<F> CredentialPrompt for F
where
    F: Fn() + Send + Sync,
{
    fn prompt_reselect(&self) {
        self()
    }
}
