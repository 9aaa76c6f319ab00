//! Gemini Live client over WebSocket (BidiGenerateContent).
//!
//! The session is opened by sending a `setup` message and waiting for
//! `setupComplete`; after that the socket is split into an outbound task
//! that forwards microphone chunks as `realtimeInput` and an inbound task
//! that turns `serverContent` into [`RemoteEvent`]s.
//!
//! The service delivers JSON in Binary frames as well as Text frames, so
//! both are parsed.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{
    AudioChunk, LiveConfig, LiveConnection, LiveSender, LiveTransport, RemoteErrorDetails,
    RemoteEvent, ResponseModality,
};
use crate::config::VoiceConfig;
use crate::error::VoiceError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Microphone chunks waiting for the socket (about 16s of audio)
const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

// ── Setup message ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SetupMessage {
    setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupPayload {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: PrebuiltVoice,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoice {
    prebuilt_voice_config: VoiceName,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceName {
    voice_name: String,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

/// Serializes as `{}`, which enables transcription with defaults
#[derive(Debug, Serialize)]
struct TranscriptionConfig {}

fn build_setup_message(config: &LiveConfig) -> SetupMessage {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };
    let modality = match config.response_modality {
        ResponseModality::Audio => "AUDIO",
        ResponseModality::Text => "TEXT",
    };

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![modality],
                speech_config: SpeechConfig {
                    voice_config: PrebuiltVoice {
                        prebuilt_voice_config: VoiceName {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
            output_audio_transcription: config.output_transcription.then_some(TranscriptionConfig {}),
        },
    }
}

// ── Audio input message ────────────────────────────────────────────

/// Wire format: `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}]}}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

fn build_audio_message(chunk: &AudioChunk) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: chunk.mime_type(),
                data: chunk.to_base64(),
            }],
        },
    }
}

// ── Server messages ────────────────────────────────────────────────

/// Parse one JSON server message into events, in the order the session
/// consumes them: transcript, then audio, then interruption.
pub fn parse_server_message(json_text: &str) -> Result<Vec<RemoteEvent>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(json_text)?;
    let mut events = Vec::new();

    let content = value.get("serverContent");

    // Transcription may sit inside serverContent or at the top level
    let transcription = content
        .and_then(|c| c.get("outputTranscription"))
        .or_else(|| value.get("outputTranscription"));
    if let Some(text) = transcription
        .and_then(|t| t.get("text"))
        .and_then(|v| v.as_str())
    {
        if !text.is_empty() {
            events.push(RemoteEvent::PartialTranscript(text.to_string()));
        }
    }

    if let Some(content) = content {
        if let Some(parts) = content
            .pointer("/modelTurn/parts")
            .and_then(|v| v.as_array())
        {
            for part in parts {
                let Some(inline) = part.get("inlineData") else {
                    continue;
                };
                let is_audio = inline
                    .get("mimeType")
                    .and_then(|v| v.as_str())
                    .map(|mime| mime.starts_with("audio/"))
                    .unwrap_or(true);
                if let (true, Some(data)) = (is_audio, inline.get("data").and_then(|v| v.as_str())) {
                    events.push(RemoteEvent::AudioFragment(data.to_string()));
                }
            }
        }

        if content.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
            events.push(RemoteEvent::Interrupted);
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown server error");
        let message = match err.get("status").and_then(|v| v.as_str()) {
            Some(status) => format!("{}: {}", status, message),
            None => message.to_string(),
        };
        let details = match err.get("code").and_then(|v| v.as_u64()) {
            Some(code) => RemoteErrorDetails::with_code(message, code.min(u16::MAX as u64) as u16),
            None => RemoteErrorDetails::new(message),
        };
        events.push(RemoteEvent::Error(details));
    }

    Ok(events)
}

/// Setup acknowledgement: a top-level `setupComplete` key
fn is_setup_complete(json_text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(json_text)
        .map(|value| value.get("setupComplete").is_some())
        .unwrap_or(false)
}

/// A normal close ends the session; anything else is a failure the user
/// should hear about.
fn close_event(frame: Option<&CloseFrame>) -> RemoteEvent {
    let Some(frame) = frame else {
        return RemoteEvent::Closed;
    };

    let code = u16::from(frame.code);
    let reason = frame.reason.as_str().to_string();
    let details = if reason.is_empty() {
        RemoteErrorDetails::with_code(format!("Connection closed with code {}", code), code)
    } else {
        RemoteErrorDetails::with_code(reason, code)
    };

    match frame.code {
        CloseCode::Normal | CloseCode::Away if !details.is_authorization_failure() => {
            RemoteEvent::Closed
        }
        _ => RemoteEvent::Error(details),
    }
}

/// JSON payload of a Text frame, or of a Binary frame that carries JSON
fn frame_json(msg: &WsMessage) -> Option<&str> {
    match msg {
        WsMessage::Text(text) => Some(text.as_str()),
        WsMessage::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

fn map_connect_error(e: tungstenite::Error) -> VoiceError {
    match &e {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let body = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            RemoteErrorDetails::with_code(format!("HTTP {}: {}", status, body), status).into_error()
        }
        _ => VoiceError::Transport(format!("Failed to connect to live service: {}", e)),
    }
}

// ── Transport ──────────────────────────────────────────────────────

/// [`LiveTransport`] backed by the Gemini Live WebSocket endpoint
pub struct GeminiLiveTransport {
    endpoint: String,
    api_key: String,
    setup_timeout: Duration,
}

impl GeminiLiveTransport {
    pub fn new(config: &VoiceConfig) -> Result<Self, VoiceError> {
        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.resolve_api_key()?,
            setup_timeout: Duration::from_secs(config.setup_timeout_secs),
        })
    }

    /// Use a different key, e.g. after the user picked a new one
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    async fn await_setup_complete(
        ws: &mut WsStream,
        session_id: &str,
    ) -> Result<(), VoiceError> {
        while let Some(msg) = ws.next().await {
            let msg = msg.map_err(|e| {
                VoiceError::Transport(format!("WebSocket error before setupComplete: {}", e))
            })?;

            if let WsMessage::Close(frame) = &msg {
                return Err(match close_event(frame.as_ref()) {
                    RemoteEvent::Error(details) => details.into_error(),
                    _ => VoiceError::Transport("Connection closed before setupComplete".to_string()),
                });
            }

            let Some(text) = frame_json(&msg) else {
                tracing::debug!(session_id = %session_id, "Setup phase: skipping non-JSON frame");
                continue;
            };
            if is_setup_complete(text) {
                return Ok(());
            }
            if let Ok(events) = parse_server_message(text) {
                for event in events {
                    if let RemoteEvent::Error(details) = event {
                        return Err(details.into_error());
                    }
                }
            }
        }

        Err(VoiceError::Transport(
            "Stream ended before setupComplete".to_string(),
        ))
    }

    async fn outbound_loop(
        mut rx: mpsc::Receiver<AudioChunk>,
        mut sink: WsSink,
        shutdown: Arc<Notify>,
        session_id: String,
    ) {
        let mut sent: u64 = 0;
        let mut total_bytes: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                chunk = rx.recv() => {
                    let Some(chunk) = chunk else { break };
                    sent += 1;
                    total_bytes += chunk.pcm.len() as u64;

                    let json = match serde_json::to_string(&build_audio_message(&chunk)) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(session_id = %session_id, error = %e, "Failed to serialize audio chunk");
                            continue;
                        }
                    };

                    // Log first chunk and every 50th
                    if sent == 1 || sent % 50 == 0 {
                        tracing::info!(
                            session_id = %session_id,
                            chunk = chunk.seq,
                            sent,
                            total_bytes,
                            "Sending audio to live service"
                        );
                    }

                    if sink.send(WsMessage::Text(json.into())).await.is_err() {
                        tracing::warn!(session_id = %session_id, "WebSocket send failed, closing outbound loop");
                        return;
                    }
                }
            }
        }

        let _ = sink.send(WsMessage::Close(None)).await;
        tracing::debug!(session_id = %session_id, sent, "Outbound loop terminated");
    }

    async fn inbound_loop(mut source: WsSource, events: mpsc::Sender<RemoteEvent>, session_id: String) {
        let mut fragments: u64 = 0;

        let last = loop {
            let Some(msg) = source.next().await else {
                break RemoteEvent::Closed;
            };
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Live WebSocket error");
                    break RemoteEvent::Error(RemoteErrorDetails::new(format!("WebSocket error: {}", e)));
                }
            };

            if let WsMessage::Close(frame) = &msg {
                tracing::info!(session_id = %session_id, close_frame = ?frame, "Live connection closed");
                break close_event(frame.as_ref());
            }

            let Some(text) = frame_json(&msg) else {
                if let WsMessage::Binary(data) = &msg {
                    tracing::warn!(session_id = %session_id, len = data.len(), "Unexpected non-JSON binary frame, skipping");
                }
                continue;
            };

            let parsed = match parse_server_message(text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping unparseable server message");
                    continue;
                }
            };

            for event in parsed {
                if let RemoteEvent::AudioFragment(data) = &event {
                    fragments += 1;
                    tracing::debug!(session_id = %session_id, fragments, bytes = data.len(), "Audio fragment received");
                }
                if events.send(event).await.is_err() {
                    tracing::debug!(session_id = %session_id, "Event receiver dropped, closing inbound loop");
                    return;
                }
            }
        };

        let _ = events.send(last).await;
        tracing::debug!(session_id = %session_id, fragments, "Inbound loop terminated");
    }
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn open(&self, config: &LiveConfig) -> Result<LiveConnection, VoiceError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}?key={}", self.endpoint, self.api_key);

        tracing::info!(
            session_id = %session_id,
            model = %config.model,
            voice = %config.voice_name,
            "Connecting to live service"
        );

        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(map_connect_error)?;

        let setup = serde_json::to_string(&build_setup_message(config))
            .map_err(|e| VoiceError::Transport(format!("Failed to serialize setup: {}", e)))?;
        ws.send(WsMessage::Text(setup.into()))
            .await
            .map_err(|e| VoiceError::Transport(format!("Failed to send setup message: {}", e)))?;

        match tokio::time::timeout(self.setup_timeout, Self::await_setup_complete(&mut ws, &session_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VoiceError::Transport(format!(
                    "setupComplete timeout ({}s)",
                    self.setup_timeout.as_secs()
                )))
            }
        }
        tracing::info!(session_id = %session_id, "Live session ready");

        let (sink, source) = ws.split();
        let (chunk_tx, chunk_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(Self::outbound_loop(chunk_rx, sink, shutdown.clone(), session_id.clone()));
        tokio::spawn(Self::inbound_loop(source, event_tx, session_id));

        Ok(LiveConnection {
            sender: Box::new(GeminiSender {
                outbound: chunk_tx,
                shutdown,
                closed: AtomicBool::new(false),
            }),
            events: event_rx,
        })
    }
}

struct GeminiSender {
    outbound: mpsc::Sender<AudioChunk>,
    shutdown: Arc<Notify>,
    closed: AtomicBool,
}

impl LiveSender for GeminiSender {
    fn send_audio(&self, chunk: AudioChunk) -> Result<(), VoiceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::FrameSendFailure(format!(
                "Session closed, dropped chunk {}",
                chunk.seq
            )));
        }
        self.outbound.try_send(chunk).map_err(|e| match e {
            TrySendError::Full(chunk) => {
                VoiceError::FrameSendFailure(format!("Outbound queue full, dropped chunk {}", chunk.seq))
            }
            TrySendError::Closed(chunk) => {
                VoiceError::FrameSendFailure(format!("Connection gone, dropped chunk {}", chunk.seq))
            }
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }
}

impl Drop for GeminiSender {
    fn drop(&mut self) {
        self.close();
    }
}
