use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::state::{SessionSnapshot, SessionState, Transcript};
use crate::audio::{
    pcm, AudioCapture, AudioFragment, AudioFrame, AudioHost, CaptureContext, FrequencyAnalyzer,
    PlaybackScheduler, SourceId, SpectrumTap, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
use crate::error::{SessionErrorKind, VoiceError};
use crate::remote::{AudioChunk, CredentialPrompt, LiveConfig, LiveSender, LiveTransport, RemoteEvent};
use crate::visualizer::{Renderer, VisualizerLoop, VisualizerOptions};

/// Requests from the UI to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    EndTalk,
}

#[derive(Debug, Default, Clone, Copy)]
struct SessionStats {
    frames_sent: u64,
    frames_dropped: u64,
    fragments_skipped: u64,
}

/// Owns one live voice session from open to teardown.
///
/// All session state is mutated from a single task: hardware callbacks
/// and the remote transport only push into queues that [`run`](Self::run)
/// (or [`pump`](Self::pump) in tests) drains.
pub struct SessionController {
    session_id: String,
    host: Arc<dyn AudioHost>,
    transport: Arc<dyn LiveTransport>,
    prompt: Arc<dyn CredentialPrompt>,
    live_config: LiveConfig,
    renderer: Option<Box<dyn Renderer>>,
    visualizer_options: VisualizerOptions,

    state: SessionState,
    transcript: Transcript,
    far_end_speaking: Arc<AtomicBool>,
    stats: SessionStats,
    next_fragment: u64,

    // Resources, each released at most once through `Option::take`
    capture_context: Option<Box<dyn CaptureContext>>,
    capture: Option<AudioCapture>,
    playback: Option<PlaybackScheduler>,
    visualizer: Option<VisualizerLoop>,
    sender: Option<Box<dyn LiveSender>>,
    remote_events: Option<mpsc::Receiver<RemoteEvent>>,

    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    frame_rx: mpsc::UnboundedReceiver<AudioFrame>,
    ended_tx: mpsc::UnboundedSender<SourceId>,
    ended_rx: mpsc::UnboundedReceiver<SourceId>,
    status_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn new(
        host: Arc<dyn AudioHost>,
        transport: Arc<dyn LiveTransport>,
        prompt: Arc<dyn CredentialPrompt>,
        live_config: LiveConfig,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SessionSnapshot::idle(session_id.clone()));

        Self {
            session_id,
            host,
            transport,
            prompt,
            live_config,
            renderer: None,
            visualizer_options: VisualizerOptions::default(),
            state: SessionState::Idle,
            transcript: Transcript::new(),
            far_end_speaking: Arc::new(AtomicBool::new(false)),
            stats: SessionStats::default(),
            next_fragment: 0,
            capture_context: None,
            capture: None,
            playback: None,
            visualizer: None,
            sender: None,
            remote_events: None,
            frame_tx,
            frame_rx,
            ended_tx,
            ended_rx,
            status_tx,
        }
    }

    /// Draw the microphone level while the session is live
    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>, options: VisualizerOptions) -> Self {
        self.renderer = Some(renderer);
        self.visualizer_options = options;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &str {
        self.transcript.as_str()
    }

    pub fn far_end_speaking(&self) -> bool {
        self.far_end_speaking.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let speaking = self.far_end_speaking();
        SessionSnapshot {
            session_id: self.session_id.clone(),
            state: self.state,
            headline: self.state.headline(speaking).to_string(),
            transcript: self.transcript.as_str().to_string(),
            far_end_speaking: speaking,
            cursor: self.playback.as_ref().map(|p| p.cursor()).unwrap_or(0.0),
            live_sources: self.playback.as_ref().map(|p| p.live_count()).unwrap_or(0),
            frames_sent: self.stats.frames_sent,
            frames_dropped: self.stats.frames_dropped,
            fragments_skipped: self.stats.fragments_skipped,
            user_message: match self.state {
                SessionState::Error(kind) => Some(kind.user_message().to_string()),
                _ => None,
            },
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.snapshot());
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::info!(session_id = %self.session_id, from = ?self.state, to = ?state, "Session state changed");
            self.state = state;
        }
        self.publish();
    }

    /// Acquire audio, open the remote session and go live.
    ///
    /// On failure everything already acquired is released, the session
    /// lands in `Error` and the cause is returned.
    pub async fn connect(&mut self) -> Result<(), VoiceError> {
        if self.state != SessionState::Idle {
            tracing::warn!(session_id = %self.session_id, state = ?self.state, "Connect ignored, session already started");
            return Ok(());
        }
        self.set_state(SessionState::Connecting);

        if let Err(e) = self.acquire_audio().await {
            return Err(self.fail(e));
        }
        self.start_visualizer();

        let opened = self.transport.open(&self.live_config).await;
        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail(e)),
        };
        self.sender = Some(connection.sender);
        self.remote_events = Some(connection.events);

        if let Err(e) = self.start_capture() {
            return Err(self.fail(e));
        }

        self.set_state(SessionState::Active);
        Ok(())
    }

    /// Open both contexts, then ask for the microphone
    async fn acquire_audio(&mut self) -> Result<(), VoiceError> {
        self.capture_context = Some(self.host.open_capture_context(INPUT_SAMPLE_RATE)?);
        let sink = self
            .host
            .open_playback_context(OUTPUT_SAMPLE_RATE, self.ended_tx.clone())?;
        self.playback = Some(PlaybackScheduler::new(sink));

        let context = self
            .capture_context
            .as_mut()
            .ok_or_else(|| VoiceError::Device("Capture context missing".to_string()))?;
        let capture = AudioCapture::acquire(&mut **context, SpectrumTap::new()).await?;
        self.capture = Some(capture);
        Ok(())
    }

    fn start_visualizer(&mut self) {
        let (Some(renderer), Some(capture)) = (self.renderer.take(), self.capture.as_ref()) else {
            return;
        };
        let analyzer: Arc<dyn FrequencyAnalyzer> = Arc::new(capture.tap());
        self.visualizer = Some(VisualizerLoop::start(
            analyzer,
            renderer,
            self.far_end_speaking.clone(),
            self.visualizer_options,
        ));
    }

    fn start_capture(&mut self) -> Result<(), VoiceError> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| VoiceError::Device("Microphone not acquired".to_string()))?;
        let frames = self.frame_tx.clone();
        capture.start(move |frame| {
            let _ = frames.send(frame);
        })
    }

    /// Move to `Error` after releasing everything. Only the first failure
    /// counts; the credential prompt fires for authorization failures.
    fn fail(&mut self, error: VoiceError) -> VoiceError {
        if self.state.is_terminal() {
            return error;
        }
        let kind = error.session_kind().unwrap_or(SessionErrorKind::Transport);
        tracing::error!(session_id = %self.session_id, error = %error, ?kind, "Live session failed");

        self.teardown();
        if kind == SessionErrorKind::AuthorizationDenied {
            self.prompt.prompt_reselect();
        }
        self.set_state(SessionState::Error(kind));
        error
    }

    fn close(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        tracing::info!(session_id = %self.session_id, reason, "Ending live session");
        self.teardown();
        self.set_state(SessionState::Closed);
    }

    /// Encode a captured frame and hand it to the transport. A failed send
    /// drops the frame; the session carries on.
    pub fn handle_frame(&mut self, frame: AudioFrame) {
        if self.state != SessionState::Active {
            return;
        }
        let Some(sender) = self.sender.as_ref() else {
            return;
        };

        let seq = frame.seq;
        match sender.send_audio(AudioChunk::from_frame(&frame)) {
            Ok(()) => self.stats.frames_sent += 1,
            Err(e) => {
                self.stats.frames_dropped += 1;
                tracing::warn!(session_id = %self.session_id, seq, error = %e, "Dropping audio frame");
            }
        }
    }

    pub fn handle_remote_event(&mut self, event: RemoteEvent) {
        if self.state != SessionState::Active {
            tracing::debug!(session_id = %self.session_id, ?event, "Ignoring event outside active session");
            return;
        }

        match event {
            RemoteEvent::PartialTranscript(text) => {
                self.transcript.append(&text);
            }
            RemoteEvent::AudioFragment(payload) => self.play_fragment(&payload),
            RemoteEvent::Interrupted => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.flush();
                }
                self.transcript.clear();
                self.far_end_speaking.store(false, Ordering::SeqCst);
                tracing::info!(session_id = %self.session_id, "Reply interrupted");
            }
            RemoteEvent::Error(details) => {
                self.fail(details.into_error());
                return;
            }
            RemoteEvent::Closed => {
                self.close("remote closed");
                return;
            }
        }
        self.publish();
    }

    fn play_fragment(&mut self, payload: &str) {
        let samples = match pcm::decode_fragment(payload) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.fragments_skipped += 1;
                tracing::warn!(session_id = %self.session_id, error = %e, "Skipping audio fragment");
                return;
            }
        };
        let Some(playback) = self.playback.as_mut() else {
            return;
        };

        let fragment = AudioFragment {
            seq: self.next_fragment,
            samples,
            sample_rate: OUTPUT_SAMPLE_RATE,
        };
        self.next_fragment += 1;
        playback.enqueue(fragment);
        self.far_end_speaking
            .store(playback.is_playing(), Ordering::SeqCst);
    }

    /// The sink finished playing a source
    pub fn source_ended(&mut self, id: SourceId) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        let still_playing = playback.source_ended(id);
        self.far_end_speaking.store(still_playing, Ordering::SeqCst);
        self.publish();
    }

    /// User asked to stop talking
    pub fn end_talk(&mut self) {
        self.close("user ended talk");
    }

    /// Release every resource the session holds. Safe to call any number
    /// of times and from any state.
    pub fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.drain_and_close();
        }
        if let Some(mut context) = self.capture_context.take() {
            context.close();
        }
        if let Some(mut visualizer) = self.visualizer.take() {
            visualizer.cancel();
        }
        if let Some(sender) = self.sender.take() {
            sender.close();
        }
        self.remote_events = None;
        self.far_end_speaking.store(false, Ordering::SeqCst);

        // Frames captured before the microphone stopped go nowhere
        while self.frame_rx.try_recv().is_ok() {}
    }

    /// Handle everything already queued without waiting. Returns the number
    /// of items processed.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(frame) = self.frame_rx.try_recv() {
                self.handle_frame(frame);
            } else if let Ok(id) = self.ended_rx.try_recv() {
                self.source_ended(id);
            } else if let Some(event) = self
                .remote_events
                .as_mut()
                .and_then(|events| events.try_recv().ok())
            {
                self.handle_remote_event(event);
            } else {
                break;
            }
            handled += 1;
        }
        handled
    }

    /// Connect, then serve the session until it ends. Dropping the command
    /// sender counts as ending the talk, including while still connecting.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) -> SessionState {
        // Ending the talk abandons a pending microphone request or remote open
        let ended_while_connecting = tokio::select! {
            _ = self.connect() => false,
            command = commands.recv() => match command {
                Some(SessionCommand::EndTalk) | None => true,
            },
        };
        if ended_while_connecting {
            self.close("user ended talk while connecting");
        }

        while !self.state.is_terminal() {
            tokio::select! {
                Some(frame) = self.frame_rx.recv() => self.handle_frame(frame),
                Some(id) = self.ended_rx.recv() => self.source_ended(id),
                event = next_remote_event(&mut self.remote_events) => match event {
                    Some(event) => self.handle_remote_event(event),
                    None => self.handle_remote_event(RemoteEvent::Closed),
                },
                command = commands.recv() => match command {
                    Some(SessionCommand::EndTalk) | None => self.end_talk(),
                },
            }
        }

        tracing::info!(
            session_id = %self.session_id,
            state = ?self.state,
            frames_sent = self.stats.frames_sent,
            frames_dropped = self.stats.frames_dropped,
            "Session finished"
        );
        self.state
    }
}

async fn next_remote_event(events: &mut Option<mpsc::Receiver<RemoteEvent>>) -> Option<RemoteEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}
