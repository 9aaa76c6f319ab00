//! In-memory host audio and live transport used by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::audio::{AudioHost, AudioSink, AudioSource, BlockCallback, CaptureContext, SourceId};
use crate::error::VoiceError;
use crate::remote::{
    AudioChunk, CredentialPrompt, LiveConfig, LiveConnection, LiveSender, LiveTransport,
    RemoteEvent,
};

#[derive(Default)]
struct HostState {
    clock: f64,
    capture_opened: usize,
    capture_closed: usize,
    playback_opened: usize,
    playback_closed: usize,
    deny_microphone: bool,
    microphone_acquired: bool,
    microphone_releases: usize,
    callback: Option<BlockCallback>,
    scheduled: Vec<(SourceId, f64, usize)>,
    stopped: Vec<SourceId>,
    ended: Option<mpsc::UnboundedSender<SourceId>>,
}

/// Fake audio host with a manually driven clock
#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_context(&self, sample_rate: u32) -> Box<dyn CaptureContext> {
        self.state.lock().capture_opened += 1;
        Box::new(MockCaptureContext {
            host: self.clone(),
            sample_rate,
            closed: false,
        })
    }

    pub fn playback_context(&self, sample_rate: u32) -> Box<dyn AudioSink> {
        let (ended, _) = mpsc::unbounded_channel();
        self.open_sink(sample_rate, ended)
    }

    fn open_sink(&self, sample_rate: u32, ended: mpsc::UnboundedSender<SourceId>) -> Box<dyn AudioSink> {
        let mut state = self.state.lock();
        state.playback_opened += 1;
        state.ended = Some(ended);
        Box::new(MockSink {
            host: self.clone(),
            sample_rate,
            closed: false,
        })
    }

    pub fn set_clock(&self, seconds: f64) {
        self.state.lock().clock = seconds;
    }

    pub fn deny_microphone(&self) {
        self.state.lock().deny_microphone = true;
    }

    /// Deliver a block as if the microphone captured it
    pub fn emit_samples(&self, data: &[f32]) {
        let callback = self.state.lock().callback.take();
        if let Some(mut deliver) = callback {
            deliver(data);
            let mut state = self.state.lock();
            if state.microphone_acquired && state.callback.is_none() {
                state.callback = Some(deliver);
            }
        }
    }

    /// Report a scheduled source as finished
    pub fn finish_source(&self, id: SourceId) {
        if let Some(ended) = self.state.lock().ended.as_ref() {
            let _ = ended.send(id);
        }
    }

    pub fn microphone_acquired(&self) -> bool {
        self.state.lock().microphone_acquired
    }

    pub fn microphone_releases(&self) -> usize {
        self.state.lock().microphone_releases
    }

    pub fn capture_contexts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.capture_opened, state.capture_closed)
    }

    pub fn playback_contexts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.playback_opened, state.playback_closed)
    }

    pub fn playback_closes(&self) -> usize {
        self.state.lock().playback_closed
    }

    /// Every context closed and the microphone released
    pub fn released_all(&self) -> bool {
        let state = self.state.lock();
        state.capture_opened == state.capture_closed
            && state.playback_opened == state.playback_closed
            && !state.microphone_acquired
    }

    /// `(id, start)` of every scheduled source, in scheduling order
    pub fn scheduled_sources(&self) -> Vec<(SourceId, f64)> {
        self.state
            .lock()
            .scheduled
            .iter()
            .map(|(id, start, _)| (*id, *start))
            .collect()
    }

    pub fn stopped_sources(&self) -> Vec<SourceId> {
        self.state.lock().stopped.clone()
    }
}

impl AudioHost for MockHost {
    fn open_capture_context(&self, sample_rate: u32) -> Result<Box<dyn CaptureContext>, VoiceError> {
        Ok(self.capture_context(sample_rate))
    }

    fn open_playback_context(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioSink>, VoiceError> {
        Ok(self.open_sink(sample_rate, ended))
    }
}

struct MockCaptureContext {
    host: MockHost,
    sample_rate: u32,
    closed: bool,
}

#[async_trait]
impl CaptureContext for MockCaptureContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn request_microphone(&mut self) -> Result<Box<dyn AudioSource>, VoiceError> {
        let mut state = self.host.state.lock();
        if state.deny_microphone {
            return Err(VoiceError::PermissionDenied("Permission denied".to_string()));
        }
        state.microphone_acquired = true;
        Ok(Box::new(MockSource {
            host: self.host.clone(),
        }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.host.state.lock().capture_closed += 1;
        }
    }
}

struct MockSource {
    host: MockHost,
}

impl AudioSource for MockSource {
    fn start(&mut self, on_block: BlockCallback) -> Result<(), VoiceError> {
        self.host.state.lock().callback = Some(on_block);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.host.state.lock();
        if state.microphone_acquired {
            state.microphone_acquired = false;
            state.microphone_releases += 1;
        }
        state.callback = None;
    }
}

struct MockSink {
    host: MockHost,
    sample_rate: u32,
    closed: bool,
}

impl AudioSink for MockSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.host.state.lock().clock
    }

    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start_at: f64) {
        self.host
            .state
            .lock()
            .scheduled
            .push((id, start_at, samples.len()));
    }

    fn stop(&mut self, id: SourceId) {
        self.host.state.lock().stopped.push(id);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.host.state.lock().playback_closed += 1;
        }
    }
}

#[derive(Default)]
struct TransportState {
    opens: usize,
    connections: usize,
    gate: Option<Arc<Notify>>,
    open_error: Option<VoiceError>,
    fail_sends: bool,
    sent: Vec<AudioChunk>,
    sender_closes: usize,
    events: Option<mpsc::Sender<RemoteEvent>>,
}

/// Fake live service recording outbound chunks
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open_with(&self, error: VoiceError) {
        self.state.lock().open_error = Some(error);
    }

    /// Make `open` wait until the returned gate is notified
    pub fn hold_open(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().gate = Some(gate.clone());
        gate
    }

    pub fn succeed_open(&self) {
        self.state.lock().open_error = None;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    /// Push an event from the service side
    pub fn push_event(&self, event: RemoteEvent) {
        if let Some(events) = self.state.lock().events.as_ref() {
            let _ = events.try_send(event);
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    /// Opens that completed and handed out a connection
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    pub fn sent_seqs(&self) -> Vec<u64> {
        self.state.lock().sent.iter().map(|c| c.seq).collect()
    }

    pub fn sent_chunks(&self) -> Vec<AudioChunk> {
        self.state.lock().sent.clone()
    }

    pub fn sender_closes(&self) -> usize {
        self.state.lock().sender_closes
    }
}

#[async_trait]
impl LiveTransport for MockTransport {
    async fn open(&self, _config: &LiveConfig) -> Result<LiveConnection, VoiceError> {
        let gate = {
            let mut state = self.state.lock();
            state.opens += 1;
            state.gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if let Some(error) = state.open_error.clone() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(64);
        state.connections += 1;
        state.events = Some(tx);
        Ok(LiveConnection {
            sender: Box::new(MockSender {
                state: self.state.clone(),
                closed: false.into(),
            }),
            events: rx,
        })
    }
}

struct MockSender {
    state: Arc<Mutex<TransportState>>,
    closed: std::sync::atomic::AtomicBool,
}

impl LiveSender for MockSender {
    fn send_audio(&self, chunk: AudioChunk) -> Result<(), VoiceError> {
        let mut state = self.state.lock();
        if state.fail_sends || self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::FrameSendFailure(format!("chunk {}", chunk.seq)));
        }
        state.sent.push(chunk);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.lock().sender_closes += 1;
        }
    }
}

/// Credential prompt that counts invocations
#[derive(Clone, Default)]
pub struct CountingPrompt {
    calls: Arc<AtomicUsize>,
}

impl CountingPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CredentialPrompt for CountingPrompt {
    fn prompt_reselect(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
