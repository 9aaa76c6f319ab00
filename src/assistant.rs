//! Live talk entry point for the UI: one activation at a time, with a
//! status stream that survives retries.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::AudioHost;
use crate::config::VoiceConfig;
use crate::remote::{CredentialPrompt, LiveConfig, LiveTransport};
use crate::session::{SessionCommand, SessionController, SessionSnapshot, SessionState};
use crate::visualizer::{Renderer, VisualizerOptions};

type RendererFactory = Box<dyn Fn() -> Box<dyn Renderer> + Send + Sync>;

struct Activation {
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<SessionState>,
    mirror: JoinHandle<()>,
}

/// Copy a session snapshot into the shared status, unless a newer session
/// has taken the status over
fn forward_snapshot(status: &watch::Sender<SessionSnapshot>, snapshot: SessionSnapshot) -> bool {
    status.send_if_modified(|current| {
        if current.session_id != snapshot.session_id {
            return false;
        }
        *current = snapshot;
        true
    })
}

pub struct VoiceAssistant {
    host: Arc<dyn AudioHost>,
    transport: Arc<dyn LiveTransport>,
    prompt: Arc<dyn CredentialPrompt>,
    live_config: LiveConfig,
    renderer: Option<RendererFactory>,
    visualizer_options: VisualizerOptions,
    active: Mutex<Option<Activation>>,
    status: Arc<watch::Sender<SessionSnapshot>>,
}

impl VoiceAssistant {
    pub fn new(
        host: Arc<dyn AudioHost>,
        transport: Arc<dyn LiveTransport>,
        prompt: Arc<dyn CredentialPrompt>,
        config: &VoiceConfig,
    ) -> Self {
        let (status, _) = watch::channel(SessionSnapshot::idle(String::new()));
        Self {
            host,
            transport,
            prompt,
            live_config: LiveConfig::from(config),
            renderer: None,
            visualizer_options: VisualizerOptions {
                fps: config.visualizer_fps,
                ..VisualizerOptions::default()
            },
            active: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    /// Microphone and speakers through cpal, Gemini Live as the service
    #[cfg(feature = "cpal-backend")]
    pub fn native(
        config: &VoiceConfig,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Result<Self, crate::error::VoiceError> {
        let host = crate::audio::CpalHost::with_devices(
            config.input_device.clone(),
            config.output_device.clone(),
        );
        let transport = crate::remote::GeminiLiveTransport::new(config)?;
        Ok(Self::new(Arc::new(host), Arc::new(transport), prompt, config))
    }

    /// Build a renderer for every session
    pub fn with_renderer<F>(mut self, factory: F, width: f32, height: f32) -> Self
    where
        F: Fn() -> Box<dyn Renderer> + Send + Sync + 'static,
    {
        self.renderer = Some(Box::new(factory));
        self.visualizer_options.width = width;
        self.visualizer_options.height = height;
        self
    }

    /// Start a session. Returns false if one is already running.
    pub fn start(&self) -> bool {
        let mut active = self.active.lock();
        if let Some(activation) = active.as_ref() {
            if !activation.task.is_finished() {
                tracing::debug!("Live talk already running");
                return false;
            }
            activation.mirror.abort();
        }

        let mut controller = SessionController::new(
            self.host.clone(),
            self.transport.clone(),
            self.prompt.clone(),
            self.live_config.clone(),
        );
        if let Some(factory) = self.renderer.as_ref() {
            controller = controller.with_renderer(factory(), self.visualizer_options);
        }
        tracing::info!(session_id = %controller.session_id(), "Starting live talk");

        // Mirror this session's snapshots into the long-lived status channel
        let mut snapshots = controller.subscribe();
        let status = self.status.clone();
        status.send_replace(snapshots.borrow_and_update().clone());
        let mirror = tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if !forward_snapshot(&status, snapshot) {
                    break;
                }
            }
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(controller.run(rx));
        *active = Some(Activation {
            commands,
            task,
            mirror,
        });
        true
    }

    /// End the current session, if any
    pub fn end_talk(&self) {
        if let Some(activation) = self.active.lock().as_ref() {
            let _ = activation.commands.send(SessionCommand::EndTalk);
        }
    }

    /// Start over with a fresh session after a failure.
    /// Ignored unless the last session ended in `Error`.
    pub fn retry(&self) -> bool {
        let state = self.status.borrow().state;
        if !matches!(state, SessionState::Error(_)) {
            tracing::debug!(?state, "Retry ignored");
            return false;
        }
        self.start()
    }

    pub fn status(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.subscribe()
    }

    /// Wait for the current session to finish and return its final state
    pub async fn finished(&self) -> Option<SessionState> {
        let activation = self.active.lock().take()?;
        match activation.task.await {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!("Session task failed: {}", e);
                None
            }
        }
    }
}
