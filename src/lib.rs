pub mod assistant;
pub mod audio;
pub mod config;
pub mod error;
pub mod remote;
pub mod session;
pub mod visualizer;

#[cfg(test)]
mod testing;

pub use assistant::VoiceAssistant;
pub use config::{load_config, save_config, VoiceConfig};
pub use error::{SessionErrorKind, VoiceError};
pub use remote::{CredentialPrompt, GeminiLiveTransport, LiveTransport, RemoteEvent};
pub use session::{SessionController, SessionSnapshot, SessionState};
pub use visualizer::{compose_frame, RadialFrame, Renderer, VisualizerLoop};

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // A subscriber may already be installed by the host application
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
