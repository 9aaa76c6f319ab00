//! Capability interfaces over the host's audio hardware.
//!
//! The session pipeline only talks to these traits, so scheduling and flush
//! logic runs the same against cpal devices and against simulated clocks.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::VoiceError;

/// Identifies one scheduled output source inside a sink
pub type SourceId = u64;

/// Receives raw captured blocks of any length, in capture order
pub type BlockCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Entry point to the host audio system
pub trait AudioHost: Send + Sync {
    /// Open the capture-rate context the microphone is attached to
    fn open_capture_context(&self, sample_rate: u32) -> Result<Box<dyn CaptureContext>, VoiceError>;

    /// Open the playback-rate context.
    /// `ended` receives the id of every source whose playback completes.
    fn open_playback_context(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioSink>, VoiceError>;
}

#[async_trait]
pub trait CaptureContext: Send {
    fn sample_rate(&self) -> u32;

    /// Ask for exclusive microphone access.
    /// Fails with `PermissionDenied` when access is refused.
    async fn request_microphone(&mut self) -> Result<Box<dyn AudioSource>, VoiceError>;

    /// Release the context. Calling twice is a no-op.
    fn close(&mut self);
}

/// A granted microphone stream
pub trait AudioSource: Send {
    /// Begin delivering blocks. Must return without waiting for audio.
    fn start(&mut self, on_block: BlockCallback) -> Result<(), VoiceError>;

    /// Stop delivery and release the device. Calling twice is a no-op.
    fn stop(&mut self);
}

/// Output context with its own clock
pub trait AudioSink: Send {
    fn sample_rate(&self) -> u32;

    /// Output clock in seconds since the context opened
    fn current_time(&self) -> f64;

    /// Play `samples` (at the context rate) starting at `start_at` seconds
    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start_at: f64);

    /// Stop one source immediately. Unknown ids are ignored.
    fn stop(&mut self, id: SourceId);

    /// Release the output device. Calling twice is a no-op.
    fn close(&mut self);
}
