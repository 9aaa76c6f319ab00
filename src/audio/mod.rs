mod analyser;
mod capture;
pub mod host;
mod mixer;
#[cfg(feature = "cpal-backend")]
mod native;
pub mod pcm;
mod playback;

pub use analyser::{FrequencyAnalyzer, SpectrumTap};
pub use capture::{AudioCapture, FrameSlicer};
pub use host::{AudioHost, AudioSink, AudioSource, BlockCallback, CaptureContext, SourceId};
pub use mixer::SourceMixer;
#[cfg(feature = "cpal-backend")]
pub use native::CpalHost;
pub use playback::{PlaybackScheduler, ScheduledSource};

/// Capture sample rate expected by the live service (16kHz mono)
pub const INPUT_SAMPLE_RATE: u32 = 16000;
/// Sample rate of audio pushed back by the live service
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;
/// Channels (mono for voice)
pub const CHANNELS: u16 = 1;
/// Samples per outbound frame (256ms at 16kHz)
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;
/// Analysis window for the visualizer tap
pub const FFT_SIZE: usize = 256;

/// Captured microphone frame ready for encoding
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Capture order, starting at 0 for each capture run
    pub seq: u64,
    pub samples: Vec<f32>,
}

/// Decoded audio pushed by the live service
#[derive(Clone, Debug)]
pub struct AudioFragment {
    /// Arrival order within the session
    pub seq: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFragment {
    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}
