use super::host::SourceId;

/// One scheduled source on the output timeline
struct ScheduledVoice {
    id: SourceId,
    /// Absolute frame at which playback begins
    start_frame: u64,
    samples: Vec<f32>,
    /// Next sample to play
    position: usize,
}

/// Sample-accurate output timeline.
/// Hardware sinks call `render` from their output callback; the frame
/// counter it advances is the sink's clock.
pub struct SourceMixer {
    sample_rate: u32,
    clock_frames: u64,
    voices: Vec<ScheduledVoice>,
    /// Master volume (0.0 - 1.0)
    master_volume: f32,
}

impl SourceMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            clock_frames: 0,
            voices: Vec::new(),
            master_volume: 1.0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds rendered so far
    pub fn current_time(&self) -> f64 {
        self.clock_frames as f64 / self.sample_rate as f64
    }

    /// Place a source on the timeline. A start time already in the past
    /// plays from the next rendered frame.
    pub fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start_at: f64) {
        let requested = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.voices.push(ScheduledVoice {
            id,
            start_frame: requested.max(self.clock_frames),
            samples,
            position: 0,
        });
    }

    /// Remove a source before it finishes
    pub fn stop(&mut self, id: SourceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    /// Remove every source
    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active_count(&self) -> usize {
        self.voices.len()
    }

    /// Mix the next `output.len() / channels` frames into `output`
    /// (interleaved) and return the ids of sources that finished.
    pub fn render(&mut self, output: &mut [f32], channels: usize) -> Vec<SourceId> {
        output.fill(0.0);

        let channels = channels.max(1);
        let frames = output.len() / channels;
        let block_start = self.clock_frames;
        let block_end = block_start + frames as u64;

        for voice in self.voices.iter_mut() {
            if voice.start_frame >= block_end {
                continue;
            }

            let begin = voice.start_frame.saturating_sub(block_start) as usize;
            let remaining = voice.samples.len() - voice.position;
            let count = remaining.min(frames - begin);

            for i in 0..count {
                let sample = voice.samples[voice.position + i] * self.master_volume;
                let frame = (begin + i) * channels;
                for slot in &mut output[frame..frame + channels] {
                    *slot += sample;
                }
            }
            voice.position += count;
        }

        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.clock_frames = block_end;

        let mut finished = Vec::new();
        self.voices.retain(|v| {
            let done = v.position >= v.samples.len();
            if done {
                finished.push(v.id);
            }
            !done
        });
        finished
    }

    /// Set master volume (0.0 - 1.0)
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }
}
