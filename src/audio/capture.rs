use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::analyser::SpectrumTap;
use super::host::{AudioSource, CaptureContext};
use super::{AudioFrame, CAPTURE_FRAME_SAMPLES};
use crate::error::VoiceError;

/// Cuts an arbitrary block stream into fixed-size frames
pub struct FrameSlicer {
    buffer: Vec<f32>,
    frame_len: usize,
    next_seq: u64,
}

impl FrameSlicer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(frame_len * 2),
            frame_len: frame_len.max(1),
            next_seq: 0,
        }
    }

    /// Push captured samples, emitting every frame that becomes complete.
    /// A partial tail stays buffered for the next block.
    pub fn push<F>(&mut self, data: &[f32], mut emit: F)
    where
        F: FnMut(AudioFrame),
    {
        self.buffer.extend_from_slice(data);

        while self.buffer.len() >= self.frame_len {
            let samples: Vec<f32> = self.buffer.drain(..self.frame_len).collect();
            let seq = self.next_seq;
            self.next_seq += 1;
            emit(AudioFrame { seq, samples });
        }
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameSlicer {
    fn default() -> Self {
        Self::new(CAPTURE_FRAME_SAMPLES)
    }
}

/// Microphone capture pipeline.
/// Owns the granted source and delivers fixed-size frames to one consumer.
pub struct AudioCapture {
    source: Option<Box<dyn AudioSource>>,
    tap: SpectrumTap,
    /// Cleared on stop so a late hardware callback can't deliver another frame
    delivering: Arc<AtomicBool>,
    frame_len: usize,
}

impl AudioCapture {
    /// Request the microphone from `context`.
    /// Fails with `PermissionDenied` if access is refused.
    pub async fn acquire(
        context: &mut dyn CaptureContext,
        tap: SpectrumTap,
    ) -> Result<Self, VoiceError> {
        let source = context.request_microphone().await?;
        tracing::info!("Microphone granted at {} Hz", context.sample_rate());
        Ok(Self::with_source(source, tap))
    }

    pub fn with_source(source: Box<dyn AudioSource>, tap: SpectrumTap) -> Self {
        Self {
            source: Some(source),
            tap,
            delivering: Arc::new(AtomicBool::new(false)),
            frame_len: CAPTURE_FRAME_SAMPLES,
        }
    }

    /// Start frame delivery. Returns immediately; frames arrive from the
    /// source's callback in strict capture order.
    pub fn start<F>(&mut self, mut on_frame: F) -> Result<(), VoiceError>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| VoiceError::Device("Capture already stopped".to_string()))?;

        if self.delivering.swap(true, Ordering::SeqCst) {
            return Ok(()); // Already capturing
        }

        let delivering = self.delivering.clone();
        let tap = self.tap.clone();
        let mut slicer = FrameSlicer::new(self.frame_len);

        let result = source.start(Box::new(move |data: &[f32]| {
            if !delivering.load(Ordering::SeqCst) {
                return;
            }
            // Observation only, skipped when the visualizer holds the lock
            tap.offer(data);
            slicer.push(data, &mut on_frame);
        }));

        if let Err(e) = result {
            self.delivering.store(false, Ordering::SeqCst);
            return Err(e);
        }

        tracing::info!(frame_len = self.frame_len, "Audio capture started");
        Ok(())
    }

    /// Stop capturing and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        self.delivering.store(false, Ordering::SeqCst);

        if let Some(mut source) = self.source.take() {
            source.stop();
            tracing::info!("Audio capture stopped, microphone released");
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.source.is_some() && self.delivering.load(Ordering::SeqCst)
    }

    /// Analysis tap fed by this capture
    pub fn tap(&self) -> SpectrumTap {
        self.tap.clone()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;
    use parking_lot::Mutex;

    #[test]
    fn test_slicer_orders_frames_and_keeps_tail() {
        let mut slicer = FrameSlicer::new(4);
        let mut frames = Vec::new();

        slicer.push(&[0.0, 0.1, 0.2], |f| frames.push(f));
        assert!(frames.is_empty());
        assert_eq!(slicer.pending(), 3);

        slicer.push(&[0.3, 0.4, 0.5, 0.6, 0.7, 0.8], |f| frames.push(f));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].seq, 0);
        assert_eq!(frames[0].samples, vec![0.0, 0.1, 0.2, 0.3]);
        assert_eq!(frames[1].seq, 1);
        assert_eq!(frames[1].samples, vec![0.4, 0.5, 0.6, 0.7]);
        assert_eq!(slicer.pending(), 1);
    }

    #[tokio::test]
    async fn test_capture_delivers_full_frames_until_stopped() {
        let host = MockHost::new();
        let mut context = host.capture_context(16000);
        let mut capture = AudioCapture::acquire(context.as_mut(), SpectrumTap::new())
            .await
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        capture.start(move |frame| sink.lock().push(frame.seq)).unwrap();
        assert!(capture.is_capturing());

        host.emit_samples(&vec![0.1; CAPTURE_FRAME_SAMPLES + 100]);
        host.emit_samples(&vec![0.1; CAPTURE_FRAME_SAMPLES]);
        assert_eq!(*received.lock(), vec![0, 1]);

        capture.stop();
        capture.stop();
        host.emit_samples(&vec![0.1; CAPTURE_FRAME_SAMPLES * 2]);
        assert_eq!(received.lock().len(), 2);
        assert!(!host.microphone_acquired());
        assert!(capture.start(|_| {}).is_err());
    }

    #[tokio::test]
    async fn test_denied_microphone() {
        let host = MockHost::new();
        host.deny_microphone();
        let mut context = host.capture_context(16000);
        let result = AudioCapture::acquire(context.as_mut(), SpectrumTap::new()).await;
        assert!(matches!(result, Err(VoiceError::PermissionDenied(_))));
    }
}
