//! Radial level visualizer driven by the capture analyser.
//!
//! Frame geometry is computed by [`compose_frame`] so it can be tested
//! without a drawing surface; the [`Renderer`] only paints what it gets.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::FrequencyAnalyzer;

const BASE_RADIUS: f32 = 60.0;
/// Extra radius while the far end is speaking
const SPEAKING_BOOST: f32 = 5.0;
const PULSE_RANGE: f32 = 50.0;
const BAR_COUNT: usize = 80;
const BAR_RANGE: f32 = 80.0;
const HUE_START: f32 = 210.0;
const HUE_SPAN: f32 = 60.0;

/// Pulse ring around the bars
#[derive(Debug, Clone, PartialEq)]
pub struct RingStroke {
    pub radius: f32,
    /// 0.0 - 1.0
    pub alpha: f32,
    pub rgb: (u8, u8, u8),
    pub line_width: f32,
}

/// One radial bar, from the base circle outwards
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub start: (f32, f32),
    pub end: (f32, f32),
    pub length: f32,
    /// HSL hue in degrees
    pub hue: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadialFrame {
    pub width: f32,
    pub height: f32,
    pub center: (f32, f32),
    pub radius: f32,
    /// Mean bin magnitude, 0 - 255
    pub level: f32,
    pub ring: RingStroke,
    pub bars: Vec<Bar>,
}

/// Compute one frame from byte frequency bins
pub fn compose_frame(bins: &[u8], far_end_speaking: bool, width: f32, height: f32) -> RadialFrame {
    let center = (width / 2.0, height / 2.0);
    let radius = BASE_RADIUS + if far_end_speaking { SPEAKING_BOOST } else { 0.0 };

    let level = if bins.is_empty() {
        0.0
    } else {
        bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
    };

    let ring = RingStroke {
        radius: radius + level / 255.0 * PULSE_RANGE,
        alpha: (0.1 + level / 255.0).min(1.0),
        rgb: (59, 130, 246),
        line_width: 2.0,
    };

    let step = 2.0 * PI / BAR_COUNT as f32;
    let bars = (0..BAR_COUNT)
        .map(|i| {
            let magnitude = if bins.is_empty() { 0 } else { bins[i % bins.len()] };
            let length = magnitude as f32 / 255.0 * BAR_RANGE;
            let (sin, cos) = (step * i as f32).sin_cos();
            Bar {
                start: (center.0 + cos * radius, center.1 + sin * radius),
                end: (center.0 + cos * (radius + length), center.1 + sin * (radius + length)),
                length,
                hue: HUE_START + i as f32 / BAR_COUNT as f32 * HUE_SPAN,
            }
        })
        .collect();

    RadialFrame {
        width,
        height,
        center,
        radius,
        level,
        ring,
        bars,
    }
}

/// Drawing surface for visualizer frames
pub trait Renderer: Send + 'static {
    fn draw(&mut self, frame: &RadialFrame);
}

impl<F> Renderer for F
where
    F: FnMut(&RadialFrame) + Send + 'static,
{
    fn draw(&mut self, frame: &RadialFrame) {
        self(frame)
    }
}

/// Surface size and refresh rate
#[derive(Debug, Clone, Copy)]
pub struct VisualizerOptions {
    pub width: f32,
    pub height: f32,
    pub fps: u32,
}

impl Default for VisualizerOptions {
    fn default() -> Self {
        Self {
            width: 300.0,
            height: 300.0,
            fps: 60,
        }
    }
}

/// Periodic render task. Cancelling is idempotent and dropping cancels.
pub struct VisualizerLoop {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl VisualizerLoop {
    /// A loop that was never started; `cancel` on it does nothing
    pub fn idle() -> Self {
        Self {
            stop_tx: None,
            handle: None,
        }
    }

    /// Spawn the render task on the current tokio runtime
    pub fn start(
        analyzer: Arc<dyn FrequencyAnalyzer>,
        mut renderer: Box<dyn Renderer>,
        speaking: Arc<AtomicBool>,
        options: VisualizerOptions,
    ) -> Self {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let period = Duration::from_secs_f64(1.0 / options.fps.clamp(1, 240) as f64);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut bins = vec![0u8; analyzer.bin_count()];

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {
                        analyzer.byte_frequency_data(&mut bins);
                        let frame = compose_frame(
                            &bins,
                            speaking.load(Ordering::Relaxed),
                            options.width,
                            options.height,
                        );
                        renderer.draw(&frame);
                    }
                }
            }
            tracing::debug!("Visualizer loop stopped");
        });

        tracing::debug!(fps = options.fps, "Visualizer loop started");
        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn cancel(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for VisualizerLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FixedBins(Vec<u8>);

    impl FrequencyAnalyzer for FixedBins {
        fn bin_count(&self) -> usize {
            self.0.len()
        }

        fn byte_frequency_data(&self, out: &mut [u8]) {
            out.copy_from_slice(&self.0);
        }
    }

    #[test]
    fn test_silent_frame() {
        let frame = compose_frame(&[0; 128], false, 300.0, 200.0);
        assert_eq!(frame.center, (150.0, 100.0));
        assert_eq!(frame.radius, 60.0);
        assert_eq!(frame.ring.radius, 60.0);
        assert!((frame.ring.alpha - 0.1).abs() < 1e-6);
        assert_eq!(frame.bars.len(), 80);
        assert!(frame.bars.iter().all(|b| b.length == 0.0 && b.start == b.end));
    }

    #[test]
    fn test_full_scale_frame_while_speaking() {
        let frame = compose_frame(&[255; 128], true, 300.0, 300.0);
        assert_eq!(frame.radius, 65.0);
        assert_eq!(frame.ring.radius, 115.0);
        assert_eq!(frame.ring.alpha, 1.0);

        let first = &frame.bars[0];
        assert_eq!(first.length, 80.0);
        assert!((first.start.0 - 215.0).abs() < 1e-3);
        assert!((first.end.0 - 295.0).abs() < 1e-3);
        assert_eq!(first.hue, 210.0);
        assert!((frame.bars[40].hue - 240.0).abs() < 1e-4);
    }

    #[test]
    fn test_bars_wrap_over_short_bin_sets() {
        let frame = compose_frame(&[0, 255], false, 100.0, 100.0);
        assert_eq!(frame.bars[0].length, 0.0);
        assert_eq!(frame.bars[1].length, 80.0);
        assert_eq!(frame.bars[2].length, 0.0);
        assert!((frame.level - 127.5).abs() < 1e-4);

        assert!(compose_frame(&[], false, 100.0, 100.0).bars.iter().all(|b| b.length == 0.0));
    }

    #[tokio::test]
    async fn test_loop_draws_until_cancelled() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let speaking = Arc::new(AtomicBool::new(true));

        let mut visualizer = VisualizerLoop::start(
            Arc::new(FixedBins(vec![128; 4])),
            Box::new(move |frame: &RadialFrame| sink.lock().push(frame.radius)),
            speaking,
            VisualizerOptions {
                fps: 100,
                ..VisualizerOptions::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(visualizer.is_running());

        visualizer.cancel();
        visualizer.cancel();
        let drawn = frames.lock().len();
        assert!(drawn > 0);
        assert!(frames.lock().iter().all(|&r| r == 65.0));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(frames.lock().len(), drawn);
        assert!(!visualizer.is_running());
    }

    #[test]
    fn test_cancel_never_started_is_noop() {
        let mut visualizer = VisualizerLoop::idle();
        visualizer.cancel();
        assert!(!visualizer.is_running());
    }
}
