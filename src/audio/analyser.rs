//! Frequency-analysis tap on the capture stream.
//! Mirrors a browser analyser node: Blackman window, smoothed magnitudes,
//! decibels mapped onto 0..=255.

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use std::f32::consts::PI;
use std::sync::Arc;

use super::FFT_SIZE;

/// Smoothing between successive analysis frames
const SMOOTHING: f32 = 0.8;
/// Decibel range mapped onto byte values
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Source of live frequency-domain data
pub trait FrequencyAnalyzer: Send + Sync {
    /// Number of frequency bins (half the window size)
    fn bin_count(&self) -> usize;

    /// Fill `out` with the current magnitudes, one byte per bin
    fn byte_frequency_data(&self, out: &mut [u8]);
}

struct Analyser {
    /// Most recent captured samples, oldest first
    history: HeapRb<f32>,
    smoothed: Vec<f32>,
    window: Vec<f32>,
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
}

impl Analyser {
    fn new(size: usize) -> Self {
        let n = size as f32;
        let window = (0..size)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();
        let cos_table = (0..size).map(|i| (2.0 * PI * i as f32 / n).cos()).collect();
        let sin_table = (0..size).map(|i| (2.0 * PI * i as f32 / n).sin()).collect();

        Self {
            history: HeapRb::new(size),
            smoothed: vec![0.0; size / 2],
            window,
            cos_table,
            sin_table,
        }
    }

    fn push(&mut self, data: &[f32]) {
        self.history.push_iter_overwrite(data.iter().copied());
    }

    /// Run one analysis pass over the current window
    fn analyse(&mut self) {
        let size = self.window.len();
        let mut input = vec![0.0f32; size];

        // Right-align so a short history reads as leading silence
        let offset = size - self.history.occupied_len();
        for (slot, sample) in input[offset..].iter_mut().zip(self.history.iter()) {
            *slot = *sample;
        }
        for (sample, w) in input.iter_mut().zip(&self.window) {
            *sample *= w;
        }

        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let mut re = 0.0f32;
            let mut im = 0.0f32;
            for (i, sample) in input.iter().enumerate() {
                let idx = (k * i) % size;
                re += sample * self.cos_table[idx];
                im -= sample * self.sin_table[idx];
            }
            let magnitude = (re * re + im * im).sqrt() / size as f32;
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
        }
    }
}

fn magnitude_to_byte(magnitude: f32) -> u8 {
    let db = 20.0 * magnitude.max(1e-10).log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

/// Shared handle to the capture analyser.
/// The capture side only ever `try_lock`s, so rendering never stalls audio.
#[derive(Clone)]
pub struct SpectrumTap {
    inner: Arc<Mutex<Analyser>>,
}

impl SpectrumTap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Analyser::new(FFT_SIZE))),
        }
    }

    /// Feed captured samples. Dropped silently when a reader holds the lock.
    pub fn offer(&self, data: &[f32]) {
        if let Some(mut analyser) = self.inner.try_lock() {
            analyser.push(data);
        }
    }
}

impl Default for SpectrumTap {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyAnalyzer for SpectrumTap {
    fn bin_count(&self) -> usize {
        FFT_SIZE / 2
    }

    fn byte_frequency_data(&self, out: &mut [u8]) {
        let mut analyser = self.inner.lock();
        analyser.analyse();
        for (byte, magnitude) in out.iter_mut().zip(&analyser.smoothed) {
            *byte = magnitude_to_byte(*magnitude);
        }
    }
}
