//! PCM16 codec for the live session wire format.
//! Samples travel as 16-bit signed little-endian integers, base64 wrapped.

use base64::Engine;

use crate::error::VoiceError;

/// Encode f32 samples to PCM16 little-endian bytes.
/// Values are clamped to [-1, 1] and scaled by 32768; +1.0 saturates to `i16::MAX`.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut output = Vec::with_capacity(samples.len() * 2);

    for &sample in samples {
        // NaN would otherwise saturate through the cast
        let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        // Float to int casts saturate, so 32768 lands on i16::MAX
        let value = (clamped * 32768.0).round() as i16;
        output.extend_from_slice(&value.to_le_bytes());
    }

    output
}

/// Decode PCM16 little-endian bytes to f32 samples, dividing by 32768.
pub fn decode(data: &[u8]) -> Result<Vec<f32>, VoiceError> {
    if data.len() % 2 != 0 {
        return Err(VoiceError::DecodeFailure(format!(
            "PCM16 payload has odd length {}",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

pub fn to_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn from_base64(text: &str) -> Result<Vec<u8>, VoiceError> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| VoiceError::DecodeFailure(format!("Invalid base64 audio: {}", e)))
}

/// Decode a base64 PCM16 fragment as pushed by the live service
pub fn decode_fragment(payload: &str) -> Result<Vec<f32>, VoiceError> {
    decode(&from_base64(payload)?)
}

/// Simple linear resampling of one complete buffer between two rates.
/// Streams delivered in blocks go through [`StreamResampler`] instead.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let last = samples.len() - 1;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = (src_idx.floor() as usize).min(last);
        let idx_ceil = (idx_floor + 1).min(last);
        let frac = (src_idx - idx_floor as f64) as f32;

        let s1 = samples[idx_floor];
        let s2 = samples[idx_ceil];
        output.push(s1 + (s2 - s1) * frac);
    }

    output
}

/// Linear resampler for a continuous stream that arrives in blocks.
///
/// The read position and the previous block's last sample carry over between
/// calls, so the output is the same however the input is split and the
/// output length never drifts from `input * to / from`.
pub struct StreamResampler {
    step: f64,
    // Position of the next output sample, relative to the first sample of
    // the next block. In [-1, 0) it falls between `last` and that sample.
    position: f64,
    last: Option<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        Self {
            step,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    pub fn process(&mut self, block: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || block.is_empty() {
            return block.to_vec();
        }

        let len = block.len();
        let prev = self.last.unwrap_or(block[0]);
        let sample = |i: isize| if i < 0 { prev } else { block[i as usize] };

        let mut output = Vec::with_capacity((len as f64 / self.step).ceil() as usize + 1);
        while self.position <= (len - 1) as f64 {
            let idx = self.position.floor() as isize;
            let frac = (self.position - idx as f64) as f32;
            let s1 = sample(idx);
            let s2 = if idx + 1 < len as isize { sample(idx + 1) } else { s1 };
            output.push(s1 + (s2 - s1) * frac);
            self.position += self.step;
        }

        self.position -= len as f64;
        self.last = Some(block[len - 1]);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f32 = 1.0 / 32768.0;

    const MAX_DECODED: f32 = 32767.0 / 32768.0;

    fn assert_roundtrip(samples: &[f32]) {
        let encoded = encode(samples);
        assert_eq!(encoded.len(), samples.len() * 2);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (original, restored) in samples.iter().zip(&decoded) {
            assert!((original - restored).abs() <= STEP, "{} vs {}", original, restored);
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let signal: Vec<f32> = (0..4096)
            .map(|i| (i as f32 * 0.05).sin() * 0.9)
            .collect();
        assert_roundtrip(&signal);
    }

    #[test]
    fn test_roundtrip_across_full_range() {
        let sweep: Vec<f32> = (0..=200_000)
            .map(|i| -1.0 + i as f32 / 100_000.0)
            .collect();
        assert_roundtrip(&sweep);

        // Half-step edges, where rounding decides the code
        let edges: Vec<f32> = (32_700..32_768)
            .flat_map(|k| {
                let half = (k as f32 + 0.5) / 32768.0;
                [half, -half, half - STEP / 8.0, half + STEP / 8.0]
            })
            .collect();
        assert_roundtrip(&edges);

        assert_roundtrip(&[0.99999, -0.99999, 1.0 - STEP / 2.0, -1.0 + STEP / 2.0, STEP / 2.0]);
    }

    #[test]
    fn test_boundary_values() {
        let encoded = encode(&[1.0, -1.0, 0.0]);
        assert_eq!(&encoded[0..2], &i16::MAX.to_le_bytes());
        assert_eq!(&encoded[2..4], &i16::MIN.to_le_bytes());
        assert_eq!(&encoded[4..6], &[0, 0]);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, vec![MAX_DECODED, -1.0, 0.0]);
    }

    #[test]
    fn test_decode_divides_by_32768() {
        let bytes = [32767i16, 16384, -1]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<u8>>();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, vec![MAX_DECODED, 0.5, -STEP]);
    }

    #[test]
    fn test_out_of_range_and_nan_are_clamped() {
        let decoded = decode(&encode(&[3.5, -7.0, f32::NAN])).unwrap();
        assert_eq!(decoded, vec![MAX_DECODED, -1.0, 0.0]);
    }

    #[test]
    fn test_odd_length_is_decode_failure() {
        assert!(matches!(decode(&[0, 1, 2]), Err(VoiceError::DecodeFailure(_))));
    }

    #[test]
    fn test_fragment_through_base64() {
        let payload = to_base64(&encode(&[0.25, -0.5]));
        let samples = decode_fragment(&payload).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.25).abs() <= STEP);
        assert!((samples[1] + 0.5).abs() <= STEP);

        assert!(decode_fragment("not base64!").is_err());
    }

    #[test]
    fn test_resample_lengths() {
        let input = vec![0.5f32; 480];
        assert_eq!(resample_linear(&input, 48000, 16000).len(), 160);
        assert_eq!(resample_linear(&input, 24000, 48000).len(), 960);
        assert_eq!(resample_linear(&input, 16000, 16000), input);

        let ramp: Vec<f32> = vec![0.0, 1.0];
        let up = resample_linear(&ramp, 1, 2);
        assert_eq!(up, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_stream_resampler_does_not_drift() {
        // 512-sample device blocks at 44.1 kHz into the 16 kHz pipeline
        let mut resampler = StreamResampler::new(44_100, 16_000);
        let block = vec![0.25f32; 512];
        let blocks = 1000;

        let produced: usize = (0..blocks).map(|_| resampler.process(&block).len()).sum();
        let total_in = 512 * blocks;
        let expected = ((total_in - 1) as f64 * 16_000.0 / 44_100.0).floor() as usize + 1;
        assert_eq!(produced, expected);
    }

    #[test]
    fn test_stream_resampler_ignores_block_edges() {
        let ramp: Vec<f32> = (0..4800).map(|i| i as f32).collect();

        let mut whole = StreamResampler::new(48_000, 16_000);
        let expected = whole.process(&ramp);

        let mut blocks = StreamResampler::new(48_000, 16_000);
        let mut split = Vec::new();
        for chunk in ramp.chunks(441) {
            split.extend(blocks.process(chunk));
        }

        assert_eq!(split.len(), expected.len());
        for (k, (a, b)) in split.iter().zip(&expected).enumerate() {
            assert!((a - b).abs() < 1e-3, "sample {}: {} vs {}", k, a, b);
            assert!((a - k as f32 * 3.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_stream_resampler_upsamples_across_blocks() {
        let mut resampler = StreamResampler::new(16_000, 64_000);
        let first = resampler.process(&[0.0, 4.0]);
        let second = resampler.process(&[8.0]);
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 4);

        let joined: Vec<f32> = first.into_iter().chain(second).collect();
        for (k, value) in joined.iter().enumerate() {
            assert!((value - k as f32).abs() < 1e-4, "{} at {}", value, k);
        }

        let mut same = StreamResampler::new(16_000, 16_000);
        assert!(same.is_passthrough());
        assert_eq!(same.process(&[0.5, -0.5]), vec![0.5, -0.5]);
    }
}
