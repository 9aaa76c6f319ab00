//! cpal implementation of the host audio traits

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::host::{AudioHost, AudioSink, AudioSource, BlockCallback, CaptureContext, SourceId};
use super::mixer::SourceMixer;
use super::pcm::{resample_linear, StreamResampler};
use crate::error::VoiceError;

/// Host audio through cpal's default host
pub struct CpalHost {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalHost {
    pub fn new() -> Self {
        Self {
            input_device: None,
            output_device: None,
        }
    }

    /// Select devices by name (None for default)
    pub fn with_devices(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }

    /// List available input devices
    pub fn list_input_devices() -> Result<Vec<String>, VoiceError> {
        let devices = cpal::default_host()
            .input_devices()
            .map_err(|e| VoiceError::Device(format!("Failed to enumerate input devices: {}", e)))?;

        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    /// List available output devices
    pub fn list_output_devices() -> Result<Vec<String>, VoiceError> {
        let devices = cpal::default_host()
            .output_devices()
            .map_err(|e| VoiceError::Device(format!("Failed to enumerate output devices: {}", e)))?;

        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

impl Default for CpalHost {
    fn default() -> Self {
        Self::new()
    }
}

fn find_device(name: Option<&str>, input: bool) -> Option<Device> {
    let host = cpal::default_host();
    match name {
        Some(device_name) => {
            let mut devices = if input {
                host.input_devices().ok()?
            } else {
                host.output_devices().ok()?
            };
            devices.find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
        }
        None if input => host.default_input_device(),
        None => host.default_output_device(),
    }
}

impl AudioHost for CpalHost {
    fn open_capture_context(&self, sample_rate: u32) -> Result<Box<dyn CaptureContext>, VoiceError> {
        Ok(Box::new(CpalCaptureContext {
            device_name: self.input_device.clone(),
            sample_rate,
            closed: false,
        }))
    }

    fn open_playback_context(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioSink>, VoiceError> {
        let device = find_device(self.output_device.as_deref(), false)
            .ok_or_else(|| VoiceError::Device("No output device available".to_string()))?;
        let sink = CpalSink::open(device, sample_rate, ended)?;
        Ok(Box::new(sink))
    }
}

struct CpalCaptureContext {
    device_name: Option<String>,
    sample_rate: u32,
    closed: bool,
}

#[async_trait]
impl CaptureContext for CpalCaptureContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn request_microphone(&mut self) -> Result<Box<dyn AudioSource>, VoiceError> {
        if self.closed {
            return Err(VoiceError::Device("Capture context closed".to_string()));
        }

        let device_name = self.device_name.clone();
        let target_rate = self.sample_rate;

        // Opening the input stream is where the OS enforces microphone permission
        let microphone = tokio::task::spawn_blocking(move || {
            let device = find_device(device_name.as_deref(), true)
                .ok_or_else(|| VoiceError::PermissionDenied("No input device available".to_string()))?;
            CpalMicrophone::open(device, target_rate)
        })
        .await
        .map_err(|e| VoiceError::Device(format!("Microphone task failed: {}", e)))??;

        Ok(Box::new(microphone))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            tracing::debug!("Capture context closed");
        }
    }
}

/// Slot the stream callback forwards into once capture is started
type CallbackSlot = Arc<Mutex<Option<BlockCallback>>>;

struct CpalMicrophone {
    stream: Option<Stream>,
    callback: CallbackSlot,
}

// Safety: the stream is only touched from the owning controller task;
// audio data crosses threads through the Mutex-protected callback slot
unsafe impl Send for CpalMicrophone {}

impl CpalMicrophone {
    fn open(device: Device, target_rate: u32) -> Result<Self, VoiceError> {
        tracing::info!("Using input device: {}", device.name().unwrap_or_default());

        let supported_config = device
            .default_input_config()
            .map_err(|e| VoiceError::PermissionDenied(format!("Failed to get input config: {}", e)))?;

        let config = supported_config.config();
        tracing::info!(
            "Input device config: {} Hz, {} channels, {:?}",
            config.sample_rate.0,
            config.channels,
            supported_config.sample_format()
        );

        let callback: CallbackSlot = Arc::new(Mutex::new(None));

        let stream = match supported_config.sample_format() {
            SampleFormat::F32 => build_input::<f32>(&device, &config, target_rate, callback.clone()),
            SampleFormat::I16 => build_input::<i16>(&device, &config, target_rate, callback.clone()),
            SampleFormat::U16 => build_input::<u16>(&device, &config, target_rate, callback.clone()),
            format => {
                return Err(VoiceError::Device(format!("Unsupported sample format: {:?}", format)));
            }
        }?;

        stream
            .play()
            .map_err(|e| VoiceError::PermissionDenied(format!("Failed to start input stream: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            callback,
        })
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    target_rate: u32,
    callback: CallbackSlot,
) -> Result<Stream, VoiceError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut resampler = StreamResampler::new(config.sample_rate.0, target_rate);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Convert to mono by averaging channels
                let mono: Vec<f32> = data
                    .chunks(channels.max(1))
                    .map(|frame| {
                        frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / frame.len() as f32
                    })
                    .collect();
                let block = resampler.process(&mono);

                if let Some(deliver) = callback.lock().as_mut() {
                    deliver(&block);
                }
            },
            |err| {
                tracing::error!("Audio input error: {}", err);
            },
            None,
        )
        .map_err(|e| VoiceError::PermissionDenied(format!("Failed to build input stream: {}", e)))
}

impl AudioSource for CpalMicrophone {
    fn start(&mut self, on_block: BlockCallback) -> Result<(), VoiceError> {
        if self.stream.is_none() {
            return Err(VoiceError::Device("Microphone already released".to_string()));
        }
        *self.callback.lock() = Some(on_block);
        Ok(())
    }

    fn stop(&mut self) {
        *self.callback.lock() = None;
        if let Some(stream) = self.stream.take() {
            // Stream is dropped, stopping capture
            drop(stream);
            tracing::info!("Microphone stream released");
        }
    }
}

/// Output context rendering a `SourceMixer` timeline
struct CpalSink {
    stream: Option<Stream>,
    mixer: Arc<Mutex<SourceMixer>>,
    context_rate: u32,
    device_rate: u32,
}

// Safety: see CpalMicrophone; the mixer is the only state shared with the callback
unsafe impl Send for CpalSink {}

impl CpalSink {
    fn open(
        device: Device,
        context_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self, VoiceError> {
        tracing::info!("Using output device: {}", device.name().unwrap_or_default());

        let supported_config = device
            .default_output_config()
            .map_err(|e| VoiceError::Device(format!("Failed to get output config: {}", e)))?;
        let config = supported_config.config();
        let device_rate = config.sample_rate.0;

        let mixer = Arc::new(Mutex::new(SourceMixer::new(device_rate)));

        let stream = match supported_config.sample_format() {
            SampleFormat::F32 => build_output::<f32>(&device, &config, mixer.clone(), ended),
            SampleFormat::I16 => build_output::<i16>(&device, &config, mixer.clone(), ended),
            SampleFormat::U16 => build_output::<u16>(&device, &config, mixer.clone(), ended),
            format => {
                return Err(VoiceError::Device(format!("Unsupported sample format: {:?}", format)));
            }
        }?;

        stream
            .play()
            .map_err(|e| VoiceError::Device(format!("Failed to start output stream: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            mixer,
            context_rate,
            device_rate,
        })
    }
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<SourceMixer>>,
    ended: mpsc::UnboundedSender<SourceId>,
) -> Result<Stream, VoiceError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                let finished = mixer.lock().render(&mut scratch, channels);

                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = T::from_sample(*sample);
                }
                for id in finished {
                    let _ = ended.send(id);
                }
            },
            |err| {
                tracing::error!("Audio output error: {}", err);
            },
            None,
        )
        .map_err(|e| VoiceError::Device(format!("Failed to build output stream: {}", e)))
}

impl AudioSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.context_rate
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start_at: f64) {
        let samples = resample_linear(&samples, self.context_rate, self.device_rate);
        self.mixer.lock().schedule(id, samples, start_at);
    }

    fn stop(&mut self, id: SourceId) {
        self.mixer.lock().stop(id);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.mixer.lock().clear();
            drop(stream);
            tracing::info!("Output stream released");
        }
    }
}
