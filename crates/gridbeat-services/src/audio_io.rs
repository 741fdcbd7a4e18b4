//! cpal output for the live engine

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::engine::Renderer;

#[derive(Debug, Error)]
pub enum AudioOutputError {
    #[error("No audio output devices found")]
    NoDevices,
    #[error("Failed to get default output config: {0}")]
    ConfigError(String),
    #[error("Failed to build output stream: {0}")]
    StreamError(String),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("Audio output refused to start: {0}")]
    Refused(String),
}

/// Names of every output device on the default host
pub fn output_device_names() -> Result<Vec<String>, AudioOutputError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioOutputError::ConfigError(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// The named device, or the default one when the name is unset or unknown
fn pick_device(name: Option<&str>) -> Result<cpal::Device, AudioOutputError> {
    let host = cpal::default_host();
    if let Some(wanted) = name {
        let found = host
            .output_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| d.name().is_ok_and(|n| n == wanted)));
        match found {
            Some(device) => return Ok(device),
            None => warn!(device = wanted, "Output device not found, using the default"),
        }
    }
    host.default_output_device().ok_or(AudioOutputError::NoDevices)
}

/// Live stream that pulls every callback buffer from the engine's renderer
pub struct OutputStream {
    stop_flag: Arc<AtomicBool>,
    device_name: String,
    sample_rate: u32,
    channels: u16,
    stream: cpal::Stream,
}

impl OutputStream {
    /// Open `device` (or the default output) at its preferred config
    pub fn open(device: Option<&str>, renderer: Renderer) -> Result<Self, AudioOutputError> {
        let device = pick_device(device)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioOutputError::ConfigError(e.to_string()))?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, renderer, stop_flag.clone()),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, renderer, stop_flag.clone()),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, renderer, stop_flag.clone()),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, renderer, stop_flag.clone()),
            other => Err(AudioOutputError::UnsupportedFormat(other.to_string())),
        }?;
        stream.play().map_err(|e| AudioOutputError::StreamError(e.to_string()))?;

        let device_name = device.name().unwrap_or_default();
        info!(
            device = %device_name,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = %format,
            "Opened output stream"
        );

        Ok(Self {
            stop_flag,
            device_name,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            stream,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn pause(&self) -> Result<(), AudioOutputError> {
        self.stream.pause().map_err(|e| AudioOutputError::StreamError(e.to_string()))
    }

    pub fn resume(&self) -> Result<(), AudioOutputError> {
        self.stream.play().map_err(|e| AudioOutputError::StreamError(e.to_string()))
    }

    /// Output silence from the next callback on
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Render as f32 and convert to the device's sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    renderer: Renderer,
    stop_flag: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioOutputError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels;
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Grows once to the device's buffer size
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let buffer = &mut scratch[..data.len()];
                if stop_flag.load(Ordering::Acquire) {
                    buffer.fill(0.0);
                } else {
                    renderer.render(buffer, channels);
                }
                for (out, sample) in data.iter_mut().zip(buffer.iter()) {
                    *out = T::from_sample_(*sample);
                }
            },
            |err| error!(error = %err, "Output stream error"),
            None,
        )
        .map_err(|e| AudioOutputError::StreamError(e.to_string()))
}
