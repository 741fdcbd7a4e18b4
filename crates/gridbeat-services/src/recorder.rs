//! Master-bus capture and WAV encoding

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;
use tracing::{debug, info};

const CHANNELS: u16 = 2;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("WAV encoding failed: {0}")]
    Encode(#[from] hound::Error),
    #[error("Resampling failed: {0}")]
    Resample(String),
    #[error("Failed to write clip: {0}")]
    Io(#[from] std::io::Error),
}

/// Captures the limited master bus as interleaved stereo
#[derive(Debug)]
pub struct Recorder {
    sample_rate: u32,
    samples: Vec<f32>,
    recording: bool,
}

impl Recorder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Vec::new(),
            recording: false,
        }
    }

    /// Begin a new take, discarding anything captured before
    pub fn start(&mut self) {
        self.samples.clear();
        self.recording = true;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn recorded_frames(&self) -> usize {
        self.samples.len() / CHANNELS as usize
    }

    /// Append one rendered block
    pub fn capture(&mut self, left: &[f32], right: &[f32]) {
        if !self.recording {
            return;
        }
        self.samples.reserve(left.len() * 2);
        for (l, r) in left.iter().zip(right) {
            self.samples.push(*l);
            self.samples.push(*r);
        }
    }

    /// End the take and hand its samples over. Cheap; encoding happens on
    /// the returned [`RecordedTake`].
    pub fn finish(&mut self) -> RecordedTake {
        self.recording = false;
        RecordedTake {
            samples: std::mem::take(&mut self.samples),
            sample_rate: self.sample_rate,
        }
    }

    /// Finish the take and encode it, resampling to `export_rate` if set
    pub fn stop(&mut self, export_rate: Option<u32>) -> Result<RecordedClip, RecorderError> {
        self.finish().encode(export_rate)
    }

    /// Drop the current take without encoding
    pub fn discard(&mut self) {
        self.recording = false;
        self.samples.clear();
    }
}

/// Captured samples detached from the recorder
#[derive(Debug)]
pub struct RecordedTake {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl RecordedTake {
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS as usize
    }

    /// Encode to WAV, resampling to `export_rate` if set
    pub fn encode(self, export_rate: Option<u32>) -> Result<RecordedClip, RecorderError> {
        let target_rate = export_rate.filter(|r| *r > 0).unwrap_or(self.sample_rate);
        let samples = resample_interleaved(&self.samples, self.sample_rate, target_rate)?;
        let clip = RecordedClip::encode(&samples, target_rate)?;

        info!(
            frames = clip.frames,
            sample_rate = clip.sample_rate,
            bytes = clip.bytes.len(),
            "Recording finished"
        );
        Ok(clip)
    }
}

fn resample_interleaved(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, RecorderError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    let frames = samples.len() / CHANNELS as usize;
    let planar: Vec<Vec<f32>> = (0..CHANNELS as usize)
        .map(|ch| samples.iter().skip(ch).step_by(CHANNELS as usize).copied().collect())
        .collect();

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frames, CHANNELS as usize)
        .map_err(|e| RecorderError::Resample(format!("init: {e}")))?;

    let mut output = resampler
        .process(&planar, None)
        .map_err(|e| RecorderError::Resample(e.to_string()))?;

    // The sinc filter delays its output; flush zeros through until the end
    // of the take has come out
    let delay = resampler.output_delay();
    let expected = (frames as f64 * ratio).round() as usize;
    let produced = |output: &[Vec<f32>]| output.iter().map(Vec::len).min().unwrap_or(0);
    while produced(&output) < delay + expected {
        let tail = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| RecorderError::Resample(e.to_string()))?;
        if tail.iter().all(Vec::is_empty) {
            break;
        }
        for (channel, rest) in output.iter_mut().zip(tail) {
            channel.extend(rest);
        }
    }

    debug!(from_rate, to_rate, frames, delay, "Resampled recording");

    let out_frames = produced(&output).saturating_sub(delay).min(expected);
    let mut interleaved = Vec::with_capacity(out_frames * CHANNELS as usize);
    for i in delay..delay + out_frames {
        for channel in &output {
            interleaved.push(channel[i]);
        }
    }
    Ok(interleaved)
}

/// An encoded recording: a complete 32-bit float stereo WAV file in memory
#[derive(Debug, Clone)]
pub struct RecordedClip {
    bytes: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    frames: usize,
}

impl RecordedClip {
    fn encode(interleaved: &[f32], sample_rate: u32) -> Result<Self, RecorderError> {
        let spec = WavSpec {
            channels: CHANNELS,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let mut cursor = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for sample in interleaved {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;

        Ok(Self {
            bytes: cursor.into_inner(),
            sample_rate,
            channels: CHANNELS,
            frames: interleaved.len() / CHANNELS as usize,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate.max(1) as f64
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RecorderError> {
        let path = path.as_ref();
        std::fs::write(path, &self.bytes)?;
        info!(path = %path.display(), "Saved recording");
        Ok(())
    }
}
