//! Transport state and step timing

use serde::{Deserialize, Serialize};

/// One measure is four quarter-note beats
pub const BEATS_PER_MEASURE: f64 = 4.0;
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 300.0;

/// Length of one slot in beats for a track with `steps` slots per measure
pub fn slot_beats(steps: usize) -> f64 {
    BEATS_PER_MEASURE / steps.max(1) as f64
}

/// Length of one slot in seconds: `(60 / bpm) / (steps / 4)`
pub fn slot_seconds(bpm: f64, steps: usize) -> f64 {
    (60.0 / bpm) / (steps.max(1) as f64 / BEATS_PER_MEASURE)
}

/// Beat position of absolute tick `tick` for a loop of `steps` slots per measure.
/// Computed from integers so measure boundaries land exactly.
pub fn tick_beat(tick: u64, steps: usize) -> f64 {
    (tick * BEATS_PER_MEASURE as u64) as f64 / steps.max(1) as f64
}

/// Transport playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
}

/// Master timeline: tempo and position.
///
/// Position is counted in frames while playing. Beats are derived from the
/// frames elapsed since the last tempo change, so a tempo edit takes effect
/// at the current position without a jump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transport {
    pub state: TransportState,
    /// Sample rate for time conversion
    pub sample_rate: u32,
    bpm: f64,
    /// Frames elapsed while playing
    position_frames: u64,
    /// Frame and beat of the last tempo change
    anchor_frame: u64,
    anchor_beats: f64,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            state: TransportState::Stopped,
            sample_rate: 48_000,
            bpm: 120.0,
            position_frames: 0,
            anchor_frame: 0,
            anchor_beats: 0.0,
        }
    }
}

impl Transport {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Default::default()
        }
    }

    pub fn play(&mut self) {
        self.state = TransportState::Playing;
    }

    /// Stop and rewind to the start
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
        self.rewind();
    }

    pub fn rewind(&mut self) {
        self.position_frames = 0;
        self.anchor_frame = 0;
        self.anchor_beats = 0.0;
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Change tempo at the current position (clamped to 20-300 BPM)
    pub fn set_bpm(&mut self, bpm: f64) {
        let bpm = if bpm.is_finite() { bpm.clamp(MIN_BPM, MAX_BPM) } else { self.bpm };
        self.anchor_beats = self.position_beats();
        self.anchor_frame = self.position_frames;
        self.bpm = bpm;
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.anchor_beats = self.position_beats();
        self.anchor_frame = self.position_frames;
        self.sample_rate = sample_rate.max(1);
    }

    /// Beat position `frame_offset` frames after the current position
    pub fn beats_at(&self, frame_offset: u64) -> f64 {
        let elapsed = (self.position_frames + frame_offset - self.anchor_frame) as f64;
        self.anchor_beats + elapsed * self.bpm / (60.0 * self.sample_rate as f64)
    }

    pub fn position_beats(&self) -> f64 {
        self.beats_at(0)
    }

    pub fn position_frames(&self) -> u64 {
        self.position_frames
    }

    /// Position in seconds
    pub fn position_secs(&self) -> f64 {
        self.position_beats() * self.seconds_per_beat()
    }

    /// Frames from the current position until `beat` is reached
    pub fn frames_until(&self, beat: f64) -> f64 {
        (beat - self.position_beats()) * self.samples_per_beat()
    }

    /// Advance position by `frames`, returning the beat span covered
    pub fn advance(&mut self, frames: u64) -> (f64, f64) {
        let start = self.position_beats();
        self.position_frames += frames;
        (start, self.position_beats())
    }

    /// Samples per beat at current tempo
    pub fn samples_per_beat(&self) -> f64 {
        self.sample_rate as f64 * 60.0 / self.bpm
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn measure_seconds(&self) -> f64 {
        BEATS_PER_MEASURE * self.seconds_per_beat()
    }

    /// Current measure number (0-indexed)
    pub fn current_measure(&self) -> u64 {
        (self.position_beats() / BEATS_PER_MEASURE) as u64
    }

    /// Format position as MM:SS.ss
    pub fn format_time(&self) -> String {
        let secs = self.position_secs();
        let mins = (secs / 60.0) as u32;
        let secs_rem = secs % 60.0;
        format!("{:02}:{:05.2}", mins, secs_rem)
    }
}
