//! Track and step representation

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instrument::InstrumentType;

/// Step buffer capacity; only the first `step_count` steps are played
pub const MAX_STEPS: usize = 32;
pub const MIN_STEPS: usize = 1;
pub const MIN_VELOCITY: u8 = 1;
pub const MAX_VELOCITY: u8 = 100;

const DEFAULT_STEP_COUNT: usize = 16;
const DEFAULT_VOLUME: f32 = 0.8;

/// Unique identifier for tracks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One grid cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Step {
    pub active: bool,
    /// Pitch string; empty means the instrument's default note
    pub note: String,
    /// Velocity (1-100)
    pub velocity: u8,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            active: false,
            note: String::new(),
            velocity: MAX_VELOCITY,
        }
    }
}

impl Step {
    /// An active step playing `note` at full velocity
    pub fn on(note: impl Into<String>) -> Self {
        Self {
            active: true,
            note: note.into(),
            velocity: MAX_VELOCITY,
        }
    }

    /// Velocity mapped into 0.01..=1.0
    pub fn normalized_velocity(&self) -> f32 {
        self.velocity.clamp(MIN_VELOCITY, MAX_VELOCITY) as f32 / MAX_VELOCITY as f32
    }
}

/// One instrument lane: pattern, mix and effect settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub instrument_type: InstrumentType,
    #[serde(default = "default_step_count")]
    pub step_count: usize,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Volume (0.0 to 1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    /// Pan (-1.0 left, 0.0 center, 1.0 right)
    #[serde(default)]
    pub pan: f32,
    /// Effect sends in percent (0-100)
    #[serde(default)]
    pub delay: u8,
    #[serde(default)]
    pub reverb: u8,
    #[serde(default)]
    pub distortion: u8,
}

fn default_step_count() -> usize {
    DEFAULT_STEP_COUNT
}

fn default_volume() -> f32 {
    DEFAULT_VOLUME
}

impl Track {
    pub fn new(id: impl Into<TrackId>, instrument_type: InstrumentType) -> Self {
        Self {
            id: id.into(),
            instrument_type,
            step_count: DEFAULT_STEP_COUNT,
            steps: vec![Step::default(); DEFAULT_STEP_COUNT],
            volume: DEFAULT_VOLUME,
            muted: false,
            pan: 0.0,
            delay: 0,
            reverb: 0,
            distortion: 0,
        }
    }

    /// Activate the given step indices with the instrument's default note
    pub fn with_active_steps(mut self, indices: &[usize]) -> Self {
        for &index in indices {
            self.set_active(index, true);
        }
        self
    }

    pub fn with_step_count(mut self, step_count: usize) -> Self {
        self.set_step_count(step_count);
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Step count clamped to the playable range
    pub fn effective_step_count(&self) -> usize {
        self.step_count.clamp(MIN_STEPS, MAX_STEPS)
    }

    /// Change the step count, growing the step buffer if needed.
    /// Steps past the new count are kept so shrinking and regrowing is lossless.
    pub fn set_step_count(&mut self, step_count: usize) {
        self.step_count = step_count.clamp(MIN_STEPS, MAX_STEPS);
        if self.steps.len() < self.step_count {
            self.steps.resize(self.step_count, Step::default());
        }
    }

    /// Step at `index`, if it lies inside the playable range
    pub fn step(&self, index: usize) -> Option<&Step> {
        if index >= self.effective_step_count() {
            return None;
        }
        self.steps.get(index)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        if index >= MAX_STEPS {
            return None;
        }
        if self.steps.len() <= index {
            self.steps.resize(index + 1, Step::default());
        }
        self.steps.get_mut(index)
    }

    pub fn set_active(&mut self, index: usize, active: bool) {
        if let Some(step) = self.step_mut(index) {
            step.active = active;
        }
    }

    pub fn toggle_step(&mut self, index: usize) {
        if let Some(step) = self.step_mut(index) {
            step.active = !step.active;
        }
    }

    /// Pitch that sounds for a step: its own note, else the instrument default
    pub fn pitch_for<'a>(&'a self, step: &'a Step) -> &'a str {
        if step.note.trim().is_empty() {
            self.instrument_type.default_note()
        } else {
            &step.note
        }
    }

    /// Gain contributed to the mix before normalization
    pub fn base_gain(&self) -> f32 {
        self.volume.clamp(0.0, 1.0)
    }
}
