//! Engine tuning, loadable from TOML

use serde::{Deserialize, Serialize};

use crate::polyphony::{MAX_TOTAL_VOICES, MAX_VOICES_PER_TRACK};

pub const MAX_ACTIVE_PARTS: usize = 16;
pub const DEFAULT_UI_EVENT_CAPACITY: usize = 1024;

/// Ceilings and defaults for an engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_total_voices: usize,
    pub max_voices_per_track: usize,
    /// Parts beyond this count are not created
    pub max_active_parts: usize,
    /// Sample rate of the offline backend
    pub sample_rate: u32,
    /// Resample recordings to this rate on export
    pub export_sample_rate: Option<u32>,
    /// Pending UI notifications kept before new ones are dropped
    pub ui_event_capacity: usize,
    pub default_bpm: f64,
    /// Output device name; the host default when unset
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_total_voices: MAX_TOTAL_VOICES,
            max_voices_per_track: MAX_VOICES_PER_TRACK,
            max_active_parts: MAX_ACTIVE_PARTS,
            sample_rate: 48_000,
            export_sample_rate: None,
            ui_event_capacity: DEFAULT_UI_EVENT_CAPACITY,
            default_bpm: 120.0,
            output_device: None,
        }
    }
}
