//! Membrane voices: a sine with a fast downward pitch sweep (kick, toms)

use std::f64::consts::TAU;

use super::{
    NoteTrigger, PendingNotes, RELEASE_TIME_CONSTANTS, SILENCE, Synth, seconds_to_frames,
};

const MAX_VOICES: usize = 4;

/// Shape of a membrane hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MembraneParams {
    pub name: &'static str,
    /// Sweep depth: the hit starts at `frequency * (1 + sweep)`
    pub sweep: f64,
    /// Time constant of the pitch sweep in seconds
    pub pitch_decay: f64,
    /// Time constant of the body while the gate is open
    pub amp_decay: f64,
    /// Seconds to fall silent once the gate closes
    pub release: f64,
    pub level: f64,
}

impl MembraneParams {
    pub const KICK: Self = Self {
        name: "kick",
        sweep: 3.0,
        pitch_decay: 0.035,
        amp_decay: 0.3,
        release: 0.25,
        level: 0.9,
    };

    pub const TOM: Self = Self {
        name: "tom",
        sweep: 0.5,
        pitch_decay: 0.05,
        amp_decay: 0.3,
        release: 0.3,
        level: 0.7,
    };
}

#[derive(Debug, Clone, Default)]
struct MembraneVoice {
    active: bool,
    age: usize,
    frequency: f64,
    phase: f64,
    pitch_env: f64,
    amp_env: f64,
    gate: u32,
    velocity: f64,
}

impl MembraneVoice {
    fn trigger(&mut self, note: &NoteTrigger, sample_rate: f32) {
        self.active = true;
        self.age = 0;
        self.frequency = note.frequency as f64;
        self.phase = 0.0;
        self.pitch_env = 1.0;
        self.amp_env = 1.0;
        self.gate = seconds_to_frames(note.duration, sample_rate);
        self.velocity = note.velocity as f64;
    }

    fn tick(&mut self, dt: f64, params: &MembraneParams) -> f64 {
        self.age += 1;

        self.pitch_env *= (-dt / params.pitch_decay).exp();
        let freq = self.frequency * (1.0 + self.pitch_env * params.sweep);
        self.phase = (self.phase + freq * dt).fract();
        let osc = (self.phase * TAU).sin();

        let decay = if self.gate > 0 {
            self.gate -= 1;
            params.amp_decay
        } else {
            params.release / RELEASE_TIME_CONSTANTS
        };
        self.amp_env *= (-dt / decay).exp();
        if self.amp_env < SILENCE {
            self.active = false;
        }

        osc * self.amp_env * params.level * self.velocity
    }
}

/// Kick and tom synthesizer
pub struct MembraneSynth {
    sample_rate: f32,
    params: MembraneParams,
    voices: Vec<MembraneVoice>,
    pending: PendingNotes,
}

impl MembraneSynth {
    pub fn new(params: MembraneParams, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            params,
            voices: vec![MembraneVoice::default(); MAX_VOICES],
            pending: PendingNotes::default(),
        }
    }

    pub fn params(&self) -> &MembraneParams {
        &self.params
    }

    fn start_voice(&mut self, note: NoteTrigger) {
        // Free voice, else steal the oldest
        let idx = self
            .voices
            .iter()
            .position(|v| !v.active)
            .or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, v)| v.age)
                    .map(|(i, _)| i)
            })
            .unwrap_or(0);
        self.voices[idx].trigger(&note, self.sample_rate);
    }
}

impl Synth for MembraneSynth {
    fn name(&self) -> &str {
        self.params.name
    }

    fn trigger(&mut self, note: NoteTrigger) {
        self.pending.push(note);
    }

    fn release_all(&mut self) {
        self.pending.clear();
        for voice in &mut self.voices {
            voice.active = false;
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let dt = 1.0 / self.sample_rate as f64;
        for (frame_idx, sample) in out.iter_mut().enumerate() {
            while let Some(note) = self.pending.pop_due(frame_idx) {
                self.start_voice(note);
            }
            let mut mix = 0.0;
            for voice in self.voices.iter_mut().filter(|v| v.active) {
                mix += voice.tick(dt, &self.params);
            }
            *sample = mix as f32;
        }
        self.pending.advance(out.len());
    }

    fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    fn release_time(&self) -> f64 {
        self.params.release
    }
}

impl std::fmt::Debug for MembraneSynth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembraneSynth")
            .field("name", &self.params.name)
            .field("active_voices", &self.active_voices())
            .finish()
    }
}
