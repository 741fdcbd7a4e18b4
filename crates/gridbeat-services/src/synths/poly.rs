//! Polyphonic oscillator bank with a gated ADSR envelope

use std::f64::consts::TAU;

use super::{Adsr, NoteTrigger, PendingNotes, Synth, seconds_to_frames};

const MAX_VOICES: usize = 8;
const LEVEL: f64 = 0.3;

/// Oscillator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sine => "sine",
            Self::Square => "square",
            Self::Sawtooth => "sawtooth",
            Self::Triangle => "triangle",
        }
    }

    /// Naive waveform value at `phase` in 0..1
    fn sample(self, phase: f64) -> f64 {
        match self {
            Self::Sine => (phase * TAU).sin(),
            Self::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Sawtooth => 2.0 * phase - 1.0,
            Self::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }

    /// Harsh waveforms are scaled down to sit level with the sine
    fn gain(self) -> f64 {
        match self {
            Self::Sine | Self::Triangle => 1.0,
            Self::Sawtooth => 0.6,
            Self::Square => 0.5,
        }
    }
}

const ENVELOPE: Adsr = Adsr::new(0.005, 0.1, 0.5, 0.3);

#[derive(Debug, Clone)]
struct PolyVoice {
    age: usize,
    frequency: f64,
    phase: f64,
    env: Adsr,
    gate: u32,
    velocity: f64,
}

impl Default for PolyVoice {
    fn default() -> Self {
        Self {
            age: 0,
            frequency: 0.0,
            phase: 0.0,
            env: ENVELOPE,
            gate: 0,
            velocity: 0.0,
        }
    }
}

impl PolyVoice {
    fn is_active(&self) -> bool {
        !self.env.is_idle()
    }

    fn trigger(&mut self, note: &NoteTrigger, sample_rate: f32) {
        self.age = 0;
        self.frequency = note.frequency as f64;
        self.phase = 0.0;
        self.gate = seconds_to_frames(note.duration, sample_rate);
        self.velocity = note.velocity as f64;
        self.env.gate_on();
    }

    fn tick(&mut self, dt: f64, waveform: Waveform) -> f64 {
        self.age += 1;
        if self.gate > 0 {
            self.gate -= 1;
        } else {
            self.env.gate_off();
        }
        let level = self.env.tick(dt);
        let osc = waveform.sample(self.phase);
        self.phase = (self.phase + self.frequency * dt).fract();
        osc * level * self.velocity
    }
}

/// Oscillator bank for the tonal instruments
pub struct PolySynth {
    sample_rate: f32,
    waveform: Waveform,
    voices: Vec<PolyVoice>,
    pending: PendingNotes,
}

impl PolySynth {
    pub fn new(waveform: Waveform, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            waveform,
            voices: vec![PolyVoice::default(); MAX_VOICES],
            pending: PendingNotes::default(),
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    fn start_voice(&mut self, note: NoteTrigger) {
        let idx = self
            .voices
            .iter()
            .position(|v| !v.is_active())
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

impl Synth for PolySynth {
    fn name(&self) -> &str {
        self.waveform.name()
    }

    fn trigger(&mut self, note: NoteTrigger) {
        self.pending.push(note);
    }

    fn release_all(&mut self) {
        self.pending.clear();
        for voice in &mut self.voices {
            voice.env.reset();
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let dt = 1.0 / self.sample_rate as f64;
        let gain = LEVEL * self.waveform.gain();
        for (frame_idx, sample) in out.iter_mut().enumerate() {
            while let Some(note) = self.pending.pop_due(frame_idx) {
                self.start_voice(note);
            }
            let mut mix = 0.0;
            for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
                mix += voice.tick(dt, self.waveform);
            }
            *sample = (mix * gain) as f32;
        }
        self.pending.advance(out.len());
    }

    fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    fn release_time(&self) -> f64 {
        ENVELOPE.release()
    }
}

impl std::fmt::Debug for PolySynth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolySynth")
            .field("waveform", &self.waveform)
            .field("active_voices", &self.active_voices())
            .finish()
    }
}
