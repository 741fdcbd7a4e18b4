//! Noise-burst voices: snare, rim and clap

use std::f64::consts::TAU;

use super::{
    NoteTrigger, PendingNotes, RELEASE_TIME_CONSTANTS, SILENCE, Synth, seconds_to_frames,
    white_noise,
};

const MAX_VOICES: usize = 4;
const CLAP_BURSTS: usize = 4;
/// Gap between clap bursts in seconds
const CLAP_BURST_SPACING: f64 = 0.017;

/// Which noise-burst sound a synth plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    /// Tonal body at the note frequency plus bandpassed rattle
    Snare,
    /// Short click at the note frequency
    Rim,
    /// Several quick bursts followed by a tail
    Clap,
}

impl NoiseKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Snare => "snare",
            Self::Rim => "rim",
            Self::Clap => "clap",
        }
    }

    fn release(self) -> f64 {
        match self {
            Self::Snare => 0.12,
            Self::Rim => 0.03,
            Self::Clap => 0.2,
        }
    }

    fn level(self) -> f64 {
        match self {
            Self::Snare => 0.8,
            Self::Rim => 0.7,
            Self::Clap => 0.7,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NoiseVoice {
    active: bool,
    age: usize,
    frequency: f64,
    phase: f64,
    phase2: f64,
    tone_env: f64,
    noise_env: f64,
    burst_count: usize,
    burst_timer: u32,
    burst_spacing: u32,
    filter_state: f64,
    filter_state2: f64,
    gate: u32,
    velocity: f64,
}

impl NoiseVoice {
    fn trigger(&mut self, kind: NoiseKind, note: &NoteTrigger, sample_rate: f32) {
        *self = Self {
            active: true,
            frequency: note.frequency as f64,
            tone_env: 1.0,
            noise_env: 1.0,
            gate: seconds_to_frames(note.duration, sample_rate),
            velocity: note.velocity as f64,
            ..Self::default()
        };
        if kind == NoiseKind::Clap {
            self.burst_count = CLAP_BURSTS;
            self.burst_spacing = seconds_to_frames(CLAP_BURST_SPACING, sample_rate);
        }
    }

    fn tick(&mut self, kind: NoiseKind, dt: f64) -> f64 {
        self.age += 1;
        let gate_open = self.gate > 0;
        if gate_open {
            self.gate -= 1;
        }
        let release_tau = kind.release() / RELEASE_TIME_CONSTANTS;

        let sample = match kind {
            NoiseKind::Snare => self.tick_snare(dt, gate_open, release_tau),
            NoiseKind::Rim => self.tick_rim(dt, gate_open, release_tau),
            NoiseKind::Clap => self.tick_clap(dt, gate_open, release_tau),
        };

        if self.tone_env < SILENCE && self.noise_env < SILENCE {
            self.active = false;
        }

        sample * kind.level() * self.velocity
    }

    fn tick_snare(&mut self, dt: f64, gate_open: bool, release_tau: f64) -> f64 {
        self.phase = (self.phase + self.frequency * dt).fract();
        self.phase2 = (self.phase2 + self.frequency * 1.83 * dt).fract();
        let tones = (self.phase * TAU).sin() * 0.6 + (self.phase2 * TAU).sin() * 0.4;

        // Two-pole bandpass approximation for the rattle
        let noise = white_noise();
        self.filter_state += 0.15 * (noise - self.filter_state);
        self.filter_state2 += 0.15 * 0.7 * (self.filter_state - self.filter_state2);
        let rattle = self.filter_state - self.filter_state2;

        let (tone_tau, noise_tau) = if gate_open { (0.03, 0.1) } else { (release_tau, release_tau) };
        self.tone_env *= (-dt / tone_tau).exp();
        self.noise_env *= (-dt / noise_tau).exp();

        tones * self.tone_env * 0.4 + rattle * self.noise_env * 1.5
    }

    fn tick_rim(&mut self, dt: f64, gate_open: bool, release_tau: f64) -> f64 {
        self.phase = (self.phase + self.frequency * dt).fract();
        let tone = (self.phase * TAU).sin();
        let noise = white_noise();

        let (tone_tau, noise_tau) = if gate_open {
            (0.015, 0.005)
        } else {
            (release_tau.min(0.015), release_tau.min(0.005))
        };
        self.tone_env *= (-dt / tone_tau).exp();
        self.noise_env *= (-dt / noise_tau).exp();

        (tone * 0.7 + noise * self.noise_env * 0.3) * self.tone_env
    }

    fn tick_clap(&mut self, dt: f64, gate_open: bool, release_tau: f64) -> f64 {
        if self.burst_count > 0 {
            self.burst_timer += 1;
            if self.burst_timer > self.burst_spacing {
                self.burst_timer = 0;
                self.burst_count -= 1;
                self.noise_env = 0.9;
            }
        }

        let noise = white_noise();
        self.filter_state += 0.12 * (noise - self.filter_state);
        let bandpassed = noise - self.filter_state * 1.8;

        let tau = if self.burst_count > 0 {
            0.004
        } else if gate_open {
            0.15
        } else {
            release_tau
        };
        self.noise_env *= (-dt / tau).exp();
        // No tonal body; the tone envelope only gates deactivation
        self.tone_env = 0.0;

        (bandpassed * 1.5).tanh() * self.noise_env
    }
}

/// Snare, rim and clap synthesizer
pub struct NoiseSynth {
    sample_rate: f32,
    kind: NoiseKind,
    voices: Vec<NoiseVoice>,
    pending: PendingNotes,
}

impl NoiseSynth {
    pub fn new(kind: NoiseKind, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            kind,
            voices: vec![NoiseVoice::default(); MAX_VOICES],
            pending: PendingNotes::default(),
        }
    }

    pub fn kind(&self) -> NoiseKind {
        self.kind
    }

    fn start_voice(&mut self, note: NoteTrigger) {
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
        self.voices[idx].trigger(self.kind, &note, self.sample_rate);
    }
}

impl Synth for NoiseSynth {
    fn name(&self) -> &str {
        self.kind.name()
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
                mix += voice.tick(self.kind, dt);
            }
            *sample = mix as f32;
        }
        self.pending.advance(out.len());
    }

    fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    fn release_time(&self) -> f64 {
        self.kind.release()
    }
}

impl std::fmt::Debug for NoiseSynth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseSynth")
            .field("kind", &self.kind)
            .field("active_voices", &self.active_voices())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap_bursts_retrigger() {
        let mut voice = NoiseVoice::default();
        let note = NoteTrigger { frequency: 150.0, duration: 0.2, offset: 0, velocity: 1.0 };
        voice.trigger(NoiseKind::Clap, &note, 48_000.0);
        let dt = 1.0 / 48_000.0;
        let spacing = voice.burst_spacing as usize;
        for _ in 0..=spacing {
            voice.tick(NoiseKind::Clap, dt);
        }
        assert_eq!(voice.burst_count, CLAP_BURSTS - 1);
        // Envelope was re-armed by the burst
        assert!(voice.noise_env > 0.5);
    }

    #[test]
    fn test_rim_is_short() {
        let mut synth = NoiseSynth::new(NoiseKind::Rim, 48_000.0);
        synth.trigger(NoteTrigger { frequency: 659.0, duration: 0.5, offset: 0, velocity: 1.0 });
        let mut block = vec![0.0; 9_600];
        synth.render(&mut block);
        assert_eq!(synth.active_voices(), 0);
    }
}
