//! Long colored-noise voices with slow attack and release

use super::{Adsr, NoteTrigger, PendingNotes, Synth, seconds_to_frames, white_noise};

const MAX_VOICES: usize = 4;
const LEVEL: f64 = 0.25;
const ENVELOPE: Adsr = Adsr::new(0.05, 0.2, 0.7, 1.0);

/// Spectral color of the noise source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

impl NoiseColor {
    pub fn name(self) -> &'static str {
        match self {
            Self::White => "whitenoise",
            Self::Pink => "pinknoise",
            Self::Brown => "brownnoise",
        }
    }
}

/// Filter memory for pink (Kellet) and brown (leaky integrator) noise
#[derive(Debug, Clone, Copy, Default)]
struct ColorFilter {
    b: [f64; 7],
}

impl ColorFilter {
    fn next(&mut self, color: NoiseColor) -> f64 {
        let white = white_noise();
        match color {
            NoiseColor::White => white,
            NoiseColor::Pink => {
                let b = &mut self.b;
                b[0] = 0.99886 * b[0] + white * 0.0555179;
                b[1] = 0.99332 * b[1] + white * 0.0750759;
                b[2] = 0.96900 * b[2] + white * 0.1538520;
                b[3] = 0.86650 * b[3] + white * 0.3104856;
                b[4] = 0.55000 * b[4] + white * 0.5329522;
                b[5] = -0.7616 * b[5] - white * 0.0168980;
                let pink = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362;
                b[6] = white * 0.115926;
                pink * 0.11
            }
            NoiseColor::Brown => {
                self.b[0] = (self.b[0] + 0.02 * white) / 1.02;
                self.b[0] * 3.5
            }
        }
    }
}

#[derive(Debug, Clone)]
struct AmbientVoice {
    age: usize,
    env: Adsr,
    filter: ColorFilter,
    gate: u32,
    velocity: f64,
}

impl Default for AmbientVoice {
    fn default() -> Self {
        Self {
            age: 0,
            env: ENVELOPE,
            filter: ColorFilter::default(),
            gate: 0,
            velocity: 0.0,
        }
    }
}

impl AmbientVoice {
    fn is_active(&self) -> bool {
        !self.env.is_idle()
    }

    fn trigger(&mut self, note: &NoteTrigger, sample_rate: f32) {
        self.age = 0;
        self.gate = seconds_to_frames(note.duration, sample_rate);
        self.velocity = note.velocity as f64;
        self.env.gate_on();
    }

    fn tick(&mut self, dt: f64, color: NoiseColor) -> f64 {
        self.age += 1;
        if self.gate > 0 {
            self.gate -= 1;
        } else {
            self.env.gate_off();
        }
        self.filter.next(color) * self.env.tick(dt) * self.velocity
    }
}

/// White, pink and brown noise pads. The trigger frequency is ignored.
pub struct AmbientNoiseSynth {
    sample_rate: f32,
    color: NoiseColor,
    voices: Vec<AmbientVoice>,
    pending: PendingNotes,
}

impl AmbientNoiseSynth {
    pub fn new(color: NoiseColor, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            color,
            voices: vec![AmbientVoice::default(); MAX_VOICES],
            pending: PendingNotes::default(),
        }
    }

    pub fn color(&self) -> NoiseColor {
        self.color
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

impl Synth for AmbientNoiseSynth {
    fn name(&self) -> &str {
        self.color.name()
    }

    fn trigger(&mut self, note: NoteTrigger) {
        self.pending.push(note);
    }

    fn release_all(&mut self) {
        self.pending.clear();
        for voice in &mut self.voices {
            voice.env.reset();
            voice.filter = ColorFilter::default();
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let dt = 1.0 / self.sample_rate as f64;
        for (frame_idx, sample) in out.iter_mut().enumerate() {
            while let Some(note) = self.pending.pop_due(frame_idx) {
                self.start_voice(note);
            }
            let mut mix = 0.0;
            for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
                mix += voice.tick(dt, self.color);
            }
            *sample = (mix * LEVEL) as f32;
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

impl std::fmt::Debug for AmbientNoiseSynth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientNoiseSynth")
            .field("color", &self.color)
            .field("active_voices", &self.active_voices())
            .finish()
    }
}
