//! Metallic voices: inharmonic square partials through a highpass (hats, cymbal)

use super::{
    NoteTrigger, PendingNotes, RELEASE_TIME_CONSTANTS, SILENCE, Synth, seconds_to_frames,
    white_noise,
};

const MAX_VOICES: usize = 4;

/// Partial ratios of the classic six-oscillator metal bank
const PARTIAL_RATIOS: [f64; 6] = [1.0, 1.342, 1.2312, 1.6532, 1.9523, 2.1523];

/// Shape of a metallic hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetalParams {
    pub name: &'static str,
    /// Time constant while the gate is open
    pub decay: f64,
    /// Seconds to fall silent once the gate closes
    pub release: f64,
    /// One-pole coefficient of the highpass
    pub highpass: f64,
    /// Share of white noise mixed into the partials
    pub noise_mix: f64,
    pub level: f64,
    /// A new hit cuts the ringing ones
    pub choke: bool,
}

impl MetalParams {
    pub const CLOSED_HAT: Self = Self {
        name: "hihat",
        decay: 0.04,
        release: 0.05,
        highpass: 0.3,
        noise_mix: 0.4,
        level: 0.6,
        choke: true,
    };

    pub const OPEN_HAT: Self = Self {
        name: "openhat",
        decay: 0.35,
        release: 0.4,
        highpass: 0.3,
        noise_mix: 0.4,
        level: 0.5,
        choke: true,
    };

    pub const CYMBAL: Self = Self {
        name: "cymbal",
        decay: 1.0,
        release: 1.2,
        highpass: 0.25,
        noise_mix: 0.5,
        level: 0.45,
        choke: false,
    };
}

#[derive(Debug, Clone, Default)]
struct MetalVoice {
    active: bool,
    age: usize,
    frequency: f64,
    phases: [f64; 6],
    amp_env: f64,
    filter_state: f64,
    gate: u32,
    velocity: f64,
}

impl MetalVoice {
    fn trigger(&mut self, note: &NoteTrigger, sample_rate: f32) {
        *self = Self {
            active: true,
            frequency: note.frequency as f64,
            amp_env: 1.0,
            gate: seconds_to_frames(note.duration, sample_rate),
            velocity: note.velocity as f64,
            ..Self::default()
        };
    }

    fn tick(&mut self, dt: f64, params: &MetalParams) -> f64 {
        self.age += 1;

        let mut partials = 0.0;
        for (phase, ratio) in self.phases.iter_mut().zip(PARTIAL_RATIOS) {
            *phase = (*phase + self.frequency * ratio * dt).fract();
            partials += if *phase < 0.5 { 1.0 } else { -1.0 };
        }
        let partials = partials / PARTIAL_RATIOS.len() as f64;
        let metallic = partials * (1.0 - params.noise_mix) + white_noise() * params.noise_mix;

        self.filter_state += params.highpass * (metallic - self.filter_state);
        let highpassed = metallic - self.filter_state;

        let tau = if self.gate > 0 {
            self.gate -= 1;
            params.decay
        } else {
            params.release / RELEASE_TIME_CONSTANTS
        };
        self.amp_env *= (-dt / tau).exp();
        if self.amp_env < SILENCE {
            self.active = false;
        }

        highpassed * self.amp_env * params.level * self.velocity
    }
}

/// Hi-hat and cymbal synthesizer
pub struct MetalSynth {
    sample_rate: f32,
    params: MetalParams,
    voices: Vec<MetalVoice>,
    pending: PendingNotes,
}

impl MetalSynth {
    pub fn new(params: MetalParams, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            params,
            voices: vec![MetalVoice::default(); MAX_VOICES],
            pending: PendingNotes::default(),
        }
    }

    pub fn params(&self) -> &MetalParams {
        &self.params
    }

    fn start_voice(&mut self, note: NoteTrigger) {
        if self.params.choke {
            for voice in &mut self.voices {
                voice.active = false;
            }
        }
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

impl Synth for MetalSynth {
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

impl std::fmt::Debug for MetalSynth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalSynth")
            .field("name", &self.params.name)
            .field("active_voices", &self.active_voices())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(offset: u32) -> NoteTrigger {
        NoteTrigger { frequency: 370.0, duration: 0.5, offset, velocity: 1.0 }
    }

    #[test]
    fn test_hats_choke() {
        let mut synth = MetalSynth::new(MetalParams::OPEN_HAT, 48_000.0);
        synth.trigger(hit(0));
        synth.trigger(hit(100));
        let mut block = [0.0; 256];
        synth.render(&mut block);
        assert_eq!(synth.active_voices(), 1);
    }

    #[test]
    fn test_cymbals_overlap() {
        let mut synth = MetalSynth::new(MetalParams::CYMBAL, 48_000.0);
        synth.trigger(hit(0));
        synth.trigger(hit(100));
        let mut block = [0.0; 256];
        synth.render(&mut block);
        assert_eq!(synth.active_voices(), 2);
    }
}
