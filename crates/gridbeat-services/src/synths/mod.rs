//! Synthesis units and the voice factory
//!
//! Every family has its own trigger semantics (a membrane sweeps its pitch, a
//! noise burst ignores most of it, the oscillator bank holds a gate) but they
//! all share one contract: attack at the trigger offset, release once the
//! note duration has elapsed.

mod ambient;
mod membrane;
mod metal;
mod noise;
mod poly;

pub use ambient::{AmbientNoiseSynth, NoiseColor};
pub use membrane::{MembraneParams, MembraneSynth};
pub use metal::{MetalParams, MetalSynth};
pub use noise::{NoiseKind, NoiseSynth};
pub use poly::{PolySynth, Waveform};

use gridbeat_core::{InstrumentFamily, InstrumentType};

/// Largest block a synth renders in one call
pub const MAX_BLOCK_SIZE: usize = 4096;

/// A note to start, relative to the next rendered block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTrigger {
    /// Pitch in Hz
    pub frequency: f32,
    /// Seconds the note is held before its release stage
    pub duration: f64,
    /// Frame offset into the next rendered block
    pub offset: u32,
    /// Normalized velocity (0.0-1.0)
    pub velocity: f32,
}

/// Uniform interface implemented by every synthesis family
pub trait Synth: Send {
    fn name(&self) -> &str;
    /// Queue a note; it starts at `note.offset` in the next `render` call
    fn trigger(&mut self, note: NoteTrigger);
    /// Silence every voice immediately and drop queued notes
    fn release_all(&mut self);
    /// Render mono output, overwriting `out`
    fn render(&mut self, out: &mut [f32]);
    fn active_voices(&self) -> usize;
    /// Seconds a voice keeps sounding after its gate closes
    fn release_time(&self) -> f64;
}

/// Synthesis unit owned by a channel strip
pub enum SynthUnit {
    Membrane(MembraneSynth),
    Noise(NoiseSynth),
    Metal(MetalSynth),
    Poly(PolySynth),
    Ambient(AmbientNoiseSynth),
}

impl SynthUnit {
    fn inner(&self) -> &dyn Synth {
        match self {
            Self::Membrane(s) => s,
            Self::Noise(s) => s,
            Self::Metal(s) => s,
            Self::Poly(s) => s,
            Self::Ambient(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Synth {
        match self {
            Self::Membrane(s) => s,
            Self::Noise(s) => s,
            Self::Metal(s) => s,
            Self::Poly(s) => s,
            Self::Ambient(s) => s,
        }
    }

    pub fn family(&self) -> InstrumentFamily {
        match self {
            Self::Membrane(_) => InstrumentFamily::Membrane,
            Self::Noise(_) => InstrumentFamily::NoiseBurst,
            Self::Metal(_) => InstrumentFamily::Metallic,
            Self::Poly(_) => InstrumentFamily::Polyphonic,
            Self::Ambient(_) => InstrumentFamily::AmbientNoise,
        }
    }

    pub fn name(&self) -> &str {
        self.inner().name()
    }

    pub fn trigger(&mut self, note: NoteTrigger) {
        self.inner_mut().trigger(note);
    }

    pub fn release_all(&mut self) {
        self.inner_mut().release_all();
    }

    pub fn render(&mut self, out: &mut [f32]) {
        self.inner_mut().render(out);
    }

    pub fn active_voices(&self) -> usize {
        self.inner().active_voices()
    }

    pub fn release_time(&self) -> f64 {
        self.inner().release_time()
    }
}

impl std::fmt::Debug for SynthUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthUnit")
            .field("name", &self.name())
            .field("active_voices", &self.active_voices())
            .finish()
    }
}

/// Voice factory: build the synthesis unit for an instrument type
pub fn build_synth(instrument: InstrumentType, sample_rate: f32) -> SynthUnit {
    use InstrumentType as I;
    match instrument {
        I::Kick => SynthUnit::Membrane(MembraneSynth::new(MembraneParams::KICK, sample_rate)),
        I::Tom => SynthUnit::Membrane(MembraneSynth::new(MembraneParams::TOM, sample_rate)),
        I::Snare => SynthUnit::Noise(NoiseSynth::new(NoiseKind::Snare, sample_rate)),
        I::Rim => SynthUnit::Noise(NoiseSynth::new(NoiseKind::Rim, sample_rate)),
        I::Clap => SynthUnit::Noise(NoiseSynth::new(NoiseKind::Clap, sample_rate)),
        I::HiHat => SynthUnit::Metal(MetalSynth::new(MetalParams::CLOSED_HAT, sample_rate)),
        I::OpenHat => SynthUnit::Metal(MetalSynth::new(MetalParams::OPEN_HAT, sample_rate)),
        I::Cymbal => SynthUnit::Metal(MetalSynth::new(MetalParams::CYMBAL, sample_rate)),
        I::Sine => SynthUnit::Poly(PolySynth::new(Waveform::Sine, sample_rate)),
        I::Square => SynthUnit::Poly(PolySynth::new(Waveform::Square, sample_rate)),
        I::Sawtooth => SynthUnit::Poly(PolySynth::new(Waveform::Sawtooth, sample_rate)),
        I::Triangle => SynthUnit::Poly(PolySynth::new(Waveform::Triangle, sample_rate)),
        I::WhiteNoise => SynthUnit::Ambient(AmbientNoiseSynth::new(NoiseColor::White, sample_rate)),
        I::PinkNoise => SynthUnit::Ambient(AmbientNoiseSynth::new(NoiseColor::Pink, sample_rate)),
        I::BrownNoise => SynthUnit::Ambient(AmbientNoiseSynth::new(NoiseColor::Brown, sample_rate)),
    }
}

/// Notes waiting for their frame offset, shared by all families
#[derive(Debug, Default)]
pub(crate) struct PendingNotes {
    notes: Vec<NoteTrigger>,
}

impl PendingNotes {
    pub(crate) fn push(&mut self, note: NoteTrigger) {
        let pos = self.notes.partition_point(|n| n.offset <= note.offset);
        self.notes.insert(pos, note);
    }

    /// Next note due at or before `frame`
    pub(crate) fn pop_due(&mut self, frame: usize) -> Option<NoteTrigger> {
        let first = self.notes.first()?;
        if first.offset as usize > frame {
            return None;
        }
        Some(self.notes.remove(0))
    }

    /// Shift remaining notes into the next block
    pub(crate) fn advance(&mut self, frames: usize) {
        for note in &mut self.notes {
            note.offset = note.offset.saturating_sub(frames as u32);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.notes.clear();
    }
}

/// Envelope level treated as silent (-60 dB)
pub(crate) const SILENCE: f64 = 0.001;

/// Time constants in a release: after `release` seconds an exponential
/// decay has fallen by 60 dB
pub(crate) const RELEASE_TIME_CONSTANTS: f64 = 6.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Linear ADSR envelope for gated voices
#[derive(Debug, Clone, Copy)]
pub(crate) struct Adsr {
    attack: f64,
    decay: f64,
    sustain: f64,
    release: f64,
    stage: Stage,
    level: f64,
    release_rate: f64,
}

impl Adsr {
    pub(crate) const fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
            stage: Stage::Idle,
            level: 0.0,
            release_rate: 0.0,
        }
    }

    /// Start (or restart from the current level) the attack stage
    pub(crate) fn gate_on(&mut self) {
        self.stage = Stage::Attack;
    }

    pub(crate) fn gate_off(&mut self) {
        if matches!(self.stage, Stage::Idle | Stage::Release) {
            return;
        }
        self.stage = Stage::Release;
        self.release_rate = self.level / self.release.max(1e-4);
    }

    pub(crate) fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    pub(crate) fn release(&self) -> f64 {
        self.release
    }

    pub(crate) fn tick(&mut self, dt: f64) -> f64 {
        match self.stage {
            Stage::Idle | Stage::Sustain => {}
            Stage::Attack => {
                self.level += dt / self.attack.max(1e-4);
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.level -= dt * (1.0 - self.sustain) / self.decay.max(1e-4);
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Release => {
                self.level -= dt * self.release_rate;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }
}

/// Frames covered by `seconds` at `sample_rate`
pub(crate) fn seconds_to_frames(seconds: f64, sample_rate: f32) -> u32 {
    (seconds.max(0.0) * sample_rate as f64) as u32
}

/// Uniform white noise in -1.0..1.0
pub(crate) fn white_noise() -> f64 {
    fastrand::f64() * 2.0 - 1.0
}
