//! Per-track channel strip: synth → lowpass → distortion → delay → reverb →
//! volume → pan

use std::f32::consts::FRAC_PI_4;

use gridbeat_core::{InstrumentFamily, InstrumentType, Track, TrackId};
use tracing::debug;

use crate::audio_effects::{
    AudioEffect, DelayEffect, DistortionEffect, LowPassEffect, RAMP_SECONDS, ReverbEffect,
    Smoothed, VolumeEffect,
};
use crate::synths::{MAX_BLOCK_SIZE, NoteTrigger, SynthUnit, build_synth};

const DISTORTION_WET_CAP: f32 = 0.8;
const DELAY_WET_CAP: f32 = 0.6;
const REVERB_WET_CAP: f32 = 0.5;
const DELAY_FEEDBACK: f32 = 0.35;
const REVERB_DAMPING: f32 = 0.5;

/// Drive for a distortion percentage: 1 at 0 %, 25 at 100 %
pub fn distortion_drive(percent: u8) -> f32 {
    1.0 + percent.min(100) as f32 * 24.0 / 100.0
}

/// Wet share for an effect percentage, capped
pub fn wet_amount(percent: u8, cap: f32) -> f32 {
    (percent.min(100) as f32 / 100.0).min(cap)
}

/// An eighth note in milliseconds
pub fn eighth_note_ms(bpm: f64) -> f32 {
    (30_000.0 / bpm.max(1.0)) as f32
}

fn reverb_room(percent: u8) -> f32 {
    0.6 + 0.1 * percent.min(100) as f32 / 100.0
}

/// Lowpass cutoff per family, kept under Nyquist
fn family_cutoff(family: InstrumentFamily, sample_rate: f32) -> f32 {
    let cutoff: f32 = match family {
        InstrumentFamily::Membrane => 5_000.0,
        InstrumentFamily::NoiseBurst => 12_000.0,
        InstrumentFamily::Metallic => 18_000.0,
        InstrumentFamily::Polyphonic => 8_000.0,
        InstrumentFamily::AmbientNoise => 6_000.0,
    };
    cutoff.min(sample_rate * 0.45)
}

/// Equal-power gains for a pan position in -1..1
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// An effect that is bypassed at 0 %. Turning it off lets the wet mix ramp
/// out before the bypass takes hold.
#[derive(Debug)]
struct EffectSlot {
    effect: Box<dyn AudioEffect>,
    percent: u8,
    fade_frames: u32,
}

impl EffectSlot {
    fn new(effect: Box<dyn AudioEffect>, percent: u8) -> Self {
        let mut slot = Self { effect, percent, fade_frames: 0 };
        slot.effect.set_bypass(percent == 0);
        slot
    }

    /// Apply a new percentage; `mix` is the wet amount it maps to
    fn set_percent(&mut self, percent: u8, mix: f32, sample_rate: f32) {
        if percent == self.percent {
            return;
        }
        self.percent = percent;
        self.effect.set_param("mix", mix);
        if percent == 0 {
            self.fade_frames = (RAMP_SECONDS * sample_rate).ceil() as u32;
        } else {
            self.fade_frames = 0;
            self.effect.set_bypass(false);
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        if self.effect.is_bypassed() {
            return;
        }
        self.effect.process(samples);
        if self.percent == 0 {
            self.fade_frames = self.fade_frames.saturating_sub(samples.len() as u32);
            if self.fade_frames == 0 {
                self.effect.set_bypass(true);
                self.effect.reset();
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.effect.is_bypassed()
    }
}

/// Synth plus its effect chain, rendering onto the stereo master bus
#[derive(Debug)]
pub struct ChannelStrip {
    track_id: TrackId,
    instrument: InstrumentType,
    synth: SynthUnit,
    lowpass: LowPassEffect,
    distortion: EffectSlot,
    delay: EffectSlot,
    reverb: EffectSlot,
    volume: VolumeEffect,
    pan: Smoothed,
    sample_rate: f32,
    buffer: Vec<f32>,
}

impl ChannelStrip {
    /// Build a strip for `track` at the given realized gain and tempo
    pub fn new(track: &Track, gain: f32, bpm: f64, sample_rate: f32) -> Self {
        let instrument = track.instrument_type;
        let distortion = EffectSlot::new(
            Box::new(DistortionEffect::new(
                distortion_drive(track.distortion),
                wet_amount(track.distortion, DISTORTION_WET_CAP),
                sample_rate,
            )),
            track.distortion,
        );
        let delay = EffectSlot::new(
            Box::new(DelayEffect::new(
                eighth_note_ms(bpm),
                DELAY_FEEDBACK,
                wet_amount(track.delay, DELAY_WET_CAP),
                sample_rate,
            )),
            track.delay,
        );
        let reverb = EffectSlot::new(
            Box::new(ReverbEffect::new(
                reverb_room(track.reverb),
                REVERB_DAMPING,
                wet_amount(track.reverb, REVERB_WET_CAP),
                sample_rate,
            )),
            track.reverb,
        );

        Self {
            track_id: track.id.clone(),
            instrument,
            synth: build_synth(instrument, sample_rate),
            lowpass: LowPassEffect::new(family_cutoff(instrument.family(), sample_rate), sample_rate),
            distortion,
            delay,
            reverb,
            volume: VolumeEffect::new(VolumeEffect::amplitude_to_db(gain), sample_rate),
            pan: Smoothed::new(track.pan.clamp(-1.0, 1.0), sample_rate),
            sample_rate,
            buffer: vec![0.0; MAX_BLOCK_SIZE],
        }
    }

    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    pub fn instrument(&self) -> InstrumentType {
        self.instrument
    }

    pub fn synth(&self) -> &SynthUnit {
        &self.synth
    }

    /// Apply non-structural track edits in place. An instrument change swaps
    /// only the synth; effect state carries over.
    pub fn apply_track(&mut self, track: &Track) {
        if track.instrument_type != self.instrument {
            debug!(
                track = %self.track_id,
                from = %self.instrument,
                to = %track.instrument_type,
                "Swapping synth"
            );
            self.synth.release_all();
            self.instrument = track.instrument_type;
            self.synth = build_synth(self.instrument, self.sample_rate);
            self.lowpass.set_param(
                "cutoff",
                family_cutoff(self.instrument.family(), self.sample_rate),
            );
        }

        self.pan.set_target(track.pan.clamp(-1.0, 1.0));

        if track.distortion != self.distortion.percent {
            self.distortion.effect.set_param("drive", distortion_drive(track.distortion));
        }
        self.distortion.set_percent(
            track.distortion,
            wet_amount(track.distortion, DISTORTION_WET_CAP),
            self.sample_rate,
        );
        self.delay.set_percent(
            track.delay,
            wet_amount(track.delay, DELAY_WET_CAP),
            self.sample_rate,
        );
        if track.reverb != self.reverb.percent && track.reverb > 0 {
            self.reverb.effect.set_param("room_size", reverb_room(track.reverb));
        }
        self.reverb.set_percent(
            track.reverb,
            wet_amount(track.reverb, REVERB_WET_CAP),
            self.sample_rate,
        );
    }

    /// Set the realized linear gain; ramps in the volume stage
    pub fn set_gain(&mut self, gain: f32) {
        self.volume.set_param("gain", VolumeEffect::amplitude_to_db(gain));
    }

    pub fn gain_db(&self) -> f32 {
        self.volume.gain_db()
    }

    /// Keep the delay on an eighth note at the new tempo
    pub fn set_bpm(&mut self, bpm: f64) {
        self.delay.effect.set_param("time", eighth_note_ms(bpm));
    }

    pub fn trigger(&mut self, note: NoteTrigger) {
        self.synth.trigger(note);
    }

    pub fn release_time(&self) -> f64 {
        self.synth.release_time()
    }

    pub fn active_voices(&self) -> usize {
        self.synth.active_voices()
    }

    /// Cut every voice and ringing effect tail
    pub fn silence(&mut self) {
        self.synth.release_all();
        self.lowpass.reset();
        self.distortion.effect.reset();
        self.delay.effect.reset();
        self.reverb.effect.reset();
    }

    /// Names of the effects currently in the signal path
    pub fn active_effects(&self) -> Vec<&str> {
        [&self.distortion, &self.delay, &self.reverb]
            .into_iter()
            .filter(|slot| slot.is_active())
            .map(|slot| slot.effect.name())
            .collect()
    }

    /// Render one block and add it onto the stereo bus
    pub fn render_into(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len()).min(MAX_BLOCK_SIZE);
        let buffer = &mut self.buffer[..frames];

        self.synth.render(buffer);
        self.lowpass.process(buffer);
        self.distortion.process(buffer);
        self.delay.process(buffer);
        self.reverb.process(buffer);
        self.volume.process(buffer);

        for ((sample, l), r) in buffer.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
            let (gain_l, gain_r) = pan_gains(self.pan.next_value());
            *l += sample * gain_l;
            *r += sample * gain_r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48_000.0;

    fn render(strip: &mut ChannelStrip, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        for (l, r) in left.chunks_mut(512).zip(right.chunks_mut(512)) {
            strip.render_into(l, r);
        }
        (left, right)
    }

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    fn hit() -> NoteTrigger {
        NoteTrigger { frequency: 220.0, duration: 0.1, offset: 0, velocity: 1.0 }
    }

    #[test]
    fn test_effect_mapping() {
        assert_eq!(distortion_drive(0), 1.0);
        assert_eq!(distortion_drive(100), 25.0);
        assert_eq!(wet_amount(100, DISTORTION_WET_CAP), 0.8);
        assert_eq!(wet_amount(40, DELAY_WET_CAP), 0.4);
        assert_eq!(wet_amount(90, REVERB_WET_CAP), 0.5);
        assert_eq!(eighth_note_ms(120.0), 250.0);
    }

    #[test]
    fn test_zero_percent_effects_are_bypassed() {
        let track = Track::new("a", InstrumentType::Snare);
        let strip = ChannelStrip::new(&track, 0.5, 120.0, SAMPLE_RATE);
        assert!(strip.active_effects().is_empty());

        let mut wet = Track::new("b", InstrumentType::Snare);
        wet.delay = 30;
        wet.reverb = 20;
        let strip = ChannelStrip::new(&wet, 0.5, 120.0, SAMPLE_RATE);
        assert_eq!(strip.active_effects(), vec!["Delay", "Reverb"]);
    }

    #[test]
    fn test_turning_effect_off_bypasses_after_ramp() {
        let mut track = Track::new("a", InstrumentType::Sine);
        track.delay = 50;
        let mut strip = ChannelStrip::new(&track, 0.5, 120.0, SAMPLE_RATE);
        track.delay = 0;
        strip.apply_track(&track);
        // Still in the path while the wet mix ramps out
        assert_eq!(strip.active_effects(), vec!["Delay"]);
        render(&mut strip, 2_048);
        assert!(strip.active_effects().is_empty());
    }

    #[test]
    fn test_instrument_swap_keeps_effects() {
        let mut track = Track::new("a", InstrumentType::Kick);
        track.reverb = 40;
        let mut strip = ChannelStrip::new(&track, 0.5, 120.0, SAMPLE_RATE);
        track.instrument_type = InstrumentType::Sawtooth;
        strip.apply_track(&track);
        assert_eq!(strip.instrument(), InstrumentType::Sawtooth);
        assert_eq!(strip.synth().family(), InstrumentFamily::Polyphonic);
        assert_eq!(strip.active_effects(), vec!["Reverb"]);
    }

    #[test]
    fn test_hard_pan_left() {
        let mut track = Track::new("a", InstrumentType::Sine);
        track.pan = -1.0;
        let mut strip = ChannelStrip::new(&track, 0.8, 120.0, SAMPLE_RATE);
        strip.trigger(hit());
        let (left, right) = render(&mut strip, 4_800);
        assert!(energy(&left) > 0.0);
        assert!(energy(&right) < energy(&left) * 1e-6);
    }

    #[test]
    fn test_silence_cuts_tails() {
        let mut track = Track::new("a", InstrumentType::Snare);
        track.reverb = 100;
        track.delay = 100;
        let mut strip = ChannelStrip::new(&track, 0.8, 120.0, SAMPLE_RATE);
        strip.trigger(hit());
        render(&mut strip, 4_800);
        strip.silence();
        assert_eq!(strip.active_voices(), 0);
        let (left, right) = render(&mut strip, 1_024);
        assert_eq!(energy(&left) + energy(&right), 0.0);
    }

    #[test]
    fn test_delay_follows_tempo() {
        let mut track = Track::new("a", InstrumentType::Snare);
        track.delay = 30;
        let mut strip = ChannelStrip::new(&track, 0.5, 120.0, SAMPLE_RATE);
        assert_eq!(strip.delay.effect.param("time"), Some(250.0));
        strip.set_bpm(60.0);
        assert_eq!(strip.delay.effect.param("time"), Some(500.0));
    }

    #[test]
    fn test_gain_maps_to_db() {
        let track = Track::new("a", InstrumentType::Sine);
        let mut strip = ChannelStrip::new(&track, 1.0, 120.0, SAMPLE_RATE);
        assert!(strip.gain_db().abs() < 1e-4);
        strip.set_gain(0.5);
        assert!((strip.gain_db() + 6.0206).abs() < 1e-3);
    }
}
