//! Native audio effects using fundsp

use std::fmt;

use fundsp::hacker::*;

use super::AudioEffect;

/// Parameter ramp length; long enough to avoid zipper noise and clicks
pub const RAMP_SECONDS: f32 = 0.02;

/// Floor below which the volume stage outputs silence
const SILENCE_DB: f32 = -80.0;

const MAX_DELAY_MS: f32 = 2000.0;
const MAX_FEEDBACK: f32 = 0.95;

/// Comb and allpass lengths in samples at 44.1 kHz
const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNING: [usize; 2] = [556, 441];
const TUNING_RATE: f32 = 44_100.0;
const ALLPASS_FEEDBACK: f32 = 0.5;
/// Comb input scaling so the summed tail sits near unity
const REVERB_INPUT_GAIN: f32 = 0.25;

/// Linearly ramped parameter value
#[derive(Debug, Clone, Copy)]
pub struct Smoothed {
    current: f32,
    target: f32,
    increment: f32,
    remaining: u32,
    ramp_frames: u32,
}

impl Smoothed {
    pub fn new(value: f32, sample_rate: f32) -> Self {
        Self {
            current: value,
            target: value,
            increment: 0.0,
            remaining: 0,
            ramp_frames: (RAMP_SECONDS * sample_rate).max(1.0) as u32,
        }
    }

    /// Ramp towards `target` over the ramp length
    pub fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() <= f32::EPSILON {
            return;
        }
        self.target = target;
        self.remaining = self.ramp_frames;
        self.increment = (target - self.current) / self.ramp_frames as f32;
    }

    /// Jump straight to `value`
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.remaining = 0;
    }

    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.increment
            };
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

/// Track volume stage in dB, ramped in the linear domain
#[derive(Debug)]
pub struct VolumeEffect {
    gain_db: f32,
    gain: Smoothed,
    bypassed: bool,
}

impl VolumeEffect {
    pub fn new(gain_db: f32, sample_rate: f32) -> Self {
        Self {
            gain_db,
            gain: Smoothed::new(Self::linear(gain_db), sample_rate),
            bypassed: false,
        }
    }

    fn linear(gain_db: f32) -> f32 {
        if gain_db <= SILENCE_DB {
            0.0
        } else {
            db_amp(gain_db) as f32
        }
    }

    /// Decibel value for a linear amplitude, floored at the silence threshold
    pub fn amplitude_to_db(amplitude: f32) -> f32 {
        if amplitude <= 0.0 {
            return SILENCE_DB;
        }
        (amp_db(amplitude) as f32).max(SILENCE_DB)
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }
}

impl AudioEffect for VolumeEffect {
    fn name(&self) -> &str { "Volume" }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample *= self.gain.next_value();
        }
    }

    fn set_param(&mut self, name: &str, value: f32) {
        if name != "gain" {
            return;
        }
        self.gain_db = value.max(SILENCE_DB);
        self.gain.set_target(Self::linear(self.gain_db));
    }

    fn param(&self, name: &str) -> Option<f32> {
        (name == "gain").then_some(self.gain_db)
    }

    fn set_bypass(&mut self, bypass: bool) { self.bypassed = bypass; }
    fn is_bypassed(&self) -> bool { self.bypassed }
}

/// Family tone filter at the head of each strip
pub struct LowPassEffect {
    cutoff_hz: f32,
    filter: An<FixedSvf<f64, LowpassMode<f64>>>,
    bypassed: bool,
}

impl LowPassEffect {
    pub fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let mut filter = lowpass_hz(cutoff_hz, 0.707);
        filter.set_sample_rate(sample_rate as f64);
        Self { cutoff_hz, filter, bypassed: false }
    }
}

impl fmt::Debug for LowPassEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LowPassEffect")
            .field("cutoff_hz", &self.cutoff_hz)
            .field("bypassed", &self.bypassed)
            .finish()
    }
}

impl AudioEffect for LowPassEffect {
    fn name(&self) -> &str { "Low Pass" }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let output = self.filter.tick(&Frame::from([*sample]));
            *sample = output[0];
        }
    }

    fn set_param(&mut self, name: &str, value: f32) {
        if name != "cutoff" {
            return;
        }
        self.cutoff_hz = value;
        self.filter.set(Setting::center(value));
    }

    fn param(&self, name: &str) -> Option<f32> {
        (name == "cutoff").then_some(self.cutoff_hz)
    }

    fn set_bypass(&mut self, bypass: bool) { self.bypassed = bypass; }
    fn is_bypassed(&self) -> bool { self.bypassed }

    fn reset(&mut self) {
        self.filter.reset();
    }
}

/// tanh waveshaper with a dry/wet mix
#[derive(Debug)]
pub struct DistortionEffect {
    drive: f32,
    mix: Smoothed,
    bypassed: bool,
}

impl DistortionEffect {
    pub fn new(drive: f32, mix: f32, sample_rate: f32) -> Self {
        Self {
            drive: drive.clamp(1.0, 50.0),
            mix: Smoothed::new(mix.clamp(0.0, 1.0), sample_rate),
            bypassed: false,
        }
    }

    fn shape(&self, x: f32) -> f32 {
        // Normalized so a full-scale input stays at full scale
        (x * self.drive).tanh() / self.drive.tanh()
    }
}

impl AudioEffect for DistortionEffect {
    fn name(&self) -> &str { "Distortion" }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let mix = self.mix.next_value();
            let wet = self.shape(*sample);
            *sample = *sample * (1.0 - mix) + wet * mix;
        }
    }

    fn set_param(&mut self, name: &str, value: f32) {
        match name {
            "drive" => self.drive = value.clamp(1.0, 50.0),
            "mix" => self.mix.set_target(value.clamp(0.0, 1.0)),
            _ => {}
        }
    }

    fn param(&self, name: &str) -> Option<f32> {
        match name {
            "drive" => Some(self.drive),
            "mix" => Some(self.mix.target()),
            _ => None,
        }
    }

    fn set_bypass(&mut self, bypass: bool) { self.bypassed = bypass; }
    fn is_bypassed(&self) -> bool { self.bypassed }
}

/// Feedback delay. The delay time is ramped and read with linear
/// interpolation, so tempo changes glide instead of clicking.
pub struct DelayEffect {
    time_ms: Smoothed,
    feedback: f32,
    mix: Smoothed,
    line: Vec<f32>,
    write_pos: usize,
    sample_rate: f32,
    bypassed: bool,
}

impl DelayEffect {
    pub fn new(time_ms: f32, feedback: f32, mix: f32, sample_rate: f32) -> Self {
        let len = (MAX_DELAY_MS * sample_rate / 1000.0) as usize + 2;
        Self {
            time_ms: Smoothed::new(time_ms.clamp(1.0, MAX_DELAY_MS), sample_rate),
            feedback: feedback.clamp(0.0, MAX_FEEDBACK),
            mix: Smoothed::new(mix.clamp(0.0, 1.0), sample_rate),
            line: vec![0.0; len],
            write_pos: 0,
            sample_rate,
            bypassed: false,
        }
    }

    /// Sample `delay` frames behind the write head
    fn read(&self, delay: f32) -> f32 {
        let len = self.line.len();
        let delay = delay.clamp(1.0, (len - 2) as f32);
        let whole = delay.floor();
        let frac = delay - whole;
        let newer = (self.write_pos + len - whole as usize) % len;
        let older = (newer + len - 1) % len;
        self.line[newer] * (1.0 - frac) + self.line[older] * frac
    }
}

impl fmt::Debug for DelayEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayEffect")
            .field("time_ms", &self.time_ms.target())
            .field("feedback", &self.feedback)
            .field("mix", &self.mix.target())
            .field("bypassed", &self.bypassed)
            .finish()
    }
}

impl AudioEffect for DelayEffect {
    fn name(&self) -> &str { "Delay" }

    fn process(&mut self, samples: &mut [f32]) {
        let frames_per_ms = self.sample_rate / 1000.0;
        for sample in samples.iter_mut() {
            let delay = self.time_ms.next_value() * frames_per_ms;
            let delayed = self.read(delay);
            let mix = self.mix.next_value();
            self.line[self.write_pos] = *sample + delayed * self.feedback;
            self.write_pos = (self.write_pos + 1) % self.line.len();
            *sample = *sample * (1.0 - mix) + delayed * mix;
        }
    }

    fn set_param(&mut self, name: &str, value: f32) {
        match name {
            "time" => self.time_ms.set_target(value.clamp(1.0, MAX_DELAY_MS)),
            // Feedback stays below unity so the loop always decays
            "feedback" => self.feedback = value.clamp(0.0, MAX_FEEDBACK),
            "mix" => self.mix.set_target(value.clamp(0.0, 1.0)),
            _ => {}
        }
    }

    fn param(&self, name: &str) -> Option<f32> {
        match name {
            "time" => Some(self.time_ms.target()),
            "feedback" => Some(self.feedback),
            "mix" => Some(self.mix.target()),
            _ => None,
        }
    }

    fn set_bypass(&mut self, bypass: bool) { self.bypassed = bypass; }
    fn is_bypassed(&self) -> bool { self.bypassed }

    fn reset(&mut self) {
        self.line.fill(0.0);
        self.write_pos = 0;
    }
}

/// Feedback comb with a one-pole lowpass in the loop
#[derive(Debug)]
struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; Ord::max(len, 1)], pos: 0, store: 0.0 }
    }

    fn tick(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let out = self.buffer[self.pos];
        self.store = out * (1.0 - damping) + self.store * damping;
        self.buffer[self.pos] = input + self.store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.store = 0.0;
    }
}

#[derive(Debug)]
struct Allpass {
    buffer: Vec<f32>,
    pos: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; Ord::max(len, 1)], pos: 0 }
    }

    fn tick(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        self.buffer[self.pos] = input + buffered * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        buffered - input
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Schroeder reverb: parallel damped combs into series allpasses
#[derive(Debug)]
pub struct ReverbEffect {
    room_size: f32,
    damping: f32,
    mix: Smoothed,
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
    bypassed: bool,
}

impl ReverbEffect {
    pub fn new(room_size: f32, damping: f32, mix: f32, sample_rate: f32) -> Self {
        let scale = sample_rate / TUNING_RATE;
        let scaled = |len: usize| (len as f32 * scale) as usize;
        Self {
            room_size: room_size.clamp(0.0, 1.0),
            damping: damping.clamp(0.0, 1.0),
            mix: Smoothed::new(mix.clamp(0.0, 1.0), sample_rate),
            combs: COMB_TUNING.iter().map(|&len| Comb::new(scaled(len))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&len| Allpass::new(scaled(len))).collect(),
            bypassed: false,
        }
    }

    /// Comb feedback for the room size, 0.7 to 0.98
    fn feedback(&self) -> f32 {
        0.7 + self.room_size * 0.28
    }
}

impl AudioEffect for ReverbEffect {
    fn name(&self) -> &str { "Reverb" }

    fn process(&mut self, samples: &mut [f32]) {
        let feedback = self.feedback();
        let damping = self.damping * 0.4;

        for sample in samples.iter_mut() {
            let dry = *sample;
            let input = dry * REVERB_INPUT_GAIN;
            let mut wet: f32 = self
                .combs
                .iter_mut()
                .map(|comb| comb.tick(input, feedback, damping))
                .sum();
            for allpass in &mut self.allpasses {
                wet = allpass.tick(wet);
            }
            let mix = self.mix.next_value();
            *sample = dry * (1.0 - mix) + wet * mix;
        }
    }

    fn set_param(&mut self, name: &str, value: f32) {
        match name {
            "room_size" => self.room_size = value.clamp(0.0, 1.0),
            "damping" => self.damping = value.clamp(0.0, 1.0),
            "mix" => self.mix.set_target(value.clamp(0.0, 1.0)),
            _ => {}
        }
    }

    fn param(&self, name: &str) -> Option<f32> {
        match name {
            "room_size" => Some(self.room_size),
            "damping" => Some(self.damping),
            "mix" => Some(self.mix.target()),
            _ => None,
        }
    }

    fn set_bypass(&mut self, bypass: bool) { self.bypassed = bypass; }
    fn is_bypassed(&self) -> bool { self.bypassed }

    fn reset(&mut self) {
        self.combs.iter_mut().for_each(Comb::clear);
        self.allpasses.iter_mut().for_each(Allpass::clear);
    }
}

/// Stereo lookahead limiter on the master bus
pub struct MasterLimiter {
    attack_ms: f32,
    release_ms: f32,
    limiter: An<Limiter<U2>>,
}

impl MasterLimiter {
    pub fn new(attack_ms: f32, release_ms: f32, sample_rate: f32) -> Self {
        let mut limiter = limiter_stereo(attack_ms / 1000.0, release_ms / 1000.0);
        limiter.set_sample_rate(sample_rate as f64);
        Self { attack_ms, release_ms, limiter }
    }

    /// Limit left/right buffers in place
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let output = self.limiter.tick(&Frame::from([*l, *r]));
            *l = output[0];
            *r = output[1];
        }
    }

    pub fn reset(&mut self) {
        self.limiter.reset();
    }
}

impl fmt::Debug for MasterLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterLimiter")
            .field("attack_ms", &self.attack_ms)
            .field("release_ms", &self.release_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    #[test]
    fn test_smoothed_ramps_without_jump() {
        let mut value = Smoothed::new(0.0, 1000.0); // 20-frame ramp
        value.set_target(1.0);
        let first = value.next_value();
        assert!(first > 0.0 && first < 0.1);
        for _ in 0..19 {
            value.next_value();
        }
        assert_eq!(value.value(), 1.0);
        assert!(!value.is_ramping());
    }

    #[test]
    fn test_volume_ramps_to_target() {
        let mut volume = VolumeEffect::new(0.0, 1000.0);
        volume.set_param("gain", -6.0);
        let mut block = vec![1.0f32; 40];
        volume.process(&mut block);
        assert!(block[0] > 0.9, "first sample should still be near unity");
        assert!((block[39] - db_amp(-6.0) as f32).abs() < 1e-3);
        assert_eq!(volume.param("gain"), Some(-6.0));
    }

    #[test]
    fn test_volume_floor_is_silence() {
        let mut volume = VolumeEffect::new(SILENCE_DB, 1000.0);
        let mut block = vec![1.0f32; 4];
        volume.process(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
        assert_eq!(VolumeEffect::amplitude_to_db(0.0), SILENCE_DB);
    }

    #[test]
    fn test_delay_echoes_after_delay_time() {
        let mut delay = DelayEffect::new(10.0, 0.0, 1.0, 1000.0); // 10-sample delay
        let mut block = vec![0.0f32; 20];
        block[0] = 1.0;
        delay.process(&mut block);
        assert_eq!(block[0], 0.0);
        assert_eq!(block[10], 1.0);
        assert_eq!(block[11], 0.0);
    }

    #[test]
    fn test_delay_time_glides() {
        let mut delay = DelayEffect::new(250.0, 0.3, 0.5, 48_000.0);
        delay.set_param("time", 500.0);
        assert_eq!(delay.param("time"), Some(500.0));
        assert!(delay.time_ms.is_ramping());
        delay.process(&mut vec![0.0f32; 2_048]);
        assert!(!delay.time_ms.is_ramping());
        assert_eq!(delay.param("nope"), None);
    }

    #[test]
    fn test_reverb_rings_then_resets() {
        let mut reverb = ReverbEffect::new(0.6, 0.5, 0.5, 48_000.0);
        let mut block = vec![0.0f32; 9_600];
        block[0] = 1.0;
        reverb.process(&mut block);
        assert!(energy(&block[4_800..]) > 0.0, "tail should outlast the combs");

        reverb.reset();
        let mut silence = vec![0.0f32; 1_024];
        reverb.process(&mut silence);
        assert!(silence.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_distortion_dry_when_mix_zero() {
        let mut dist = DistortionEffect::new(10.0, 0.0, 1000.0);
        let mut block = vec![0.25f32; 8];
        dist.process(&mut block);
        assert!(block.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }
}
