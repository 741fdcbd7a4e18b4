//! Channel-strip effects and the shared effect interface

mod native;

pub use native::{
    DelayEffect, DistortionEffect, LowPassEffect, MasterLimiter, RAMP_SECONDS, ReverbEffect,
    Smoothed, VolumeEffect,
};

use std::fmt::Debug;

/// Mono effect processed in place, one block at a time. Parameters are
/// addressed by name; unknown names are ignored.
pub trait AudioEffect: Send + Debug {
    fn name(&self) -> &str;
    fn process(&mut self, samples: &mut [f32]);
    /// Set a parameter; changes that would click are ramped
    fn set_param(&mut self, name: &str, value: f32);
    /// Current target of a parameter
    fn param(&self, name: &str) -> Option<f32>;
    fn set_bypass(&mut self, bypass: bool);
    fn is_bypassed(&self) -> bool;
    /// Drop any ringing state (delay lines, filter memory)
    fn reset(&mut self) {}
}
