//! Mix normalization across tracks

use std::collections::HashMap;

use gridbeat_core::TrackId;

/// Fixed headroom applied on top of the normalizer
pub const HEADROOM: f32 = 0.95;

/// Keeps the summed base gains of all tracks from exceeding unity
#[derive(Debug, Clone)]
pub struct GainLimiter {
    base: HashMap<TrackId, f32>,
    normalizer: f32,
}

impl Default for GainLimiter {
    fn default() -> Self {
        Self {
            base: HashMap::new(),
            normalizer: 1.0,
        }
    }
}

impl GainLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a track's base gain (clamped to 0..1)
    pub fn register_track(&mut self, track: &TrackId, base_gain: f32) {
        let gain = if base_gain.is_finite() { base_gain.clamp(0.0, 1.0) } else { 0.0 };
        self.base.insert(track.clone(), gain);
        self.recompute();
    }

    pub fn unregister_track(&mut self, track: &TrackId) {
        if self.base.remove(track).is_some() {
            self.recompute();
        }
    }

    pub fn clear(&mut self) {
        self.base.clear();
        self.recompute();
    }

    pub fn normalizer(&self) -> f32 {
        self.normalizer
    }

    /// `base × normalizer × headroom`; zero for unknown tracks
    pub fn scaled_gain(&self, track: &TrackId) -> f32 {
        self.base
            .get(track)
            .map(|base| base * self.normalizer * HEADROOM)
            .unwrap_or(0.0)
    }

    pub fn track_count(&self) -> usize {
        self.base.len()
    }

    fn recompute(&mut self) {
        let sum: f32 = self.base.values().sum();
        self.normalizer = if sum > 0.0 { (1.0 / sum).min(1.0) } else { 1.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_tracks_at_point_eight() {
        let mut gain = GainLimiter::new();
        let a = TrackId::new("a");
        let b = TrackId::new("b");
        gain.register_track(&a, 0.8);
        gain.register_track(&b, 0.8);
        assert!((gain.normalizer() - 0.625).abs() < 1e-6);
        assert!((gain.scaled_gain(&a) - 0.475).abs() < 1e-6);
    }

    #[test]
    fn test_single_quiet_track_is_not_boosted() {
        let mut gain = GainLimiter::new();
        let a = TrackId::new("a");
        gain.register_track(&a, 0.5);
        assert_eq!(gain.normalizer(), 1.0);
        assert!((gain.scaled_gain(&a) - 0.475).abs() < 1e-6);
    }

    #[test]
    fn test_normalizer_returns_after_removal() {
        let mut gain = GainLimiter::new();
        let ids: Vec<TrackId> = (0..4).map(|i| TrackId::new(format!("t{i}"))).collect();
        for id in &ids {
            gain.register_track(id, 0.8);
        }
        let crowded = gain.normalizer();
        for id in &ids[1..] {
            gain.unregister_track(id);
        }
        assert!(crowded < gain.normalizer());
        assert_eq!(gain.normalizer(), 1.0);

        // Re-registering the same set gives the same normalizer
        for id in &ids[1..] {
            gain.register_track(id, 0.8);
        }
        assert!((gain.normalizer() - crowded).abs() < 1e-6);
    }

    #[test]
    fn test_realized_sum_stays_below_headroom() {
        let mut gain = GainLimiter::new();
        let ids: Vec<TrackId> = (0..7).map(|i| TrackId::new(format!("t{i}"))).collect();
        for id in &ids {
            gain.register_track(id, 1.0);
        }
        let sum: f32 = ids.iter().map(|id| gain.scaled_gain(id)).sum();
        assert!(sum <= HEADROOM + 1e-5);
    }
}
