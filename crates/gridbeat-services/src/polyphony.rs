//! Voice bookkeeping with global and per-track ceilings

use std::collections::HashMap;

use gridbeat_core::TrackId;

pub const MAX_TOTAL_VOICES: usize = 24;
pub const MAX_VOICES_PER_TRACK: usize = 4;

/// Counts sounding voices per track. A trigger that would exceed either
/// ceiling is declined; nothing is queued.
#[derive(Debug, Clone)]
pub struct PolyphonyManager {
    max_total: usize,
    max_per_track: usize,
    active: HashMap<TrackId, usize>,
    total: usize,
}

impl Default for PolyphonyManager {
    fn default() -> Self {
        Self::new(MAX_TOTAL_VOICES, MAX_VOICES_PER_TRACK)
    }
}

impl PolyphonyManager {
    pub fn new(max_total: usize, max_per_track: usize) -> Self {
        Self {
            max_total,
            max_per_track,
            active: HashMap::new(),
            total: 0,
        }
    }

    /// Claim a voice for `track`. Returns false when a ceiling would be exceeded.
    pub fn increment_voice(&mut self, track: &TrackId) -> bool {
        if self.total >= self.max_total {
            return false;
        }
        let count = self.active.entry(track.clone()).or_insert(0);
        if *count >= self.max_per_track {
            return false;
        }
        *count += 1;
        self.total += 1;
        true
    }

    /// Give back a voice; never goes below zero
    pub fn decrement_voice(&mut self, track: &TrackId) {
        let Some(count) = self.active.get_mut(track) else {
            return;
        };
        if *count == 0 {
            return;
        }
        *count -= 1;
        self.total = self.total.saturating_sub(1);
        if *count == 0 {
            self.active.remove(track);
        }
    }

    /// Drop every voice counted against `track`
    pub fn clear_track(&mut self, track: &TrackId) {
        if let Some(count) = self.active.remove(track) {
            self.total = self.total.saturating_sub(count);
        }
    }

    pub fn reset(&mut self) {
        self.active.clear();
        self.total = 0;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn track_voices(&self, track: &TrackId) -> usize {
        self.active.get(track).copied().unwrap_or(0)
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn max_per_track(&self) -> usize {
        self.max_per_track
    }

    pub fn at_capacity(&self) -> bool {
        self.total >= self.max_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_track_ceiling() {
        let mut poly = PolyphonyManager::default();
        let id = TrackId::new("kick");
        for _ in 0..MAX_VOICES_PER_TRACK {
            assert!(poly.increment_voice(&id));
        }
        assert!(!poly.increment_voice(&id));
        assert_eq!(poly.track_voices(&id), MAX_VOICES_PER_TRACK);
        poly.decrement_voice(&id);
        assert!(poly.increment_voice(&id));
    }

    #[test]
    fn test_global_ceiling() {
        let mut poly = PolyphonyManager::new(6, 4);
        let ids: Vec<TrackId> = (0..3).map(|i| TrackId::new(format!("t{i}"))).collect();
        let accepted = (0..12)
            .filter(|i| poly.increment_voice(&ids[i % 3]))
            .count();
        assert_eq!(accepted, 6);
        assert_eq!(poly.total(), 6);
        assert!(poly.at_capacity());
    }

    #[test]
    fn test_decrement_is_floor_clamped() {
        let mut poly = PolyphonyManager::default();
        let id = TrackId::new("a");
        poly.decrement_voice(&id);
        assert!(poly.increment_voice(&id));
        poly.decrement_voice(&id);
        poly.decrement_voice(&id);
        assert_eq!(poly.total(), 0);
        assert_eq!(poly.track_voices(&id), 0);
    }

    #[test]
    fn test_clear_track_keeps_other_tracks() {
        let mut poly = PolyphonyManager::default();
        let (a, b) = (TrackId::new("a"), TrackId::new("b"));
        poly.increment_voice(&a);
        poly.increment_voice(&a);
        poly.increment_voice(&b);
        poly.clear_track(&a);
        assert_eq!(poly.track_voices(&a), 0);
        assert_eq!(poly.track_voices(&b), 1);
        assert_eq!(poly.total(), 1);
    }

    #[test]
    fn test_reset() {
        let mut poly = PolyphonyManager::default();
        let id = TrackId::new("a");
        poly.increment_voice(&id);
        poly.reset();
        assert_eq!(poly.total(), 0);
        assert!(poly.increment_voice(&id));
    }
}
