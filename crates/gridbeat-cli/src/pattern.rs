//! Pattern files: a JSON array of tracks

use std::path::Path;

use anyhow::{Context, Result};
use gridbeat_core::{InstrumentType, Track};

pub fn load_pattern(path: &Path) -> Result<Vec<Track>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading pattern {}", path.display()))?;
    parse_pattern(&text).with_context(|| format!("parsing pattern {}", path.display()))
}

pub fn parse_pattern(text: &str) -> Result<Vec<Track>> {
    let tracks: Vec<Track> = serde_json::from_str(text)?;
    Ok(tracks)
}

/// A one-bar groove with a bass line, used when no file is given
pub fn demo_pattern() -> Vec<Track> {
    let kick = Track::new("kick", InstrumentType::Kick).with_active_steps(&[0, 4, 8, 12]);
    let mut snare = Track::new("snare", InstrumentType::Snare).with_active_steps(&[4, 12]);
    snare.reverb = 20;
    let mut hat = Track::new("hat", InstrumentType::HiHat)
        .with_active_steps(&[0, 2, 4, 6, 8, 10, 12, 14])
        .with_volume(0.5);
    hat.pan = 0.3;

    let mut bass = Track::new("bass", InstrumentType::Sawtooth).with_volume(0.6);
    for (index, note) in [(0, "C2"), (3, "C2"), (6, "Eb2"), (10, "G1"), (14, "Bb1")] {
        if let Some(step) = bass.step_mut(index) {
            step.active = true;
            step.note = note.to_string();
        }
    }
    bass.distortion = 15;
    bass.delay = 10;

    vec![kick, snare, hat, bass]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camel_case_tracks() {
        let json = r#"[
            {"id": "k", "instrumentType": "kick", "stepCount": 8,
             "steps": [{"active": true}, {"active": true, "note": "D1", "velocity": 50}]},
            {"id": "p", "instrumentType": "pinknoise", "muted": true}
        ]"#;
        let tracks = parse_pattern(json).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].effective_step_count(), 8);
        assert_eq!(tracks[0].steps[1].note, "D1");
        assert_eq!(tracks[0].steps[1].velocity, 50);
        assert_eq!(tracks[1].instrument_type, InstrumentType::PinkNoise);
        assert!(tracks[1].muted);
        assert_eq!(tracks[1].effective_step_count(), 16);
    }

    #[test]
    fn test_unknown_instrument_is_rejected() {
        assert!(parse_pattern(r#"[{"id": "x", "instrumentType": "theremin"}]"#).is_err());
    }

    #[test]
    fn test_demo_pattern_notes_parse() {
        for track in demo_pattern() {
            for step in track.steps.iter().filter(|s| s.active) {
                assert!(gridbeat_core::note_to_hz(track.pitch_for(step)).is_ok());
            }
        }
    }
}
