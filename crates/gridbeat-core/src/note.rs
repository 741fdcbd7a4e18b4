//! Pitch-string parsing ("C4", "F#2", "Bb3") and frequency conversion

use crate::error::{CoreError, Result};

/// MIDI note number of A4
const A4_MIDI: i32 = 69;
/// Concert pitch in Hz
const A4_HZ: f32 = 440.0;

/// Convert a MIDI note number to frequency in Hz
pub fn midi_to_hz(midi: u8) -> f32 {
    A4_HZ * 2f32.powf((midi as i32 - A4_MIDI) as f32 / 12.0)
}

/// Parse scientific pitch notation into a MIDI note number.
///
/// Accepts a letter `A`-`G` (either case), any number of `#` or `b`
/// accidentals and an octave that may be negative. `C4` is MIDI 60.
pub fn note_to_midi(note: &str) -> Result<u8> {
    let invalid = || CoreError::InvalidPitch(note.to_string());
    let trimmed = note.trim();
    let mut chars = trimmed.chars();

    let letter = chars.next().ok_or_else(invalid)?;
    let pitch_class: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(invalid()),
    };

    let rest = chars.as_str();
    let octave_start = rest
        .find(|c: char| c == '-' || c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (accidentals, octave) = rest.split_at(octave_start);

    let mut shift = 0i32;
    for c in accidentals.chars() {
        match c {
            '#' => shift += 1,
            'b' => shift -= 1,
            _ => return Err(invalid()),
        }
    }

    let octave: i32 = octave.parse().map_err(|_| invalid())?;
    let midi = (octave + 1) * 12 + pitch_class + shift;
    u8::try_from(midi)
        .ok()
        .filter(|m| *m <= 127)
        .ok_or_else(invalid)
}

/// Resolve a pitch string to a frequency.
///
/// Plain positive numbers are taken as Hz, anything else must be a note name.
pub fn note_to_hz(note: &str) -> Result<f32> {
    if let Ok(hz) = note.trim().parse::<f32>() {
        if hz.is_finite() && hz > 0.0 {
            return Ok(hz);
        }
        return Err(CoreError::InvalidPitch(note.to_string()));
    }
    note_to_midi(note).map(midi_to_hz)
}
