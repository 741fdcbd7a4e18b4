//! Instrument catalog: which synthesis family plays each instrument type

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Synthesis family, each with its own trigger semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentFamily {
    /// Pitched sine with a downward pitch sweep (kick, toms)
    Membrane,
    /// Short filtered noise burst, optionally with a tonal body
    NoiseBurst,
    /// Inharmonic square partials through a highpass
    Metallic,
    /// Small bank of oscillators with an ADSR envelope
    Polyphonic,
    /// Long colored noise with slow attack and release
    AmbientNoise,
}

/// Catalog entry for an instrument type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentSpec {
    pub default_note: &'static str,
    pub family: InstrumentFamily,
}

/// Instrument types a track can be assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Kick,
    Tom,
    Snare,
    Rim,
    Clap,
    HiHat,
    OpenHat,
    Cymbal,
    Sine,
    Square,
    Sawtooth,
    Triangle,
    WhiteNoise,
    PinkNoise,
    BrownNoise,
}

impl InstrumentType {
    pub const ALL: [Self; 15] = [
        Self::Kick,
        Self::Tom,
        Self::Snare,
        Self::Rim,
        Self::Clap,
        Self::HiHat,
        Self::OpenHat,
        Self::Cymbal,
        Self::Sine,
        Self::Square,
        Self::Sawtooth,
        Self::Triangle,
        Self::WhiteNoise,
        Self::PinkNoise,
        Self::BrownNoise,
    ];

    pub fn spec(self) -> InstrumentSpec {
        use InstrumentFamily::*;
        let (default_note, family) = match self {
            Self::Kick => ("C1", Membrane),
            Self::Tom => ("G2", Membrane),
            Self::Snare => ("D3", NoiseBurst),
            Self::Rim => ("E5", NoiseBurst),
            Self::Clap => ("D#3", NoiseBurst),
            Self::HiHat => ("F#4", Metallic),
            Self::OpenHat => ("F#4", Metallic),
            Self::Cymbal => ("C#4", Metallic),
            Self::Sine | Self::Square | Self::Sawtooth | Self::Triangle => ("C4", Polyphonic),
            Self::WhiteNoise | Self::PinkNoise | Self::BrownNoise => ("C4", AmbientNoise),
        };
        InstrumentSpec { default_note, family }
    }

    pub fn family(self) -> InstrumentFamily {
        self.spec().family
    }

    pub fn default_note(self) -> &'static str {
        self.spec().default_note
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Tom => "tom",
            Self::Snare => "snare",
            Self::Rim => "rim",
            Self::Clap => "clap",
            Self::HiHat => "hihat",
            Self::OpenHat => "openhat",
            Self::Cymbal => "cymbal",
            Self::Sine => "sine",
            Self::Square => "square",
            Self::Sawtooth => "sawtooth",
            Self::Triangle => "triangle",
            Self::WhiteNoise => "whitenoise",
            Self::PinkNoise => "pinknoise",
            Self::BrownNoise => "brownnoise",
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InstrumentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(found) = Self::ALL.iter().find(|t| t.name() == lower) {
            return Ok(*found);
        }
        // Short aliases used by pattern files
        match lower.as_str() {
            "hat" | "closedhat" => Ok(Self::HiHat),
            "crash" | "ride" => Ok(Self::Cymbal),
            "saw" => Ok(Self::Sawtooth),
            "white" | "noise" => Ok(Self::WhiteNoise),
            "pink" => Ok(Self::PinkNoise),
            "brown" => Ok(Self::BrownNoise),
            _ => Err(CoreError::UnknownInstrument(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::note_to_midi;

    #[test]
    fn test_every_default_note_parses() {
        for instrument in InstrumentType::ALL {
            assert!(
                note_to_midi(instrument.default_note()).is_ok(),
                "{instrument} has an unparseable default note"
            );
        }
    }

    #[test]
    fn test_families() {
        assert_eq!(InstrumentType::Kick.family(), InstrumentFamily::Membrane);
        assert_eq!(InstrumentType::Clap.family(), InstrumentFamily::NoiseBurst);
        assert_eq!(InstrumentType::OpenHat.family(), InstrumentFamily::Metallic);
        assert_eq!(InstrumentType::Sawtooth.family(), InstrumentFamily::Polyphonic);
        assert_eq!(InstrumentType::PinkNoise.family(), InstrumentFamily::AmbientNoise);
    }

    #[test]
    fn test_parse_names_and_aliases() {
        for instrument in InstrumentType::ALL {
            assert_eq!(instrument.name().parse::<InstrumentType>(), Ok(instrument));
        }
        assert_eq!("Saw".parse::<InstrumentType>(), Ok(InstrumentType::Sawtooth));
        assert_eq!("crash".parse::<InstrumentType>(), Ok(InstrumentType::Cymbal));
        assert!("theremin".parse::<InstrumentType>().is_err());
    }
}
