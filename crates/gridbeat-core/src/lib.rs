//! gridbeat-core: Domain types for the gridbeat step sequencer

mod error;
pub mod instrument;
pub mod note;
mod track;
mod transport;

pub use error::{CoreError, Result};
pub use instrument::{InstrumentFamily, InstrumentSpec, InstrumentType};
pub use note::{midi_to_hz, note_to_hz, note_to_midi};
pub use track::{Step, Track, TrackId, MAX_STEPS, MAX_VELOCITY, MIN_STEPS, MIN_VELOCITY};
pub use transport::{
    slot_beats, slot_seconds, tick_beat, Transport, TransportState, BEATS_PER_MEASURE, MAX_BPM,
    MIN_BPM,
};
