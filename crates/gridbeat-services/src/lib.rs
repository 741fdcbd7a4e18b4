//! gridbeat-services: Audio engine, synthesis, scheduling and recording

pub mod audio_effects;
pub mod audio_io;
pub mod backend;
pub mod channel_strip;
pub mod config;
pub mod engine;
pub mod gain;
pub mod polyphony;
pub mod recorder;
pub mod scheduler;
pub mod synths;

pub use audio_effects::{AudioEffect, MasterLimiter};
pub use audio_io::{AudioOutputError, OutputStream, output_device_names};
pub use backend::{AudioBackend, CpalBackend, OfflineBackend, OfflineClock, UserGesture};
pub use channel_strip::ChannelStrip;
pub use config::EngineConfig;
pub use engine::{
    AudioStats, Engine, EngineError, EngineState, NOTE_LENGTH_RATIO, Renderer, UiEvent, Visibility,
};
pub use gain::GainLimiter;
pub use polyphony::PolyphonyManager;
pub use recorder::{RecordedClip, RecordedTake, Recorder, RecorderError};
pub use scheduler::{GlobalStepLoop, Part, ReleaseQueue};
pub use synths::{NoteTrigger, Synth, SynthUnit, build_synth};
