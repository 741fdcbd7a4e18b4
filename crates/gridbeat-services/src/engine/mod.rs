//! Engine lifecycle: gesture-gated activation, transport control, background
//! handling and disposal

mod render;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, bounded};
use gridbeat_core::{Track, TrackId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{AudioBackend, CpalBackend, OfflineBackend, OfflineClock, UserGesture};
use crate::config::EngineConfig;
use crate::recorder::{RecordedClip, RecorderError};

use self::render::{EngineCore, OVERLOAD_THRESHOLD};

pub use self::render::NOTE_LENGTH_RATIO;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Audio context blocked: {0}")]
    AudioContextBlocked(String),
    #[error("Not recording")]
    NotRecording,
    #[error("Recording failed: {0}")]
    Recording(#[from] RecorderError),
    #[error("Engine has been disposed")]
    Disposed,
}

/// Lifecycle state of an [`Engine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Uninitialized,
    Idle,
    Running,
    Disposed,
}

/// Whether the host surface is visible to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Notification queued by the render path for the caller's thread
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A track's part reached `step` (fires for inactive steps too)
    Step { track_id: TrackId, step: usize, time: f64 },
    /// The shared sixteenth loop reached `index` (0-15)
    GlobalStep { index: usize, time: f64 },
    /// A note was actually triggered
    NoteOn {
        track_id: TrackId,
        step: usize,
        time: f64,
        frequency: f32,
        velocity: f32,
    },
}

/// Snapshot of engine load
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioStats {
    pub total_voices: usize,
    pub active_parts: usize,
    /// Render time as a share of real time, smoothed
    pub estimated_cpu_load: f64,
    pub is_overloaded: bool,
}

type StepCallback = Box<dyn FnMut(&TrackId, usize, f64)>;
type GlobalStepCallback = Box<dyn FnMut(usize, f64)>;

/// Handle the backend uses to pull audio out of the engine
#[derive(Clone)]
pub struct Renderer {
    core: Arc<Mutex<EngineCore>>,
}

impl Renderer {
    /// Render an interleaved buffer; silence if the engine is unavailable
    pub fn render(&self, buffer: &mut [f32], channels: u16) {
        let Ok(mut core) = self.core.lock() else {
            buffer.fill(0.0);
            return;
        };
        core.render(buffer, channels);
    }
}

/// Step-sequencer audio engine
pub struct Engine {
    core: Arc<Mutex<EngineCore>>,
    backend: Box<dyn AudioBackend>,
    config: EngineConfig,
    state: EngineState,
    ui_rx: Receiver<UiEvent>,
    on_step: Option<StepCallback>,
    on_global_step: Option<GlobalStepCallback>,
}

impl Engine {
    pub fn new(backend: impl AudioBackend + 'static, config: EngineConfig) -> Self {
        let (ui_tx, ui_rx) = bounded(config.ui_event_capacity.max(1));
        let core = EngineCore::new(config.clone(), ui_tx);
        Self {
            core: Arc::new(Mutex::new(core)),
            backend: Box::new(backend),
            config,
            state: EngineState::Uninitialized,
            ui_rx,
            on_step: None,
            on_global_step: None,
        }
    }

    /// Engine on the configured cpal output device
    pub fn live(config: EngineConfig) -> Self {
        Self::new(CpalBackend::new(config.output_device.clone()), config)
    }

    /// Engine on an offline backend, plus the clock that drives it
    pub fn offline(config: EngineConfig) -> (Self, OfflineClock) {
        let backend = OfflineBackend::new(config.sample_rate);
        let clock = backend.clock();
        (Self::new(backend, config), clock)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    fn lock(&self) -> Option<MutexGuard<'_, EngineCore>> {
        self.core.lock().ok()
    }

    /// Activate the audio context on first use. A fresh user gesture is
    /// required to leave `Uninitialized`.
    fn ensure_initialized(&mut self, gesture: Option<UserGesture>) -> Result<(), EngineError> {
        match self.state {
            EngineState::Disposed => return Err(EngineError::Disposed),
            EngineState::Idle | EngineState::Running => {
                if self.backend.is_suspended() {
                    self.backend
                        .resume()
                        .map_err(|e| EngineError::AudioContextBlocked(e.to_string()))?;
                    debug!("Resumed audio context");
                }
                return Ok(());
            }
            EngineState::Uninitialized => {}
        }

        match gesture {
            Some(g) if g.is_fresh() => {}
            Some(_) => {
                return Err(EngineError::AudioContextBlocked("user gesture expired".into()));
            }
            None => {
                return Err(EngineError::AudioContextBlocked("user gesture required".into()));
            }
        }

        let renderer = Renderer { core: self.core.clone() };
        let sample_rate = self.backend.activate(renderer).map_err(|e| {
            warn!(backend = self.backend.name(), error = %e, "Audio context activation failed");
            EngineError::AudioContextBlocked(e.to_string())
        })?;

        if let Some(mut core) = self.lock() {
            core.initialize(sample_rate);
        }
        self.state = EngineState::Idle;
        info!(backend = self.backend.name(), sample_rate, "Audio context activated");
        Ok(())
    }

    /// Start (or restart from the top) playback
    pub fn start(&mut self, gesture: UserGesture) -> Result<(), EngineError> {
        self.ensure_initialized(Some(gesture))?;
        if self.state == EngineState::Running {
            return Ok(());
        }
        if let Some(mut core) = self.lock() {
            core.start_playback();
        }
        self.state = EngineState::Running;
        Ok(())
    }

    /// Stop scheduling; notes already sounding ring out
    pub fn stop(&mut self) {
        if matches!(self.state, EngineState::Disposed | EngineState::Uninitialized) {
            return;
        }
        if let Some(mut core) = self.lock() {
            core.stop_playback();
        }
        if self.state == EngineState::Running {
            info!("Transport stopped");
        }
        self.state = EngineState::Idle;
    }

    /// Immediate silence and teardown of all scheduling
    pub fn hard_stop(&mut self) {
        if self.state == EngineState::Disposed {
            return;
        }
        if let Some(mut core) = self.lock() {
            core.hard_stop();
        }
        if self.state == EngineState::Running {
            self.state = EngineState::Idle;
        }
        debug!("Hard stop");
    }

    /// Release every resource. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if self.state == EngineState::Disposed {
            return;
        }
        if let Some(mut core) = self.lock() {
            core.dispose();
        }
        self.backend.close();
        self.on_step = None;
        self.on_global_step = None;
        self.state = EngineState::Disposed;
        info!("Engine disposed");
    }

    /// Hiding the host while running hard-stops playback and suspends the
    /// audio context; the next `start` resumes it
    pub fn set_visibility(&mut self, visibility: Visibility) {
        if visibility == Visibility::Hidden && self.state == EngineState::Running {
            info!("Host hidden, stopping playback");
            self.hard_stop();
            if let Err(e) = self.backend.suspend() {
                warn!(backend = self.backend.name(), error = %e, "Failed to suspend audio context");
            }
        }
    }

    /// Change tempo immediately; no part is rebuilt
    pub fn set_bpm(&mut self, bpm: f64) {
        if self.state == EngineState::Disposed {
            return;
        }
        if let Some(mut core) = self.lock() {
            core.set_bpm(bpm);
        }
    }

    pub fn bpm(&self) -> f64 {
        self.lock().map(|c| c.transport.bpm()).unwrap_or(self.config.default_bpm)
    }

    /// Transport position in beats
    pub fn position_beats(&self) -> f64 {
        self.lock().map(|c| c.transport.position_beats()).unwrap_or(0.0)
    }

    /// Replace the track snapshot and callbacks, then reconcile strips and
    /// parts. Before activation only the snapshot is stored.
    pub fn update_sequence<S, G>(&mut self, tracks: &[Track], on_step: S, on_global_step: G)
    where
        S: FnMut(&TrackId, usize, f64) + 'static,
        G: FnMut(usize, f64) + 'static,
    {
        if self.state == EngineState::Disposed {
            return;
        }
        self.on_step = Some(Box::new(on_step));
        self.on_global_step = Some(Box::new(on_global_step));
        self.update_tracks(tracks);
    }

    /// Like [`Engine::update_sequence`], keeping the registered callbacks
    pub fn update_tracks(&mut self, tracks: &[Track]) {
        if self.state == EngineState::Disposed {
            return;
        }
        if let Some(mut core) = self.lock() {
            core.update_tracks(tracks);
        }
    }

    pub fn cleanup_track(&mut self, id: &TrackId) {
        if self.state == EngineState::Disposed {
            return;
        }
        if let Some(mut core) = self.lock() {
            core.cleanup_track(id);
        }
    }

    /// Begin capturing the master bus, activating audio first if needed
    pub fn start_recording(&mut self, gesture: Option<UserGesture>) -> Result<(), EngineError> {
        self.ensure_initialized(gesture)?;
        let started = self.lock().is_some_and(|mut core| core.start_recording());
        if !started {
            return Err(EngineError::AudioContextBlocked("master bus unavailable".into()));
        }
        info!("Recording started");
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.lock()
            .and_then(|mut core| core.recorder_mut().map(|r| r.is_recording()))
            .unwrap_or(false)
    }

    /// Finish recording and return the encoded clip
    pub fn stop_recording(&mut self) -> Result<RecordedClip, EngineError> {
        if self.state == EngineState::Disposed {
            return Err(EngineError::NotRecording);
        }
        let take = {
            let mut core = self.lock().ok_or(EngineError::NotRecording)?;
            let recorder = core.recorder_mut().ok_or(EngineError::NotRecording)?;
            if !recorder.is_recording() {
                return Err(EngineError::NotRecording);
            }
            recorder.finish()
        };
        // Resampling and encoding run with the render lock released
        Ok(take.encode(self.config.export_sample_rate)?)
    }

    pub fn audio_stats(&self) -> AudioStats {
        let Some(core) = self.lock() else {
            return AudioStats::default();
        };
        let load = core.load;
        AudioStats {
            total_voices: core.polyphony.total(),
            active_parts: core.active_parts(),
            estimated_cpu_load: load,
            is_overloaded: load > OVERLOAD_THRESHOLD || core.polyphony.at_capacity(),
        }
    }

    /// Times the part for `id` has been (re)built
    pub fn part_build_count(&self, id: &TrackId) -> u32 {
        self.lock().map(|c| c.part_build_count(id)).unwrap_or(0)
    }

    /// Current realized gain for a track
    pub fn track_gain(&self, id: &TrackId) -> f32 {
        self.lock().map(|c| c.gain.scaled_gain(id)).unwrap_or(0.0)
    }

    /// Level the track's channel strip is set to, in dB
    pub fn strip_gain_db(&self, id: &TrackId) -> Option<f32> {
        self.lock().and_then(|c| c.strip_gain_db(id))
    }

    /// Voices currently counted against `id`
    pub fn track_voices(&self, id: &TrackId) -> usize {
        self.lock().map(|c| c.polyphony.track_voices(id)).unwrap_or(0)
    }

    /// Take every queued UI event without invoking callbacks
    pub fn drain_ui_events(&mut self) -> Vec<UiEvent> {
        self.ui_rx.try_iter().collect()
    }

    /// Deliver queued step notifications to the registered callbacks.
    /// Returns the number of events consumed.
    pub fn pump_ui_events(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.ui_rx.try_recv() {
            count += 1;
            match event {
                UiEvent::Step { track_id, step, time } => {
                    if let Some(cb) = &mut self.on_step {
                        cb(&track_id, step, time);
                    }
                }
                UiEvent::GlobalStep { index, time } => {
                    if let Some(cb) = &mut self.on_global_step {
                        cb(index, time);
                    }
                }
                UiEvent::NoteOn { .. } => {}
            }
        }
        count
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}
