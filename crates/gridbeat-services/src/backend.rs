//! Audio context backends and the user-gesture guard

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::audio_io::{AudioOutputError, OutputStream};
use crate::engine::Renderer;

/// How long an input event counts as a transient user activation
pub const GESTURE_WINDOW: Duration = Duration::from_secs(5);

/// Proof that an explicit user action (click, key press) happened.
/// Audio may only be activated while the gesture is fresh.
#[derive(Debug, Clone, Copy)]
pub struct UserGesture {
    at: Instant,
}

impl UserGesture {
    /// Capture a gesture happening now
    pub fn now() -> Self {
        Self { at: Instant::now() }
    }

    pub fn captured_at(at: Instant) -> Self {
        Self { at }
    }

    pub fn is_fresh(&self) -> bool {
        self.at.elapsed() <= GESTURE_WINDOW
    }
}

/// The device side of the engine: something that pulls rendered audio
pub trait AudioBackend {
    fn name(&self) -> &str;
    /// Start pulling audio from `renderer`; returns the context sample rate
    fn activate(&mut self, renderer: Renderer) -> Result<u32, AudioOutputError>;
    fn suspend(&mut self) -> Result<(), AudioOutputError>;
    fn resume(&mut self) -> Result<(), AudioOutputError>;
    fn is_suspended(&self) -> bool;
    /// Release the device; the backend cannot be reactivated
    fn close(&mut self);
}

/// Output device via cpal
#[derive(Default)]
pub struct CpalBackend {
    device: Option<String>,
    stream: Option<OutputStream>,
    suspended: bool,
}

impl CpalBackend {
    /// Backend on the named output device, or the default one for `None`
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn activate(&mut self, renderer: Renderer) -> Result<u32, AudioOutputError> {
        let stream = OutputStream::open(self.device.as_deref(), renderer)?;
        let sample_rate = stream.sample_rate();
        self.stream = Some(stream);
        self.suspended = false;
        Ok(sample_rate)
    }

    fn suspend(&mut self) -> Result<(), AudioOutputError> {
        if let Some(stream) = &self.stream {
            stream.pause()?;
            self.suspended = true;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), AudioOutputError> {
        if let Some(stream) = &self.stream {
            stream.resume()?;
            self.suspended = false;
        }
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            info!(device = stream.device_name(), "Closed output stream");
        }
    }
}

#[derive(Default)]
struct OfflineState {
    renderer: Option<Renderer>,
    suspended: bool,
    frames_rendered: u64,
}

/// Handle that drives an offline backend: each call renders frames on demand
#[derive(Clone, Default)]
pub struct OfflineClock {
    state: Arc<Mutex<OfflineState>>,
    sample_rate: u32,
}

impl OfflineClock {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Render `frames` stereo frames, interleaved. Silent while the backend is
    /// inactive or suspended.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0; frames * 2];
        let Ok(mut state) = self.state.lock() else {
            return buffer;
        };
        if state.suspended {
            return buffer;
        }
        if let Some(renderer) = &state.renderer {
            // Device-sized chunks, like a real callback
            for chunk in buffer.chunks_mut(512 * 2) {
                renderer.render(chunk, 2);
            }
            state.frames_rendered += frames as u64;
        }
        buffer
    }

    /// Render and discard
    pub fn advance(&self, frames: usize) {
        self.render(frames);
    }

    pub fn advance_secs(&self, secs: f64) {
        self.advance((secs * self.sample_rate as f64).round() as usize);
    }

    /// Suspend the context from outside the engine, as a platform does
    /// when another app takes the audio device
    pub fn suspend(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.suspended = true;
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().map(|s| s.suspended).unwrap_or(false)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.state.lock().map(|s| s.frames_rendered).unwrap_or(0)
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().map(|s| s.renderer.is_some()).unwrap_or(false)
    }
}

/// Deviceless backend for tests and faster-than-real-time rendering
pub struct OfflineBackend {
    clock: OfflineClock,
    refuse_activation: bool,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            clock: OfflineClock {
                state: Arc::default(),
                sample_rate: sample_rate.max(1),
            },
            refuse_activation: false,
        }
    }

    /// A backend whose activation always fails, like a context the platform
    /// keeps blocked
    pub fn blocked(sample_rate: u32) -> Self {
        Self {
            refuse_activation: true,
            ..Self::new(sample_rate)
        }
    }

    pub fn clock(&self) -> OfflineClock {
        self.clock.clone()
    }
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn activate(&mut self, renderer: Renderer) -> Result<u32, AudioOutputError> {
        if self.refuse_activation {
            return Err(AudioOutputError::Refused("offline context is blocked".into()));
        }
        let mut state = self
            .clock
            .state
            .lock()
            .map_err(|_| AudioOutputError::Refused("offline clock poisoned".into()))?;
        state.renderer = Some(renderer);
        state.suspended = false;
        debug!(sample_rate = self.clock.sample_rate, "Offline backend active");
        Ok(self.clock.sample_rate)
    }

    fn suspend(&mut self) -> Result<(), AudioOutputError> {
        self.clock.suspend();
        Ok(())
    }

    fn resume(&mut self) -> Result<(), AudioOutputError> {
        if let Ok(mut state) = self.clock.state.lock() {
            state.suspended = false;
        }
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        self.clock.is_suspended()
    }

    fn close(&mut self) {
        if let Ok(mut state) = self.clock.state.lock() {
            state.renderer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_gesture() {
        assert!(UserGesture::now().is_fresh());
    }

    #[test]
    fn test_stale_gesture() {
        let Some(long_ago) = Instant::now().checked_sub(GESTURE_WINDOW * 2) else {
            return;
        };
        assert!(!UserGesture::captured_at(long_ago).is_fresh());
    }

    #[test]
    fn test_inactive_clock_renders_silence() {
        let backend = OfflineBackend::new(48_000);
        let clock = backend.clock();
        let out = clock.render(256);
        assert_eq!(out.len(), 512);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(clock.frames_rendered(), 0);
        assert!(!clock.is_active());
    }
}
