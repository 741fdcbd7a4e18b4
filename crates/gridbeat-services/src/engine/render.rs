//! Render-side engine state: everything the audio callback touches

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crossbeam_channel::Sender;
use gridbeat_core::{Track, TrackId, Transport, note_to_hz, slot_seconds};
use tracing::{debug, info, warn};

use super::UiEvent;
use crate::audio_effects::MasterLimiter;
use crate::channel_strip::ChannelStrip;
use crate::config::EngineConfig;
use crate::gain::GainLimiter;
use crate::polyphony::PolyphonyManager;
use crate::recorder::Recorder;
use crate::scheduler::{GlobalStepLoop, Part, ReleaseQueue, ScheduledTick};
use crate::synths::{MAX_BLOCK_SIZE, NoteTrigger};

/// Notes sound for this share of their slot
pub const NOTE_LENGTH_RATIO: f64 = 0.5;

const LIMITER_ATTACK_MS: f32 = 1.0;
const LIMITER_RELEASE_MS: f32 = 100.0;
/// Weight of the newest block in the load average
const LOAD_SMOOTHING: f64 = 0.1;
pub(super) const OVERLOAD_THRESHOLD: f64 = 0.85;

/// Master limiter and recorder tap, allocated on activation
#[derive(Debug)]
struct MasterBus {
    limiter: MasterLimiter,
    recorder: Recorder,
}

#[derive(Debug)]
pub struct EngineCore {
    pub(super) config: EngineConfig,
    pub(super) sample_rate: u32,
    pub(super) initialized: bool,
    pub(super) disposed: bool,
    pub(super) transport: Transport,
    /// Latest track snapshot, in caller order
    tracks: HashMap<TrackId, Track>,
    order: Vec<TrackId>,
    strips: HashMap<TrackId, ChannelStrip>,
    parts: HashMap<TrackId, Part>,
    part_builds: HashMap<TrackId, u32>,
    global_loop: Option<GlobalStepLoop>,
    pub(super) polyphony: PolyphonyManager,
    pub(super) gain: GainLimiter,
    releases: ReleaseQueue,
    master: Option<MasterBus>,
    ui_tx: Sender<UiEvent>,
    /// Frames rendered since activation; the clock releases run on
    frame_clock: u64,
    pub(super) load: f64,
    left: Vec<f32>,
    right: Vec<f32>,
    due_ticks: Vec<(TrackId, ScheduledTick)>,
    global_ticks: Vec<ScheduledTick>,
}

impl EngineCore {
    pub fn new(config: EngineConfig, ui_tx: Sender<UiEvent>) -> Self {
        let mut transport = Transport::new(config.sample_rate);
        transport.set_bpm(config.default_bpm);
        Self {
            sample_rate: config.sample_rate,
            initialized: false,
            disposed: false,
            transport,
            tracks: HashMap::new(),
            order: Vec::new(),
            strips: HashMap::new(),
            parts: HashMap::new(),
            part_builds: HashMap::new(),
            global_loop: None,
            polyphony: PolyphonyManager::new(config.max_total_voices, config.max_voices_per_track),
            gain: GainLimiter::new(),
            releases: ReleaseQueue::default(),
            master: None,
            ui_tx,
            frame_clock: 0,
            load: 0.0,
            left: vec![0.0; MAX_BLOCK_SIZE],
            right: vec![0.0; MAX_BLOCK_SIZE],
            due_ticks: Vec::new(),
            global_ticks: Vec::new(),
            config,
        }
    }

    /// Allocate the master bus at the context sample rate and build strips
    /// and parts for the tracks seen so far
    pub fn initialize(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.transport.set_sample_rate(self.sample_rate);
        let sr = self.sample_rate as f32;
        self.master = Some(MasterBus {
            limiter: MasterLimiter::new(LIMITER_ATTACK_MS, LIMITER_RELEASE_MS, sr),
            recorder: Recorder::new(self.sample_rate),
        });
        self.initialized = true;
        self.reconcile();
    }

    // -- sequence ---------------------------------------------------------

    /// Replace the track snapshot; reconcile if the engine is live
    pub fn update_tracks(&mut self, tracks: &[Track]) {
        let incoming: HashSet<&TrackId> = tracks.iter().map(|t| &t.id).collect();
        let removed: Vec<TrackId> = self
            .order
            .iter()
            .filter(|id| !incoming.contains(id))
            .cloned()
            .collect();
        for id in &removed {
            self.cleanup_track(id);
        }

        self.order.clear();
        self.tracks.clear();
        for track in tracks {
            if self.tracks.insert(track.id.clone(), track.clone()).is_none() {
                self.order.push(track.id.clone());
            } else {
                warn!(track = %track.id, "Duplicate track id, keeping the last one");
            }
        }

        if self.initialized {
            self.reconcile();
        }
    }

    /// Bring gains, strips and parts in line with the snapshot
    fn reconcile(&mut self) {
        for id in &self.order {
            if let Some(track) = self.tracks.get(id) {
                self.gain.register_track(id, track.base_gain());
            }
        }

        let bpm = self.transport.bpm();
        let sr = self.sample_rate as f32;
        let position = self.transport.position_beats();
        let playing = self.transport.is_playing();

        for id in &self.order {
            let Some(track) = self.tracks.get(id) else { continue };
            let gain = self.gain.scaled_gain(id);

            match self.strips.get_mut(id) {
                Some(strip) => {
                    strip.apply_track(track);
                    strip.set_gain(gain);
                }
                None => {
                    debug!(track = %id, instrument = %track.instrument_type, "Creating channel strip");
                    self.strips.insert(id.clone(), ChannelStrip::new(track, gain, bpm, sr));
                }
            }

            // Only a change of effective step count rebuilds the part
            let effective = track.effective_step_count();
            if let Some(part) = self.parts.get_mut(id)
                && part.step_count() == effective
            {
                part.set_muted(track.muted);
                continue;
            }

            if self.parts.remove(id).is_none() && self.parts.len() >= self.config.max_active_parts {
                warn!(
                    track = %id,
                    limit = self.config.max_active_parts,
                    "Active part limit reached, not scheduling track"
                );
                continue;
            }
            let mut part = Part::new(id.clone(), effective, position);
            part.set_muted(track.muted);
            if playing {
                part.start(position);
            }
            self.parts.insert(id.clone(), part);
            *self.part_builds.entry(id.clone()).or_insert(0) += 1;
            debug!(track = %id, steps = effective, "Built part");
        }
    }

    /// Drop everything the engine holds for `id` and rebalance the gains of
    /// the tracks that remain
    pub fn cleanup_track(&mut self, id: &TrackId) {
        if let Some(mut strip) = self.strips.remove(id) {
            strip.silence();
        }
        self.parts.remove(id);
        self.part_builds.remove(id);
        // Its voices were cut with the strip; pending releases must not land
        // on a track that reuses the id
        self.releases.cancel_track(id);
        self.polyphony.clear_track(id);
        self.gain.unregister_track(id);
        self.tracks.remove(id);
        self.order.retain(|t| t != id);

        for (track, strip) in self.strips.iter_mut() {
            strip.set_gain(self.gain.scaled_gain(track));
        }
        debug!(track = %id, "Cleaned up track");
    }

    pub fn part_build_count(&self, id: &TrackId) -> u32 {
        self.part_builds.get(id).copied().unwrap_or(0)
    }

    pub fn strip_gain_db(&self, id: &TrackId) -> Option<f32> {
        self.strips.get(id).map(ChannelStrip::gain_db)
    }

    pub fn active_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.transport.set_bpm(bpm);
        let bpm = self.transport.bpm();
        for strip in self.strips.values_mut() {
            strip.set_bpm(bpm);
        }
    }

    // -- transport --------------------------------------------------------

    /// Rewind and start every part and the global loop from the top
    pub fn start_playback(&mut self) {
        self.transport.stop();
        self.reconcile();
        for part in self.parts.values_mut() {
            part.start(0.0);
        }
        self.global_loop
            .get_or_insert_with(|| GlobalStepLoop::new(0.0))
            .start(0.0);
        self.transport.play();
        info!(bpm = self.transport.bpm(), parts = self.parts.len(), "Transport started");
    }

    /// Stop scheduling; ringing notes decay on their own
    pub fn stop_playback(&mut self) {
        self.transport.stop();
        for part in self.parts.values_mut() {
            part.stop();
        }
        if let Some(global) = &mut self.global_loop {
            global.stop();
        }
    }

    /// Immediate silence: cancel releases, cut voices and tails, drop parts
    pub fn hard_stop(&mut self) {
        self.releases.clear();
        for strip in self.strips.values_mut() {
            strip.silence();
        }
        if let Some(master) = &mut self.master {
            // The limiter's lookahead still holds the last block
            master.limiter.reset();
        }
        self.polyphony.reset();
        self.parts.clear();
        self.global_loop = None;
        self.transport.stop();
    }

    pub fn dispose(&mut self) {
        self.hard_stop();
        self.strips.clear();
        self.gain.clear();
        self.tracks.clear();
        self.order.clear();
        self.master = None;
        self.initialized = false;
        self.disposed = true;
    }

    // -- recording --------------------------------------------------------

    pub fn start_recording(&mut self) -> bool {
        match &mut self.master {
            Some(master) => {
                master.recorder.start();
                true
            }
            None => false,
        }
    }

    pub fn recorder_mut(&mut self) -> Option<&mut Recorder> {
        self.master.as_mut().map(|m| &mut m.recorder)
    }

    // -- rendering --------------------------------------------------------

    /// Fill an interleaved device buffer
    pub fn render(&mut self, buffer: &mut [f32], channels: u16) {
        let channels = channels.max(1) as usize;
        if self.disposed || self.master.is_none() {
            buffer.fill(0.0);
            return;
        }

        let started = Instant::now();
        let frames = buffer.len() / channels;
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(MAX_BLOCK_SIZE);
            self.render_block(n);

            let out = &mut buffer[done * channels..(done + n) * channels];
            for (i, frame) in out.chunks_mut(channels).enumerate() {
                let (l, r) = (self.left[i], self.right[i]);
                match frame {
                    [mono] => *mono = (l + r) * 0.5,
                    [left, right, rest @ ..] => {
                        *left = l;
                        *right = r;
                        rest.fill(0.0);
                    }
                    [] => {}
                }
            }
            done += n;
        }

        if frames > 0 {
            let budget = frames as f64 / self.sample_rate as f64;
            let load = started.elapsed().as_secs_f64() / budget;
            self.load += (load - self.load) * LOAD_SMOOTHING;
        }
    }

    fn render_block(&mut self, frames: usize) {
        while let Some(id) = self.releases.pop_due(self.frame_clock) {
            self.polyphony.decrement_voice(&id);
        }

        self.left[..frames].fill(0.0);
        self.right[..frames].fill(0.0);

        if self.transport.is_playing() {
            self.schedule_block(frames);
        }

        for strip in self.strips.values_mut() {
            strip.render_into(&mut self.left[..frames], &mut self.right[..frames]);
        }

        if let Some(master) = &mut self.master {
            master.limiter.process(&mut self.left[..frames], &mut self.right[..frames]);
            master.recorder.capture(&self.left[..frames], &self.right[..frames]);
        }

        self.frame_clock += frames as u64;
    }

    /// Fire every tick that falls inside the next `frames` frames
    fn schedule_block(&mut self, frames: usize) {
        let samples_per_beat = self.transport.samples_per_beat();
        let (start_beat, end_beat) = self.transport.advance(frames as u64);
        let offset_of = |beat: f64| {
            let offset = ((beat - start_beat) * samples_per_beat).round();
            (offset.max(0.0) as usize).min(frames.saturating_sub(1))
        };

        let mut global_ticks = std::mem::take(&mut self.global_ticks);
        global_ticks.clear();
        if let Some(global) = &mut self.global_loop {
            global.collect_ticks(end_beat, &mut global_ticks);
        }
        for tick in &global_ticks {
            let time = self.context_time(offset_of(tick.beat));
            let _ = self.ui_tx.try_send(UiEvent::GlobalStep { index: tick.step, time });
        }
        self.global_ticks = global_ticks;

        let mut due = std::mem::take(&mut self.due_ticks);
        due.clear();
        let mut ticks = Vec::new();
        for id in &self.order {
            let Some(part) = self.parts.get_mut(id) else { continue };
            ticks.clear();
            part.collect_ticks(end_beat, &mut ticks);
            due.extend(ticks.iter().map(|tick| (id.clone(), *tick)));
        }
        due.sort_by(|a, b| a.1.beat.total_cmp(&b.1.beat));

        for (id, tick) in &due {
            self.fire_step(id, tick.step, offset_of(tick.beat));
        }
        self.due_ticks = due;
    }

    fn context_time(&self, offset: usize) -> f64 {
        (self.frame_clock + offset as u64) as f64 / self.sample_rate as f64
    }

    /// One tick of one track, resolved against the live snapshot
    fn fire_step(&mut self, id: &TrackId, step_index: usize, offset: usize) {
        if self.disposed {
            return;
        }
        let Some(track) = self.tracks.get(id) else { return };
        if track.muted {
            return;
        }

        let time = self.context_time(offset);
        let _ = self.ui_tx.try_send(UiEvent::Step {
            track_id: id.clone(),
            step: step_index,
            time,
        });

        let Some(step) = track.step(step_index) else { return };
        if !step.active {
            return;
        }

        let pitch = track.pitch_for(step);
        let frequency = match note_to_hz(pitch) {
            Ok(hz) => hz,
            Err(e) => {
                warn!(track = %id, step = step_index, error = %e, "Skipping note");
                return;
            }
        };
        let velocity = step.normalized_velocity();

        let Some(strip) = self.strips.get_mut(id) else {
            warn!(track = %id, "No channel strip for track, skipping note");
            return;
        };

        if !self.polyphony.increment_voice(id) {
            debug!(track = %id, step = step_index, "Voice limit reached, dropping trigger");
            return;
        }

        let duration = slot_seconds(self.transport.bpm(), track.effective_step_count()) * NOTE_LENGTH_RATIO;
        strip.trigger(NoteTrigger {
            frequency,
            duration,
            offset: offset as u32,
            velocity,
        });

        let sounding = duration + strip.release_time();
        let due = self.frame_clock + offset as u64 + (sounding * self.sample_rate as f64).ceil() as u64;
        self.releases.schedule(due, id.clone());

        let _ = self.ui_tx.try_send(UiEvent::NoteOn {
            track_id: id.clone(),
            step: step_index,
            time,
            frequency,
            velocity,
        });
    }
}
