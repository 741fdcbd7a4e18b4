//! Step scheduling: per-track parts, the global sixteenth loop and
//! voice-release events on the render clock

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use gridbeat_core::{BEATS_PER_MEASURE, TrackId, tick_beat};

/// Ticks per measure of the global loop
pub const GLOBAL_STEPS: usize = 16;

/// A tick that falls inside the block being rendered
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledTick {
    /// Slot index within the measure
    pub step: usize,
    /// Absolute beat position of the tick
    pub beat: f64,
}

/// Measure-relative loop of `steps` equal slots.
///
/// Ticks are numbered from the transport origin, so the beat of every tick is
/// computed from integers and never drifts.
#[derive(Debug, Clone)]
struct StepClock {
    steps: usize,
    next_tick: u64,
}

impl StepClock {
    fn new(steps: usize, position_beats: f64) -> Self {
        let mut clock = Self { steps: steps.max(1), next_tick: 0 };
        clock.seek(position_beats);
        clock
    }

    /// First tick at or after `position_beats`
    fn seek(&mut self, position_beats: f64) {
        let slots = position_beats.max(0.0) * self.steps as f64 / BEATS_PER_MEASURE;
        self.next_tick = (slots - 1e-9).ceil().max(0.0) as u64;
    }

    /// Visit every remaining tick before `end_beat`
    fn advance(&mut self, end_beat: f64, mut visit: impl FnMut(ScheduledTick)) {
        loop {
            let beat = tick_beat(self.next_tick, self.steps);
            if beat >= end_beat {
                break;
            }
            visit(ScheduledTick {
                step: (self.next_tick % self.steps as u64) as usize,
                beat,
            });
            self.next_tick += 1;
        }
    }
}

/// One track's step loop. Holds no pattern data: every tick is resolved
/// against the live track at fire time.
#[derive(Debug, Clone)]
pub struct Part {
    track_id: TrackId,
    clock: StepClock,
    muted: bool,
    running: bool,
}

impl Part {
    pub fn new(track_id: TrackId, step_count: usize, position_beats: f64) -> Self {
        Self {
            track_id,
            clock: StepClock::new(step_count, position_beats),
            muted: false,
            running: false,
        }
    }

    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    /// Events per measure
    pub fn step_count(&self) -> usize {
        self.clock.steps
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start looping from `position_beats`
    pub fn start(&mut self, position_beats: f64) {
        self.clock.seek(position_beats);
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Collect the ticks due before `end_beat`. A muted part keeps its place
    /// in the loop but reports nothing.
    pub fn collect_ticks(&mut self, end_beat: f64, out: &mut Vec<ScheduledTick>) {
        if !self.running {
            return;
        }
        let muted = self.muted;
        self.clock.advance(end_beat, |tick| {
            if !muted {
                out.push(tick);
            }
        });
    }
}

/// Single sixteenth-note loop shared by all tracks
#[derive(Debug, Clone)]
pub struct GlobalStepLoop {
    clock: StepClock,
    running: bool,
}

impl GlobalStepLoop {
    pub fn new(position_beats: f64) -> Self {
        Self {
            clock: StepClock::new(GLOBAL_STEPS, position_beats),
            running: false,
        }
    }

    pub fn start(&mut self, position_beats: f64) {
        self.clock.seek(position_beats);
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn collect_ticks(&mut self, end_beat: f64, out: &mut Vec<ScheduledTick>) {
        if !self.running {
            return;
        }
        self.clock.advance(end_beat, |tick| out.push(tick));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ReleaseEvent {
    due_frame: u64,
    seq: u64,
    track_id: TrackId,
}

/// Pending voice releases, keyed on the render frame clock.
/// Cleared as a set by a hard stop.
#[derive(Debug, Default)]
pub struct ReleaseQueue {
    events: BinaryHeap<Reverse<ReleaseEvent>>,
    seq: u64,
}

impl ReleaseQueue {
    pub fn schedule(&mut self, due_frame: u64, track_id: TrackId) {
        self.seq += 1;
        self.events.push(Reverse(ReleaseEvent {
            due_frame,
            seq: self.seq,
            track_id,
        }));
    }

    /// Next release due at or before `frame`
    pub fn pop_due(&mut self, frame: u64) -> Option<TrackId> {
        let Reverse(next) = self.events.peek()?;
        if next.due_frame > frame {
            return None;
        }
        self.events.pop().map(|Reverse(event)| event.track_id)
    }

    /// Forget every pending release for `track_id`
    pub fn cancel_track(&mut self, track_id: &TrackId) {
        self.events.retain(|Reverse(event)| &event.track_id != track_id);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
