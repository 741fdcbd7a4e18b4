use std::cell::RefCell;
use std::rc::Rc;

use gridbeat_core::{InstrumentType, Track, TrackId};

use super::*;
use crate::backend::{GESTURE_WINDOW, OfflineBackend, OfflineClock, UserGesture};

const SR: usize = 48_000;
/// One 4/4 measure at 120 BPM
const MEASURE: usize = 96_000;

fn offline() -> (Engine, OfflineClock) {
    Engine::offline(EngineConfig::default())
}

fn kick(id: &str, steps: &[usize]) -> Track {
    Track::new(id, InstrumentType::Kick).with_active_steps(steps)
}

/// (track, step, time) of every realized note
fn note_ons(events: &[UiEvent]) -> Vec<(TrackId, usize, f64)> {
    events
        .iter()
        .filter_map(|e| match e {
            UiEvent::NoteOn { track_id, step, time, .. } => Some((track_id.clone(), *step, *time)),
            _ => None,
        })
        .collect()
}

fn started(tracks: &[Track]) -> (Engine, OfflineClock) {
    let (mut engine, clock) = offline();
    engine.update_tracks(tracks);
    engine.start(UserGesture::now()).unwrap();
    (engine, clock)
}

#[test]
fn test_kick_on_quarters_fires_on_the_beat() {
    let (mut engine, clock) = started(&[kick("kick", &[0, 4, 8, 12])]);
    clock.advance(MEASURE);

    let notes = note_ons(&engine.drain_ui_events());
    let times: Vec<f64> = notes.iter().map(|n| n.2).collect();
    assert_eq!(times.len(), 4, "{times:?}");
    for (time, expected) in times.iter().zip([0.0, 0.5, 1.0, 1.5]) {
        assert!((time - expected).abs() < 1e-9, "{time} != {expected}");
    }
    let steps: Vec<usize> = notes.iter().map(|n| n.1).collect();
    assert_eq!(steps, vec![0, 4, 8, 12]);
}

#[test]
fn test_pattern_loops_every_measure() {
    let (mut engine, clock) = started(&[kick("kick", &[0])]);
    clock.advance(MEASURE * 3);
    let times: Vec<f64> = note_ons(&engine.drain_ui_events()).iter().map(|n| n.2).collect();
    assert_eq!(times.len(), 3);
    assert!((times[1] - 2.0).abs() < 1e-9);
    assert!((times[2] - 4.0).abs() < 1e-9);
}

#[test]
fn test_every_tick_notifies_including_inactive_steps() {
    let (mut engine, clock) = started(&[kick("kick", &[0])]);
    clock.advance(MEASURE);
    let events = engine.drain_ui_events();
    let steps: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            UiEvent::Step { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(steps, (0..16).collect::<Vec<_>>());
    assert_eq!(note_ons(&events).len(), 1);
}

#[test]
fn test_live_edit_is_heard_without_rebuild() {
    let mut track = kick("kick", &[0]);
    let (mut engine, clock) = started(std::slice::from_ref(&track));
    clock.advance(MEASURE);
    engine.drain_ui_events();

    track.toggle_step(8);
    track.steps[0].velocity = 40;
    engine.update_tracks(std::slice::from_ref(&track));
    clock.advance(MEASURE);

    let events = engine.drain_ui_events();
    let steps: Vec<usize> = note_ons(&events).iter().map(|n| n.1).collect();
    assert_eq!(steps, vec![0, 8]);
    let velocity = events.iter().find_map(|e| match e {
        UiEvent::NoteOn { step: 0, velocity, .. } => Some(*velocity),
        _ => None,
    });
    assert_eq!(velocity, Some(0.4));
    assert_eq!(engine.part_build_count(&track.id), 1);
}

#[test]
fn test_step_count_change_rebuilds_only_that_track() {
    let a = kick("a", &[0]);
    let b = Track::new("b", InstrumentType::Snare).with_active_steps(&[4]);
    let (mut engine, clock) = started(&[a.clone(), b.clone()]);
    clock.advance(4_800);

    let shorter = a.clone().with_step_count(8);
    engine.update_tracks(&[shorter.clone(), b.clone()]);
    assert_eq!(engine.part_build_count(&a.id), 2);
    assert_eq!(engine.part_build_count(&b.id), 1);

    // Same effective count again: no rebuild
    engine.update_tracks(&[shorter, b.clone()]);
    assert_eq!(engine.part_build_count(&a.id), 2);

    // Counts past the ceiling clamp to the same effective count
    let mut clamped = kick("a", &[0]);
    clamped.step_count = 32;
    engine.update_tracks(&[clamped.clone(), b.clone()]);
    assert_eq!(engine.part_build_count(&a.id), 3);
    clamped.step_count = 99;
    engine.update_tracks(&[clamped, b]);
    assert_eq!(engine.part_build_count(&a.id), 3);
}

#[test]
fn test_mute_is_live_and_silences_notifications() {
    let mut track = kick("kick", &[0, 8]);
    let (mut engine, clock) = started(std::slice::from_ref(&track));
    track.muted = true;
    engine.update_tracks(std::slice::from_ref(&track));
    clock.advance(MEASURE);
    let events = engine.drain_ui_events();
    assert!(events.iter().all(|e| matches!(e, UiEvent::GlobalStep { .. })));
    assert_eq!(engine.part_build_count(&track.id), 1);
}

#[test]
fn test_polyphony_ceiling_is_reached_but_never_exceeded() {
    let tracks: Vec<Track> = (0..8)
        .map(|i| {
            Track::new(format!("cym{i}"), InstrumentType::Cymbal)
                .with_active_steps(&(0..16).collect::<Vec<_>>())
        })
        .collect();
    let (engine, clock) = started(&tracks);

    let mut peak = 0;
    let mut overloaded = false;
    for _ in 0..(MEASURE / 512) {
        clock.advance(512);
        let stats = engine.audio_stats();
        assert!(stats.total_voices <= crate::polyphony::MAX_TOTAL_VOICES);
        peak = peak.max(stats.total_voices);
        overloaded |= stats.is_overloaded;
    }
    assert_eq!(peak, crate::polyphony::MAX_TOTAL_VOICES);
    assert!(overloaded);
}

#[test]
fn test_voices_are_released_after_sounding() {
    let (mut engine, clock) = started(&[kick("kick", &[0])]);
    clock.advance(2_400);
    assert_eq!(engine.audio_stats().total_voices, 1);
    engine.stop();
    clock.advance(SR);
    assert_eq!(engine.audio_stats().total_voices, 0);
}

#[test]
fn test_gain_normalization_example() {
    let a = kick("a", &[]).with_volume(0.8);
    let b = kick("b", &[]).with_volume(0.8);
    let (engine, _clock) = started(&[a.clone(), b]);
    assert!((engine.track_gain(&a.id) - 0.475).abs() < 1e-6);
}

#[test]
fn test_invalid_pitch_is_skipped() {
    let mut track = Track::new("lead", InstrumentType::Sine).with_active_steps(&[0, 4]);
    track.steps[0].note = "H9".into();
    let (mut engine, clock) = started(&[track]);
    clock.advance(MEASURE);
    let notes = note_ons(&engine.drain_ui_events());
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].1, 4);
    assert!(engine.is_running());
}

#[test]
fn test_stop_halts_scheduling() {
    let (mut engine, clock) = started(&[kick("kick", &[0, 4, 8, 12])]);
    clock.advance(SR / 4);
    engine.stop();
    assert_eq!(engine.state(), EngineState::Idle);
    engine.drain_ui_events();
    clock.advance(MEASURE);
    assert!(engine.drain_ui_events().is_empty());
}

#[test]
fn test_start_is_idempotent_while_running() {
    let (mut engine, clock) = started(&[kick("kick", &[0])]);
    clock.advance(SR / 2);
    engine.start(UserGesture::now()).unwrap();
    assert!(engine.position_beats() > 0.9);
}

#[test]
fn test_hard_stop_then_restart() {
    let track = kick("kick", &[0, 4, 8, 12]);
    let (mut engine, clock) = started(std::slice::from_ref(&track));
    clock.advance(SR / 4);
    engine.hard_stop();

    let stats = engine.audio_stats();
    assert_eq!(stats.total_voices, 0);
    assert_eq!(stats.active_parts, 0);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.position_beats(), 0.0);

    // Output is silent right away
    let out = clock.render(1_024);
    assert!(out.iter().all(|s| s.abs() < 1e-6));

    engine.drain_ui_events();
    engine.start(UserGesture::now()).unwrap();
    clock.advance(MEASURE);
    assert_eq!(note_ons(&engine.drain_ui_events()).len(), 4);
    assert_eq!(engine.part_build_count(&track.id), 2);
}

#[test]
fn test_hidden_host_hard_stops() {
    let (mut engine, clock) = started(&[kick("kick", &[0])]);
    clock.advance(512);
    engine.set_visibility(Visibility::Hidden);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.audio_stats().active_parts, 0);

    engine.set_visibility(Visibility::Visible);
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn test_hidden_host_suspends_until_next_start() {
    let (mut engine, clock) = started(&[kick("kick", &[0, 4, 8, 12])]);
    clock.advance(512);
    engine.set_visibility(Visibility::Hidden);
    assert!(clock.is_suspended());
    let before = clock.frames_rendered();
    clock.advance(SR);
    assert_eq!(clock.frames_rendered(), before);

    engine.drain_ui_events();
    engine.start(UserGesture::now()).unwrap();
    assert!(!clock.is_suspended());
    clock.advance(MEASURE);
    assert_eq!(note_ons(&engine.drain_ui_events()).len(), 4);
}

#[test]
fn test_start_resumes_an_externally_suspended_context() {
    let (mut engine, clock) = started(&[kick("kick", &[0])]);
    engine.stop();
    clock.suspend();
    assert!(clock.render(512).iter().all(|s| *s == 0.0));

    engine.drain_ui_events();
    engine.start(UserGesture::now()).unwrap();
    assert!(!clock.is_suspended());
    clock.advance(SR / 4);
    assert_eq!(note_ons(&engine.drain_ui_events()).len(), 1);
}

#[test]
fn test_dispose_is_idempotent_and_final() {
    let (mut engine, clock) = started(&[kick("kick", &[0])]);
    clock.advance(512);
    engine.dispose();
    engine.dispose();
    assert_eq!(engine.state(), EngineState::Disposed);
    assert!(!clock.is_active());

    engine.stop();
    engine.hard_stop();
    engine.set_bpm(90.0);
    engine.update_tracks(&[kick("other", &[0])]);
    engine.cleanup_track(&TrackId::new("kick"));
    assert!(matches!(engine.start(UserGesture::now()), Err(EngineError::Disposed)));
    assert!(matches!(engine.stop_recording(), Err(EngineError::NotRecording)));
    assert_eq!(engine.audio_stats().active_parts, 0);
    assert_eq!(engine.state(), EngineState::Disposed);
}

#[test]
fn test_sequence_before_activation_is_stored_only() {
    let (mut engine, _clock) = offline();
    let track = kick("kick", &[0]);
    engine.update_tracks(std::slice::from_ref(&track));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(engine.audio_stats().active_parts, 0);
    assert_eq!(engine.part_build_count(&track.id), 0);

    engine.start(UserGesture::now()).unwrap();
    assert_eq!(engine.audio_stats().active_parts, 1);
}

#[test]
fn test_activation_needs_a_fresh_gesture() {
    let (mut engine, _clock) = offline();
    if let Some(long_ago) = std::time::Instant::now().checked_sub(GESTURE_WINDOW * 2) {
        let result = engine.start(UserGesture::captured_at(long_ago));
        assert!(matches!(result, Err(EngineError::AudioContextBlocked(_))));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }
    assert!(engine.start(UserGesture::now()).is_ok());
}

#[test]
fn test_blocked_context() {
    let mut engine = Engine::new(OfflineBackend::blocked(48_000), EngineConfig::default());
    let result = engine.start(UserGesture::now());
    assert!(matches!(result, Err(EngineError::AudioContextBlocked(_))));
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

#[test]
fn test_recording_requires_gesture_when_uninitialized() {
    let (mut engine, _clock) = offline();
    assert!(matches!(
        engine.start_recording(None),
        Err(EngineError::AudioContextBlocked(_))
    ));
    assert!(matches!(engine.stop_recording(), Err(EngineError::NotRecording)));
}

#[test]
fn test_recording_captures_master_bus() {
    let (mut engine, clock) = offline();
    engine.update_tracks(&[kick("kick", &[0, 4, 8, 12])]);
    engine.start_recording(Some(UserGesture::now())).unwrap();
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(engine.is_recording());

    engine.start(UserGesture::now()).unwrap();
    clock.advance(SR / 2);
    let clip = engine.stop_recording().unwrap();

    assert_eq!(&clip.bytes()[..4], b"RIFF");
    assert_eq!(clip.frames(), SR / 2);
    assert_eq!(clip.channels(), 2);
    assert!(!engine.is_recording());
    assert!(matches!(engine.stop_recording(), Err(EngineError::NotRecording)));
}

#[test]
fn test_recording_export_rate_and_rerecord() {
    let config = EngineConfig { export_sample_rate: Some(24_000), ..EngineConfig::default() };
    let (mut engine, clock) = Engine::offline(config);
    engine.update_tracks(&[kick("kick", &[0])]);
    engine.start_recording(Some(UserGesture::now())).unwrap();
    engine.start(UserGesture::now()).unwrap();
    clock.advance(SR / 2);
    let clip = engine.stop_recording().unwrap();
    assert_eq!(clip.sample_rate(), 24_000);
    assert_eq!(clip.frames(), 12_000);

    // The take was handed off; the bus keeps rendering and can record again
    clock.advance(512);
    engine.start_recording(None).unwrap();
    clock.advance(1_024);
    assert_eq!(engine.stop_recording().unwrap().frames(), 512);
}

#[test]
fn test_part_ceiling_skips_new_parts() {
    let config = EngineConfig { max_active_parts: 2, ..EngineConfig::default() };
    let (mut engine, _clock) = Engine::offline(config);
    let tracks = [kick("a", &[0]), kick("b", &[0]), kick("c", &[0])];
    engine.update_tracks(&tracks);
    engine.start(UserGesture::now()).unwrap();
    assert_eq!(engine.audio_stats().active_parts, 2);
    assert_eq!(engine.part_build_count(&tracks[2].id), 0);

    engine.update_tracks(&tracks[1..]);
    assert_eq!(engine.audio_stats().active_parts, 2);
    assert_eq!(engine.part_build_count(&tracks[2].id), 1);
}

#[test]
fn test_cleanup_track_removes_part() {
    let track = kick("kick", &[0]);
    let (mut engine, _clock) = started(std::slice::from_ref(&track));
    engine.cleanup_track(&track.id);
    assert_eq!(engine.audio_stats().active_parts, 0);
}

#[test]
fn test_cleanup_track_rebalances_remaining_gains() {
    let a = kick("a", &[]).with_volume(0.8);
    let b = kick("b", &[]).with_volume(0.8);
    let (mut engine, _clock) = started(&[a.clone(), b.clone()]);
    let crowded = engine.strip_gain_db(&b.id).unwrap();
    assert!((crowded - 20.0 * 0.475f32.log10()).abs() < 1e-3);

    engine.cleanup_track(&a.id);
    assert!(engine.strip_gain_db(&a.id).is_none());
    let alone = engine.strip_gain_db(&b.id).unwrap();
    assert!((engine.track_gain(&b.id) - 0.76).abs() < 1e-6);
    assert!((alone - 20.0 * 0.76f32.log10()).abs() < 1e-3, "{alone} dB");
}

#[test]
fn test_readded_track_is_not_released_by_its_old_notes() {
    // Steps 0 and 1 of 16: notes at 0 s and 0.125 s
    let track = kick("kick", &[0, 1]);
    let (mut engine, clock) = started(std::slice::from_ref(&track));
    clock.advance(512);
    assert_eq!(engine.track_voices(&track.id), 1);

    engine.cleanup_track(&track.id);
    assert_eq!(engine.audio_stats().total_voices, 0);

    // Re-added mid-slot, the new part picks up at step 1
    engine.update_tracks(std::slice::from_ref(&track));
    // Past the first note's release time, inside the second's
    clock.advance(SR * 2 / 5 - 512);
    assert_eq!(engine.track_voices(&track.id), 1);
    assert_eq!(engine.audio_stats().total_voices, 1);

    clock.advance(SR / 2);
    assert_eq!(engine.audio_stats().total_voices, 0);
}

#[test]
fn test_set_bpm_is_immediate_and_clamped() {
    let track = kick("kick", &[0, 4]);
    let (mut engine, clock) = started(std::slice::from_ref(&track));
    engine.set_bpm(60.0);
    clock.advance(MEASURE);
    // Quarter notes at 60 BPM: steps 0 and 4 land at 0 s and 1 s
    let times: Vec<f64> = note_ons(&engine.drain_ui_events()).iter().map(|n| n.2).collect();
    assert_eq!(times.len(), 2);
    assert!((times[1] - 1.0).abs() < 1e-9);
    assert_eq!(engine.part_build_count(&track.id), 1);

    engine.set_bpm(1_000.0);
    assert_eq!(engine.bpm(), 300.0);
}

#[test]
fn test_pump_delivers_callbacks() {
    let (mut engine, clock) = offline();
    let steps = Rc::new(RefCell::new(Vec::new()));
    let globals = Rc::new(RefCell::new(Vec::new()));
    let (s, g) = (steps.clone(), globals.clone());
    engine.update_sequence(
        &[kick("kick", &[0])],
        move |id, step, _time| s.borrow_mut().push((id.clone(), step)),
        move |index, _time| g.borrow_mut().push(index),
    );
    engine.start(UserGesture::now()).unwrap();
    clock.advance(MEASURE);

    let delivered = engine.pump_ui_events();
    assert_eq!(delivered, 16 + 16 + 1);
    assert_eq!(steps.borrow().len(), 16);
    assert_eq!(steps.borrow()[3], (TrackId::new("kick"), 3));
    assert_eq!(*globals.borrow(), (0..16).collect::<Vec<_>>());
}

#[test]
fn test_full_ui_queue_drops_events() {
    let config = EngineConfig { ui_event_capacity: 4, ..EngineConfig::default() };
    let (mut engine, clock) = Engine::offline(config);
    engine.update_tracks(&[kick("kick", &[0])]);
    engine.start(UserGesture::now()).unwrap();
    clock.advance(MEASURE);
    assert_eq!(engine.drain_ui_events().len(), 4);
}

#[test]
fn test_output_is_audible_and_bounded() {
    let (_engine, clock) = started(&[kick("kick", &[0]), Track::new("hat", InstrumentType::HiHat).with_active_steps(&[0])]);
    let out = clock.render(4_800);
    let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.01);
    assert!(peak <= 1.0);
}
