//! gridbeat: play a step pattern live or render it to WAV

mod config;
mod pattern;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gridbeat_core::{BEATS_PER_MEASURE, Track};
use gridbeat_services::{Engine, EngineConfig, UiEvent, UserGesture, output_device_names};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the UI queue is pumped while playing live
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
/// Time left for tails after the transport stops
const TAIL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "gridbeat")]
#[command(about = "Step-sequencer drum machine and synth engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Play a pattern on the output device
    Play {
        /// Pattern file (JSON array of tracks); the demo groove if omitted
        pattern: Option<PathBuf>,

        /// Tempo in BPM
        #[arg(short, long)]
        bpm: Option<f64>,

        /// How long to play, in seconds
        #[arg(short, long, default_value = "8.0")]
        seconds: f64,
    },

    /// Render a pattern offline to a WAV file
    Render {
        /// Pattern file (JSON array of tracks); the demo groove if omitted
        pattern: Option<PathBuf>,

        /// Output WAV file path
        #[arg(short, long)]
        output: PathBuf,

        /// Tempo in BPM
        #[arg(short, long)]
        bpm: Option<f64>,

        /// Number of measures to render
        #[arg(long, default_value = "4")]
        bars: u32,
    },

    /// List output devices; the configured one is starred
    Devices,
}

fn tracks_from(pattern: Option<&Path>) -> Result<Vec<Track>> {
    match pattern {
        Some(path) => pattern::load_pattern(path),
        None => {
            info!("No pattern given, using the demo groove");
            Ok(pattern::demo_pattern())
        }
    }
}

fn play(config: EngineConfig, tracks: &[Track], bpm: Option<f64>, seconds: f64) -> Result<()> {
    let mut engine = Engine::live(config);
    if let Some(bpm) = bpm {
        engine.set_bpm(bpm);
    }
    engine.update_sequence(
        tracks,
        |track, step, time| debug!(track = %track, step, time, "Step"),
        |index, _time| {
            if index % 4 == 0 {
                debug!(beat = index / 4 + 1, "Beat");
            }
        },
    );

    // Launching from the command line is the user's gesture
    engine.start(UserGesture::now())?;
    info!(bpm = engine.bpm(), tracks = tracks.len(), seconds, "Playing");

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while Instant::now() < deadline {
        engine.pump_ui_events();
        std::thread::sleep(FRAME_INTERVAL);
    }

    let stats = engine.audio_stats();
    info!(
        voices = stats.total_voices,
        parts = stats.active_parts,
        cpu = %format!("{:.1}%", stats.estimated_cpu_load * 100.0),
        "Stopping"
    );
    engine.stop();
    std::thread::sleep(TAIL);
    engine.dispose();
    Ok(())
}

fn render(config: EngineConfig, tracks: &[Track], output: &Path, bpm: Option<f64>, bars: u32) -> Result<()> {
    let (mut engine, clock) = Engine::offline(config);
    if let Some(bpm) = bpm {
        engine.set_bpm(bpm);
    }
    engine.update_tracks(tracks);
    engine.start_recording(Some(UserGesture::now()))?;
    engine.start(UserGesture::now())?;

    let measure_secs = BEATS_PER_MEASURE * 60.0 / engine.bpm();
    let seconds = measure_secs * bars.max(1) as f64 + TAIL.as_secs_f64();
    clock.advance_secs(seconds);

    let notes = engine
        .drain_ui_events()
        .iter()
        .filter(|e| matches!(e, UiEvent::NoteOn { .. }))
        .count();
    let clip = engine.stop_recording()?;
    clip.save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(
        path = %output.display(),
        bars,
        notes,
        seconds = %format!("{:.2}", clip.duration_secs()),
        "Rendered"
    );
    engine.dispose();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gridbeat=info".parse()?)
                .add_directive("gridbeat_services=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config().engine;

    match cli.command {
        Command::Play { pattern, bpm, seconds } => {
            let tracks = tracks_from(pattern.as_deref())?;
            play(config, &tracks, bpm, seconds)
        }
        Command::Render {
            pattern,
            output,
            bpm,
            bars,
        } => {
            let tracks = tracks_from(pattern.as_deref())?;
            render(config, &tracks, &output, bpm, bars)
        }
        Command::Devices => {
            for name in output_device_names()? {
                let marker = if config.output_device.as_deref() == Some(name.as_str()) { "*" } else { " " };
                println!("{marker} {name}");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("gridbeat").chain(line.split_whitespace())).map(|cli| cli.command)
    }

    #[test]
    fn test_play_defaults() {
        assert_eq!(
            parse("play").unwrap(),
            Command::Play {
                pattern: None,
                bpm: None,
                seconds: 8.0
            }
        );
    }

    #[test]
    fn test_render_with_pattern_and_flags() {
        let command = parse("render beat.json -o out.wav --bpm 140 --bars 2").unwrap();
        assert_eq!(
            command,
            Command::Render {
                pattern: Some(PathBuf::from("beat.json")),
                output: PathBuf::from("out.wav"),
                bpm: Some(140.0),
                bars: 2
            }
        );
    }

    #[test]
    fn test_render_needs_output() {
        assert!(parse("render").is_err());
        assert!(parse("render beat.json").is_err());
    }

    #[test]
    fn test_bad_flags() {
        assert!(parse("play --bpm").is_err());
        assert!(parse("play --bpm fast").is_err());
        assert!(parse("play --loud").is_err());
        assert!(parse("dance").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_devices_command() {
        assert_eq!(parse("devices").unwrap(), Command::Devices);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
