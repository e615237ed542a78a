//! `voxcmd` entrypoint: wires capture, engines and actions into the
//! orchestrator and drives it from console commands.
//!
//! Every pipeline event is printed to stdout as one JSON line; human-facing
//! messages go to stderr. `--input-wav` replaces the microphone and console
//! with the utterances of a recorded file.

mod console;
mod wiring;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::path::Path;
use std::time::{Duration, Instant};
use voxcmd::audio::{read_wav_file, segment_all, CpalCapture};
use voxcmd::{telemetry, AppConfig, Orchestrator, UtteranceSource};

use crate::console::{spawn_console_thread, ConsoleCommand, HELP};

/// Max pending console commands before backpressure.
const INPUT_CHANNEL_CAPACITY: usize = 32;
/// How often the main loop rechecks the running flag.
const RUNNING_POLL: Duration = Duration::from_millis(200);
const IDLE_POLL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    if config.list_input_devices {
        list_input_devices();
        return Ok(());
    }

    if let Some(path) = telemetry::init_tracing(&config) {
        eprintln!("trace log: {}", path.display());
    }
    tracing::info!(
        language = %config.language,
        barge_in = config.barge_in(),
        continuous = config.continuous,
        "voxcmd starting"
    );

    if config.calibrate {
        return run_calibration(&config);
    }

    if let Some(path) = config.input_wav.as_deref() {
        return run_wav_file(&config, path);
    }

    let orchestrator = wiring::build_orchestrator(&config, wiring::live_segmenter(&config))?;
    orchestrator.subscribe(Box::new(|event| println!("{}", event.to_json())));
    if config.continuous {
        orchestrator
            .start_continuous()
            .context("failed to start continuous listening")?;
    }

    let (tx, rx) = bounded(INPUT_CHANNEL_CAPACITY);
    let _console = spawn_console_thread(tx).context("failed to start console thread")?;
    eprintln!("{HELP}");

    let mut quit_requested = false;
    while orchestrator.state().is_running() {
        match rx.recv_timeout(RUNNING_POLL) {
            Ok(ConsoleCommand::Quit) => {
                quit_requested = true;
                break;
            }
            Ok(command) => handle_command(&orchestrator, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !quit_requested {
        // Let a farewell reply finish before tearing playback down.
        wait_for_idle(&orchestrator, config.playback_timeout());
    }
    orchestrator.shutdown();
    tracing::info!("voxcmd exiting");
    Ok(())
}

fn handle_command(orchestrator: &Orchestrator, command: ConsoleCommand) {
    let state = orchestrator.state();
    match command {
        ConsoleCommand::PushToTalk => {
            if let Err(err) = orchestrator.start_pipeline_run() {
                eprintln!("failed to start pipeline run: {err}");
            }
        }
        ConsoleCommand::Interrupt => {
            if orchestrator.interrupt().is_none() {
                eprintln!("nothing to interrupt");
            }
        }
        ConsoleCommand::ToggleContinuous => {
            if orchestrator.is_continuous() {
                orchestrator.stop_continuous();
            } else if let Err(err) = orchestrator.start_continuous() {
                eprintln!("continuous listening failed: {err}");
            }
        }
        ConsoleCommand::ToggleLanguage => {
            eprintln!("language: {}", state.toggle_language());
        }
        ConsoleCommand::ToggleActive => {
            eprintln!("active: {}", state.toggle_active());
        }
        ConsoleCommand::ToggleMute => {
            eprintln!("muted: {}", orchestrator.toggle_muted());
        }
        ConsoleCommand::Reactivate => orchestrator.reactivate(),
        ConsoleCommand::Quit => {}
    }
}

fn wait_for_idle(orchestrator: &Orchestrator, limit: Duration) {
    let deadline = Instant::now() + limit;
    while orchestrator.state().holder().is_some() && Instant::now() < deadline {
        std::thread::sleep(IDLE_POLL);
    }
}

fn run_wav_file(config: &AppConfig, path: &Path) -> Result<()> {
    let orchestrator = wiring::build_orchestrator(config, wiring::file_segmenter(config))?;
    let samples = read_wav_file(path, config.sample_rate)
        .with_context(|| format!("failed to load --input-wav {}", path.display()))?;
    let threshold = config.calibrator().fallback().thresholds.silence;
    let utterances = segment_all(&samples, &config.segmenter_config(), threshold);
    tracing::info!(
        path = %path.display(),
        utterances = utterances.len(),
        "input file segmented"
    );
    if utterances.is_empty() {
        eprintln!("no speech found in {}", path.display());
    }

    for utterance in utterances {
        let outcome = orchestrator.run_once(UtteranceSource::Audio(utterance));
        for event in orchestrator.drain_events() {
            println!("{}", event.to_json());
        }
        tracing::debug!(?outcome, "file utterance processed");
        if !orchestrator.state().is_running() {
            break;
        }
    }
    orchestrator.shutdown();
    Ok(())
}

fn run_calibration(config: &AppConfig) -> Result<()> {
    let source = wiring::capture_source(config);
    let segmenter = config.segmenter_config();
    let calibration = config
        .calibrator()
        .calibrate(
            source.as_ref(),
            Duration::from_millis(config.calibration_ms),
            segmenter.frame_samples(),
        )
        .context("calibration failed")?;
    if let Some(ambient) = calibration.ambient_rms {
        println!("ambient rms: {ambient:.1}");
    }
    println!("speech threshold: {:.1}", calibration.thresholds.speech);
    println!("silence threshold: {:.1}", calibration.thresholds.silence);
    if let Some(notice) = calibration.notice() {
        println!("note: {notice}");
    }
    Ok(())
}

fn list_input_devices() {
    // VOXCMD_TEST_DEVICES stands in for real hardware in tests.
    let devices = if let Ok(raw) = std::env::var("VOXCMD_TEST_DEVICES") {
        raw.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    } else {
        CpalCapture::list_devices().unwrap_or_else(|err| {
            eprintln!("Failed to list audio input devices: {err}");
            Vec::new()
        })
    };

    if devices.is_empty() {
        println!("No audio input devices detected.");
    } else {
        println!("Available audio input devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
}
