//! Command-line parsing, YAML overlay and validation.

mod defaults;
mod validation;

use crate::i18n::Language;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

pub use defaults::*;

/// CLI options for the voice command assistant. Every value can also come
/// from the environment or from the `--config` YAML file.
#[derive(Debug, Parser, Clone)]
#[command(name = "voxcmd", about = "Bilingual voice command assistant", author, version)]
pub struct AppConfig {
    /// YAML file with default values; command-line and env values win over it
    #[arg(long, env = "VOXCMD_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Preferred audio input device name
    #[arg(long, env = "VOXCMD_INPUT_DEVICE")]
    pub input_device: Option<String>,

    /// Preferred audio output device name
    #[arg(long, env = "VOXCMD_OUTPUT_DEVICE")]
    pub output_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Measure ambient noise, print the derived thresholds and exit
    #[arg(long, default_value_t = false)]
    pub calibrate: bool,

    /// Run every utterance found in this WAV file through the pipeline, then exit
    #[arg(long = "input-wav", env = "VOXCMD_INPUT_WAV", value_name = "FILE")]
    pub input_wav: Option<PathBuf>,

    /// Start continuous listening right away
    #[arg(long, env = "VOXCMD_CONTINUOUS", default_value_t = false)]
    pub continuous: bool,

    /// Starting conversation language
    #[arg(long, env = "VOXCMD_LANGUAGE", value_enum, default_value_t = Language::En)]
    pub language: Language,

    /// Queue new speech behind a busy run instead of interrupting it
    #[arg(long = "no-barge-in", env = "VOXCMD_NO_BARGE_IN", default_value_t = false)]
    pub no_barge_in: bool,

    /// Capture sample rate (Hz)
    #[arg(long, env = "VOXCMD_SAMPLE_RATE", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Capture frame length (milliseconds)
    #[arg(long, default_value_t = DEFAULT_FRAME_MS)]
    pub frame_ms: u64,

    /// Static silence threshold (RMS); also the speech threshold when calibration fails
    #[arg(long, default_value_t = DEFAULT_SILENCE_THRESHOLD)]
    pub silence_threshold: f32,

    /// Trailing silence that ends an utterance (milliseconds)
    #[arg(long, default_value_t = DEFAULT_SILENCE_DURATION_MS)]
    pub silence_duration_ms: u64,

    /// Hard cap on one recording (milliseconds)
    #[arg(long, default_value_t = DEFAULT_MAX_RECORDING_MS)]
    pub max_recording_ms: u64,

    /// Minimum speech for an utterance to count (milliseconds)
    #[arg(long, default_value_t = DEFAULT_MIN_SPEECH_MS)]
    pub min_speech_ms: u64,

    /// Audio kept from before the speech onset (milliseconds)
    #[arg(long, default_value_t = DEFAULT_PRE_ROLL_MS)]
    pub pre_roll_ms: u64,

    /// Ambient sample length for calibration (milliseconds)
    #[arg(long, default_value_t = DEFAULT_CALIBRATION_MS)]
    pub calibration_ms: u64,

    /// Speech threshold = ambient RMS x this multiplier
    #[arg(long, default_value_t = DEFAULT_SPEECH_MULTIPLIER)]
    pub speech_multiplier: f32,

    /// Lowest speech threshold calibration may produce
    #[arg(long, default_value_t = DEFAULT_MIN_SPEECH_THRESHOLD)]
    pub min_speech_threshold: f32,

    /// Frame channel capacity between the capture thread and consumers
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Continuous listener deafness after the assistant spoke (milliseconds)
    #[arg(long, default_value_t = DEFAULT_COOLDOWN_MS)]
    pub cooldown_ms: u64,

    /// How long push-to-talk waits for an interrupted run (milliseconds)
    #[arg(long, default_value_t = DEFAULT_INTERRUPT_GRACE_MS)]
    pub interrupt_grace_ms: u64,

    /// Busy-flag watchdog; a run older than this is force-reset (seconds)
    #[arg(long, default_value_t = DEFAULT_WATCHDOG_SECS)]
    pub watchdog_secs: u64,

    /// Hard limit on one playback (milliseconds)
    #[arg(long, default_value_t = DEFAULT_PLAYBACK_TIMEOUT_MS)]
    pub playback_timeout_ms: u64,

    /// Wait limit for one synthesis request (milliseconds)
    #[arg(long, default_value_t = DEFAULT_SYNTH_TIMEOUT_MS)]
    pub synth_timeout_ms: u64,

    /// Wait limit for recognizer and understanding helpers (milliseconds)
    #[arg(long, default_value_t = DEFAULT_ENGINE_TIMEOUT_MS)]
    pub engine_timeout_ms: u64,

    /// Speech recognizer command; reads PCM16 LE on stdin ({lang}, {rate} placeholders)
    #[arg(long, env = "VOXCMD_RECOGNIZER_CMD")]
    pub recognizer_cmd: Option<String>,

    /// Understanding backend command; JSON request on stdin, JSON reply on stdout
    #[arg(long, env = "VOXCMD_BRAIN_CMD")]
    pub brain_cmd: Option<String>,

    /// English text-to-speech command; text on stdin, WAV or PCM16 on stdout
    #[arg(long, env = "VOXCMD_TTS_EN_CMD")]
    pub tts_en_cmd: Option<String>,

    /// Ukrainian text-to-speech command
    #[arg(long, env = "VOXCMD_TTS_UK_CMD")]
    pub tts_uk_cmd: Option<String>,

    /// Sample rate of raw PCM produced by the TTS commands (Hz)
    #[arg(long, default_value_t = DEFAULT_TTS_SAMPLE_RATE)]
    pub tts_sample_rate: u32,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOXCMD_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOXCMD_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow transcripts and replies in the log
    #[arg(
        long = "log-content",
        env = "VOXCMD_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

/// Values accepted from the `--config` YAML file. Keys mirror the long
/// flag names with underscores.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub continuous: Option<bool>,
    pub language: Option<Language>,
    pub barge_in: Option<bool>,
    pub sample_rate: Option<u32>,
    pub frame_ms: Option<u64>,
    pub silence_threshold: Option<f32>,
    pub silence_duration_ms: Option<u64>,
    pub max_recording_ms: Option<u64>,
    pub min_speech_ms: Option<u64>,
    pub pre_roll_ms: Option<u64>,
    pub calibration_ms: Option<u64>,
    pub speech_multiplier: Option<f32>,
    pub min_speech_threshold: Option<f32>,
    pub channel_capacity: Option<usize>,
    pub cooldown_ms: Option<u64>,
    pub interrupt_grace_ms: Option<u64>,
    pub watchdog_secs: Option<u64>,
    pub playback_timeout_ms: Option<u64>,
    pub synth_timeout_ms: Option<u64>,
    pub engine_timeout_ms: Option<u64>,
    pub recognizer_cmd: Option<String>,
    pub brain_cmd: Option<String>,
    pub tts_en_cmd: Option<String>,
    pub tts_uk_cmd: Option<String>,
    pub tts_sample_rate: Option<u32>,
    pub logs: Option<bool>,
    pub log_content: Option<bool>,
}
