use super::defaults::{
    MAX_DEVICE_NAME_LEN, MAX_ENERGY, MAX_RECORDING_HARD_LIMIT_MS, MAX_TIMEOUT_MS,
};
use super::{AppConfig, FileConfig};
use crate::audio::{LevelCalibrator, SegmenterConfig};
use crate::external::CommandSpec;
use crate::orchestrator::OrchestratorConfig;
use anyhow::{anyhow, bail, Context, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches};
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Copy file values into fields the user did not set on the command line
/// or through the environment.
macro_rules! overlay {
    ($cfg:ident, $file:ident, $matches:ident; optional $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $file.$field.take() {
                if !is_explicit($matches, stringify!($field)) {
                    $cfg.$field = Some(value);
                }
            }
        )+
    };
    ($cfg:ident, $file:ident, $matches:ident; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $file.$field.take() {
                if !is_explicit($matches, stringify!($field)) {
                    $cfg.$field = value;
                }
            }
        )+
    };
}

impl AppConfig {
    /// Parse CLI arguments, apply the optional YAML file and validate.
    pub fn parse_args() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches)
    }

    /// Same as [`AppConfig::parse_args`] for an explicit argument list.
    pub fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config = Self::from_arg_matches(matches)?;
        if let Some(path) = config.config.clone() {
            let file = load_file_config(&path)?;
            config.apply_file(file, matches);
        }
        config.validate()?;
        Ok(config)
    }

    pub(super) fn apply_file(&mut self, mut file: FileConfig, matches: &ArgMatches) {
        overlay!(self, file, matches;
            continuous,
            language,
            sample_rate,
            frame_ms,
            silence_threshold,
            silence_duration_ms,
            max_recording_ms,
            min_speech_ms,
            pre_roll_ms,
            calibration_ms,
            speech_multiplier,
            min_speech_threshold,
            channel_capacity,
            cooldown_ms,
            interrupt_grace_ms,
            watchdog_secs,
            playback_timeout_ms,
            synth_timeout_ms,
            engine_timeout_ms,
            tts_sample_rate,
            logs,
            log_content,
        );
        overlay!(self, file, matches; optional
            input_device,
            output_device,
            recognizer_cmd,
            brain_cmd,
            tts_en_cmd,
            tts_uk_cmd,
        );
        if let Some(barge_in) = file.barge_in {
            if !is_explicit(matches, "no_barge_in") {
                self.no_barge_in = !barge_in;
            }
        }
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&mut self) -> Result<()> {
        if !(8_000..=96_000).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between 8000 and 96000 Hz, got {}",
                self.sample_rate
            );
        }
        if !(10..=500).contains(&self.frame_ms) {
            bail!("--frame-ms must be between 10 and 500, got {}", self.frame_ms);
        }
        if self.max_recording_ms < self.frame_ms
            || self.max_recording_ms > MAX_RECORDING_HARD_LIMIT_MS
        {
            bail!(
                "--max-recording-ms must be between --frame-ms ({}) and {MAX_RECORDING_HARD_LIMIT_MS}, got {}",
                self.frame_ms,
                self.max_recording_ms
            );
        }
        if self.silence_duration_ms < self.frame_ms
            || self.silence_duration_ms > self.max_recording_ms
        {
            bail!(
                "--silence-duration-ms must be >= --frame-ms ({}) and <= --max-recording-ms ({})",
                self.frame_ms,
                self.max_recording_ms
            );
        }
        if self.min_speech_ms > self.max_recording_ms {
            bail!(
                "--min-speech-ms ({}) cannot exceed --max-recording-ms ({})",
                self.min_speech_ms,
                self.max_recording_ms
            );
        }
        if self.pre_roll_ms > self.max_recording_ms {
            bail!(
                "--pre-roll-ms ({}) cannot exceed --max-recording-ms ({})",
                self.pre_roll_ms,
                self.max_recording_ms
            );
        }
        if !(self.frame_ms..=10_000).contains(&self.calibration_ms) {
            bail!(
                "--calibration-ms must be between --frame-ms ({}) and 10000, got {}",
                self.frame_ms,
                self.calibration_ms
            );
        }
        if !(1.0..=20.0).contains(&self.speech_multiplier) {
            bail!(
                "--speech-multiplier must be between 1.0 and 20.0, got {}",
                self.speech_multiplier
            );
        }
        for (flag, value) in [
            ("--silence-threshold", self.silence_threshold),
            ("--min-speech-threshold", self.min_speech_threshold),
        ] {
            if !(0.0..=MAX_ENERGY).contains(&value) {
                bail!("{flag} must be between 0 and {MAX_ENERGY}, got {value}");
            }
        }
        if !(8..=1024).contains(&self.channel_capacity) {
            bail!(
                "--channel-capacity must be between 8 and 1024, got {}",
                self.channel_capacity
            );
        }
        if self.cooldown_ms > 10_000 {
            bail!("--cooldown-ms must be at most 10000, got {}", self.cooldown_ms);
        }
        if !(1..=3_600).contains(&self.watchdog_secs) {
            bail!(
                "--watchdog-secs must be between 1 and 3600, got {}",
                self.watchdog_secs
            );
        }
        for (flag, value) in [
            ("--interrupt-grace-ms", self.interrupt_grace_ms),
            ("--playback-timeout-ms", self.playback_timeout_ms),
            ("--synth-timeout-ms", self.synth_timeout_ms),
            ("--engine-timeout-ms", self.engine_timeout_ms),
        ] {
            if value == 0 || value > MAX_TIMEOUT_MS {
                bail!("{flag} must be between 1 and {MAX_TIMEOUT_MS}, got {value}");
            }
        }
        if !(8_000..=96_000).contains(&self.tts_sample_rate) {
            bail!(
                "--tts-sample-rate must be between 8000 and 96000 Hz, got {}",
                self.tts_sample_rate
            );
        }

        for (flag, device) in [
            ("--input-device", &self.input_device),
            ("--output-device", &self.output_device),
        ] {
            if let Some(device) = device {
                if device.trim().is_empty()
                    || device.len() > MAX_DEVICE_NAME_LEN
                    || device.chars().any(char::is_control)
                {
                    bail!("{flag} must be 1-{MAX_DEVICE_NAME_LEN} characters with no control characters");
                }
            }
        }

        if let Some(path) = &self.input_wav {
            if !path.is_file() {
                bail!("--input-wav '{}' is not a file", path.display());
            }
            if self.calibrate {
                bail!("--input-wav cannot be combined with --calibrate");
            }
        }

        for (flag, command) in [
            ("--recognizer-cmd", &mut self.recognizer_cmd),
            ("--brain-cmd", &mut self.brain_cmd),
            ("--tts-en-cmd", &mut self.tts_en_cmd),
            ("--tts-uk-cmd", &mut self.tts_uk_cmd),
        ] {
            if let Some(line) = command.as_deref() {
                *command = Some(sanitize_command(line, flag)?);
            }
        }

        Ok(())
    }

    pub fn barge_in(&self) -> bool {
        !self.no_barge_in
    }

    pub fn logging_enabled(&self) -> bool {
        self.logs && !self.no_logs
    }

    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            sample_rate: self.sample_rate,
            frame_ms: self.frame_ms,
            silence_duration_ms: self.silence_duration_ms,
            max_recording_ms: self.max_recording_ms,
            min_speech_ms: self.min_speech_ms,
            pre_roll_ms: self.pre_roll_ms,
            calibration_ms: self.calibration_ms,
            channel_capacity: self.channel_capacity,
            ..SegmenterConfig::default()
        }
    }

    pub fn calibrator(&self) -> LevelCalibrator {
        LevelCalibrator {
            speech_multiplier: self.speech_multiplier,
            minimum_floor: self.min_speech_threshold,
            static_threshold: self.silence_threshold,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            barge_in: self.barge_in(),
            interrupt_grace: Duration::from_millis(self.interrupt_grace_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            log_content: self.log_content,
        }
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_timeout_ms)
    }

    pub fn synth_timeout(&self) -> Duration {
        Duration::from_millis(self.synth_timeout_ms)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }
}

fn is_explicit(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine | ValueSource::EnvVariable)
    )
}

pub(super) fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))
}

/// Accept a helper command whose program is either a bare name (resolved
/// through `PATH` at spawn time) or an existing executable file.
pub(super) fn sanitize_command(line: &str, flag: &str) -> Result<String> {
    let spec = CommandSpec::parse(line).with_context(|| format!("{flag} is invalid"))?;
    let program = spec.program();
    if program.chars().any(char::is_control) {
        bail!("{flag} program must not contain control characters");
    }
    let path = Path::new(program);
    if path.is_absolute() || program.contains(std::path::MAIN_SEPARATOR) {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {flag} program '{program}'"))?;
        let metadata = fs::metadata(&canonical)
            .with_context(|| format!("failed to inspect {flag} '{}'", canonical.display()))?;
        if !metadata.is_file() {
            bail!("{flag} '{}' is not a file", canonical.display());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                bail!(
                    "{flag} '{}' exists but is not executable (mode {:o})",
                    canonical.display(),
                    mode
                );
            }
        }
        canonical
            .to_str()
            .ok_or_else(|| anyhow!("{flag} must be valid UTF-8"))?;
    }
    Ok(line.trim().to_string())
}
