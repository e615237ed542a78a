pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_FRAME_MS: u64 = 100;
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 500.0;
pub const DEFAULT_SILENCE_DURATION_MS: u64 = 1_500;
pub const DEFAULT_MAX_RECORDING_MS: u64 = 30_000;
pub const DEFAULT_MIN_SPEECH_MS: u64 = 300;
pub const DEFAULT_PRE_ROLL_MS: u64 = 500;
pub const DEFAULT_CALIBRATION_MS: u64 = 1_000;
pub const DEFAULT_SPEECH_MULTIPLIER: f32 = 3.0;
pub const DEFAULT_MIN_SPEECH_THRESHOLD: f32 = 100.0;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub const DEFAULT_COOLDOWN_MS: u64 = 1_500;
pub const DEFAULT_INTERRUPT_GRACE_MS: u64 = 1_000;
pub const DEFAULT_WATCHDOG_SECS: u64 = 60;
pub const DEFAULT_PLAYBACK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SYNTH_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_ENGINE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_TTS_SAMPLE_RATE: u32 = 22_050;

/// Upper bound for any single timeout knob.
pub const MAX_TIMEOUT_MS: u64 = 600_000;
pub const MAX_RECORDING_HARD_LIMIT_MS: u64 = 300_000;
/// Full scale of a signed 16-bit sample.
pub const MAX_ENERGY: f32 = 32_767.0;
pub const MAX_DEVICE_NAME_LEN: usize = 256;
