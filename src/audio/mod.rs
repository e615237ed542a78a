//! Audio capture, energy-based voice activity detection and playback.
//!
//! Microphone audio is captured via CPAL, normalized to mono PCM16 at the
//! configured rate, and cut into utterances by the [`Segmenter`] using a
//! calibrated energy threshold, trailing silence and a pre-roll ring.

/// Default capture sample rate expected by recognizers.
pub const TARGET_RATE: u32 = 16_000;

mod calibrate;
mod capture;
mod dispatch;
mod frame;
mod playback;
mod recorder;
mod resample;
mod ring;
mod segmenter;
mod source;
#[cfg(test)]
mod tests;
mod vad;
mod wav;

pub use calibrate::{Calibration, LevelCalibrator, Thresholds};
pub use capture::{segment_all, segment_pcm, CaptureMetrics, CaptureResult, StopReason};
pub use frame::{rms, AudioFrame, Utterance};
pub use playback::{
    wait_for_playback, AudioFormat, CpalPlayback, DecodedAudio, PlaybackOutcome, PlaybackSink,
    SpeechAudio, StopSignal, DEFAULT_PLAYBACK_TIMEOUT, PLAYBACK_POLL_INTERVAL,
};
pub use recorder::CpalCapture;
pub use ring::SegmentBuffer;
pub use segmenter::{SegmentCallback, SegmentEvent, Segmenter};
pub use source::{CaptureSource, CaptureStream, ScriptedSource};
pub use vad::{classify, FrameLabel, SegmenterConfig};
pub use wav::read_wav_file;
