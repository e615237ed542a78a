//! Energy-threshold voice activity detection.
//!
//! Frames are labelled by comparing their RMS energy with a threshold; all
//! durations are expressed in whole frames derived from [`SegmenterConfig`].

use super::TARGET_RATE;
use std::time::Duration;

/// Timing and sizing knobs for segmentation.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub sample_rate: u32,
    pub frame_ms: u64,
    pub silence_duration_ms: u64,
    pub max_recording_ms: u64,
    pub min_speech_ms: u64,
    pub pre_roll_ms: u64,
    pub calibration_ms: u64,
    pub poll_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_RATE,
            frame_ms: 100,
            silence_duration_ms: 1_500,
            max_recording_ms: 30_000,
            min_speech_ms: 300,
            pre_roll_ms: 500,
            calibration_ms: 1_000,
            poll_timeout_ms: 500,
            channel_capacity: 64,
        }
    }
}

impl SegmenterConfig {
    pub fn frame_samples(&self) -> usize {
        ((u64::from(self.sample_rate) * self.frame_ms) / 1000).max(1) as usize
    }

    fn frames_for(&self, ms: u64) -> usize {
        (ms / self.frame_ms.max(1)) as usize
    }

    /// Consecutive quiet frames that end an utterance.
    pub fn silence_frames(&self) -> usize {
        self.frames_for(self.silence_duration_ms).max(1)
    }

    /// Hard cap on frames in one utterance.
    pub fn max_frames(&self) -> usize {
        self.frames_for(self.max_recording_ms).max(1)
    }

    pub fn min_speech_frames(&self) -> usize {
        self.frames_for(self.min_speech_ms)
    }

    pub fn pre_roll_frames(&self) -> usize {
        self.frames_for(self.pre_roll_ms).max(1)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    pub fn calibration_duration(&self) -> Duration {
        Duration::from_millis(self.calibration_ms)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameLabel {
    Speech,
    Silence,
}

/// Label a frame by energy. A frame at exactly the threshold counts as speech.
pub fn classify(rms: f32, threshold: f32) -> FrameLabel {
    if rms >= threshold {
        FrameLabel::Speech
    } else {
        FrameLabel::Silence
    }
}
