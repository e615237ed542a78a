//! Ambient-noise calibration for the energy threshold detector.

use super::source::CaptureSource;
use crate::error::AudioError;
use crossbeam_channel::RecvTimeoutError;
use std::time::{Duration, Instant};

/// Energy levels used to classify frames. Continuous listening triggers on
/// `speech`; bounded recording ends on sustained energy below `silence`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub speech: f32,
    pub silence: f32,
}

/// Outcome of one calibration attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Measured ambient RMS; `None` when measurement failed and static values apply.
    pub ambient_rms: Option<f32>,
    pub thresholds: Thresholds,
    /// Original silence threshold when calibration had to lower it.
    pub silence_lowered_from: Option<f32>,
}

impl Calibration {
    /// Human-readable note about a silence threshold override, if one happened.
    pub fn notice(&self) -> Option<String> {
        self.silence_lowered_from.map(|from| {
            format!(
                "silence threshold lowered from {from:.0} to {:.0} to stay below speech threshold",
                self.thresholds.silence
            )
        })
    }
}

/// Derives the speech threshold from ambient energy:
/// `max(minimum_floor, ambient_rms * speech_multiplier)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelCalibrator {
    pub speech_multiplier: f32,
    pub minimum_floor: f32,
    /// Configured silence threshold; also the speech threshold when calibration fails.
    pub static_threshold: f32,
}

impl Default for LevelCalibrator {
    fn default() -> Self {
        Self {
            speech_multiplier: 3.0,
            minimum_floor: 100.0,
            static_threshold: 500.0,
        }
    }
}

impl LevelCalibrator {
    pub fn threshold_for(&self, ambient_rms: f32) -> f32 {
        (ambient_rms * self.speech_multiplier).max(self.minimum_floor)
    }

    /// Build thresholds from a measured ambient level. Calibration wins over
    /// the static silence threshold whenever the two disagree.
    pub fn from_ambient(&self, ambient_rms: f32) -> Calibration {
        let speech = self.threshold_for(ambient_rms);
        let (silence, lowered) = if self.static_threshold > speech {
            tracing::info!(
                from = self.static_threshold,
                to = speech,
                "lowering silence threshold to calibrated speech threshold"
            );
            (speech, Some(self.static_threshold))
        } else {
            (self.static_threshold, None)
        };
        Calibration {
            ambient_rms: Some(ambient_rms),
            thresholds: Thresholds { speech, silence },
            silence_lowered_from: lowered,
        }
    }

    /// Static thresholds used when the device could not be measured.
    pub fn fallback(&self) -> Calibration {
        Calibration {
            ambient_rms: None,
            thresholds: Thresholds {
                speech: self.static_threshold,
                silence: self.static_threshold,
            },
            silence_lowered_from: None,
        }
    }

    /// Listen to `duration` of ambient audio and derive thresholds. Device
    /// failures are returned to the caller, which decides whether to fall back.
    pub fn calibrate(
        &self,
        source: &dyn CaptureSource,
        duration: Duration,
        frame_samples: usize,
    ) -> Result<Calibration, AudioError> {
        let mut stream = source.open(frame_samples)?;
        let deadline = Instant::now() + duration;
        let mut energy = 0.0f64;
        let mut count = 0usize;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match stream.recv_timeout(deadline - now) {
                Ok(frame) => {
                    for &sample in frame.samples() {
                        energy += f64::from(sample) * f64::from(sample);
                    }
                    count += frame.len();
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    if count == 0 {
                        return Err(AudioError::Disconnected);
                    }
                    break;
                }
            }
        }
        stream.stop();
        if count == 0 {
            return Err(AudioError::InvalidData(
                "no samples captured during calibration".to_string(),
            ));
        }
        let ambient = (energy / count as f64).sqrt() as f32;
        let calibration = self.from_ambient(ambient);
        tracing::info!(
            ambient_rms = ambient,
            speech_threshold = calibration.thresholds.speech,
            silence_threshold = calibration.thresholds.silence,
            "calibration complete"
        );
        Ok(calibration)
    }
}
