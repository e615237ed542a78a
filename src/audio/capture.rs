//! Segmentation state machine shared by bounded and continuous capture.
//!
//! Tracks frame, speech and trailing-silence counts and decides when an
//! utterance ends. The continuous detector layers the pre-roll ring and the
//! post-speech cooldown on top of the same core.

use super::frame::{AudioFrame, Utterance};
use super::ring::SegmentBuffer;
use super::vad::{classify, FrameLabel, SegmenterConfig};
use std::time::Instant;

/// Metrics collected during one capture for observability and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureMetrics {
    pub capture_ms: u64,
    pub frames_processed: usize,
    pub speech_frames: usize,
    pub silence_tail_frames: usize,
    pub frames_dropped: usize,
    pub stop_reason: StopReason,
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self {
            capture_ms: 0,
            frames_processed: 0,
            speech_frames: 0,
            silence_tail_frames: 0,
            frames_dropped: 0,
            stop_reason: StopReason::MaxFrames,
        }
    }
}

/// Explains why capture stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    TrailingSilence { frames: usize },
    MaxFrames,
    ManualStop,
    Timeout,
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::TrailingSilence { .. } => "trailing_silence",
            StopReason::MaxFrames => "max_frames",
            StopReason::ManualStop => "manual_stop",
            StopReason::Timeout => "timeout",
        }
    }
}

/// Frame counters for one utterance in progress.
///
/// Silence only ends a capture after speech has been heard, so a recording
/// started in a quiet room keeps waiting until `max_frames`.
#[derive(Debug, Clone)]
pub(crate) struct SegmentState {
    silence_frames: usize,
    max_frames: usize,
    frames: usize,
    speech: usize,
    silence_streak: usize,
}

impl SegmentState {
    pub(crate) fn new(cfg: &SegmenterConfig) -> Self {
        Self {
            silence_frames: cfg.silence_frames(),
            max_frames: cfg.max_frames(),
            frames: 0,
            speech: 0,
            silence_streak: 0,
        }
    }

    /// State right after onset detection: the pre-roll counts toward the
    /// frame total and the trigger frame is the first speech frame.
    pub(crate) fn seeded(cfg: &SegmenterConfig, frames: usize) -> Self {
        Self {
            frames,
            speech: 1,
            ..Self::new(cfg)
        }
    }

    pub(crate) fn on_frame(&mut self, label: FrameLabel) -> Option<StopReason> {
        self.frames = self.frames.saturating_add(1);
        match label {
            FrameLabel::Speech => {
                self.speech = self.speech.saturating_add(1);
                self.silence_streak = 0;
            }
            FrameLabel::Silence => {
                self.silence_streak = self.silence_streak.saturating_add(1);
            }
        }
        self.check()
    }

    /// Account for a poll that produced no frame.
    pub(crate) fn on_timeout(&mut self, idle_frames: usize) -> Option<StopReason> {
        self.frames = self.frames.saturating_add(idle_frames);
        if self.frames >= self.max_frames {
            Some(StopReason::Timeout)
        } else {
            None
        }
    }

    fn check(&self) -> Option<StopReason> {
        if self.speech > 0 && self.silence_streak >= self.silence_frames {
            return Some(StopReason::TrailingSilence {
                frames: self.silence_streak,
            });
        }
        if self.frames >= self.max_frames {
            return Some(StopReason::MaxFrames);
        }
        None
    }

    pub(crate) fn has_speech(&self) -> bool {
        self.speech > 0
    }

    pub(crate) fn meets_minimum(&self, min_speech_frames: usize) -> bool {
        self.has_speech() && self.speech >= min_speech_frames
    }

    pub(crate) fn frames(&self) -> usize {
        self.frames
    }

    pub(crate) fn speech_frames(&self) -> usize {
        self.speech
    }

    pub(crate) fn silence_tail(&self) -> usize {
        self.silence_streak
    }
}

struct Recording {
    frames: Vec<AudioFrame>,
    state: SegmentState,
}

/// Always-on detector: keeps a pre-roll ring while waiting, records once a
/// frame crosses the speech threshold and yields finished utterances.
pub(crate) struct ContinuousDetector {
    cfg: SegmenterConfig,
    threshold: f32,
    ring: SegmentBuffer,
    recording: Option<Recording>,
}

impl ContinuousDetector {
    pub(crate) fn new(cfg: &SegmenterConfig, threshold: f32) -> Self {
        Self {
            cfg: cfg.clone(),
            threshold,
            ring: SegmentBuffer::new(cfg.pre_roll_frames()),
            recording: None,
        }
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Feed one frame. `cooldown_until` suppresses frames (and any partial
    /// recording) while the assistant's own voice may still be audible.
    pub(crate) fn push(
        &mut self,
        frame: AudioFrame,
        now: Instant,
        cooldown_until: Option<Instant>,
    ) -> Option<Utterance> {
        if cooldown_until.is_some_and(|until| now < until) {
            self.ring.clear();
            if self.recording.take().is_some() {
                tracing::debug!("dropping partial utterance during cooldown");
            }
            return None;
        }

        let label = classify(frame.rms(), self.threshold);
        match self.recording.as_mut() {
            None => {
                self.ring.push(frame);
                if label == FrameLabel::Speech {
                    let frames = self.ring.take_all();
                    tracing::debug!(
                        pre_roll_frames = frames.len(),
                        threshold = self.threshold,
                        "speech onset detected"
                    );
                    let state = SegmentState::seeded(&self.cfg, frames.len());
                    if let Some(reason) = state.check() {
                        return self.finish(frames, state, reason);
                    }
                    self.recording = Some(Recording { frames, state });
                }
                None
            }
            Some(recording) => {
                recording.frames.push(frame);
                let reason = recording.state.on_frame(label)?;
                let Recording { frames, state } = self.recording.take()?;
                self.finish(frames, state, reason)
            }
        }
    }

    fn finish(
        &mut self,
        frames: Vec<AudioFrame>,
        state: SegmentState,
        reason: StopReason,
    ) -> Option<Utterance> {
        if !state.meets_minimum(self.cfg.min_speech_frames()) {
            tracing::debug!(
                speech_frames = state.speech_frames(),
                reason = reason.label(),
                "utterance too short; ignoring"
            );
            return None;
        }
        let utterance = Utterance::from_frames(frames, self.cfg.sample_rate);
        tracing::info!(
            duration_ms = utterance.duration().as_millis() as u64,
            speech_frames = state.speech_frames(),
            reason = reason.label(),
            "speech ended"
        );
        Some(utterance)
    }
}

/// Result of running the bounded segmenter over a finished capture.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub utterance: Option<Utterance>,
    pub metrics: CaptureMetrics,
}

/// Run bounded segmentation over in-memory PCM, stopping at the first
/// utterance end.
pub fn segment_pcm(
    samples: &[i16],
    cfg: &SegmenterConfig,
    silence_threshold: f32,
) -> CaptureResult {
    let frame_samples = cfg.frame_samples();
    let mut state = SegmentState::new(cfg);
    let mut frames = Vec::new();
    let mut metrics = CaptureMetrics::default();
    let mut stop_reason = StopReason::MaxFrames;

    for chunk in samples.chunks(frame_samples) {
        let mut data = chunk.to_vec();
        data.resize(frame_samples, 0);
        let frame = AudioFrame::new(data);
        let label = classify(frame.rms(), silence_threshold);
        frames.push(frame);
        metrics.frames_processed += 1;
        if let Some(reason) = state.on_frame(label) {
            stop_reason = reason;
            break;
        }
    }
    finish_bounded(frames, &state, stop_reason, cfg, metrics)
}

/// Cut a whole recording into utterances by running bounded segmentation
/// back to back until the samples run out.
pub fn segment_all(
    samples: &[i16],
    cfg: &SegmenterConfig,
    silence_threshold: f32,
) -> Vec<Utterance> {
    let frame_samples = cfg.frame_samples().max(1);
    let mut utterances = Vec::new();
    let mut offset = 0;
    while offset < samples.len() {
        let result = segment_pcm(&samples[offset..], cfg, silence_threshold);
        let consumed = result.metrics.frames_processed * frame_samples;
        if consumed == 0 {
            break;
        }
        offset += consumed;
        utterances.extend(result.utterance);
    }
    utterances
}

/// Shared tail of bounded capture: fill metrics and decide whether the
/// frames amount to an utterance.
pub(crate) fn finish_bounded(
    frames: Vec<AudioFrame>,
    state: &SegmentState,
    stop_reason: StopReason,
    cfg: &SegmenterConfig,
    mut metrics: CaptureMetrics,
) -> CaptureResult {
    metrics.speech_frames = state.speech_frames();
    metrics.silence_tail_frames = state.silence_tail();
    metrics.capture_ms = (state.frames() as u64).saturating_mul(cfg.frame_ms);
    metrics.stop_reason = stop_reason;

    let utterance = if frames.is_empty() || !state.meets_minimum(cfg.min_speech_frames()) {
        None
    } else {
        Some(Utterance::from_frames(frames, cfg.sample_rate))
    };
    CaptureResult { utterance, metrics }
}
