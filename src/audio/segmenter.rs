//! Turns a capture source into utterances, either on demand (bounded) or from
//! an always-on background listener (continuous).

use super::calibrate::{Calibration, LevelCalibrator};
use super::capture::{
    finish_bounded, CaptureMetrics, CaptureResult, ContinuousDetector, SegmentState, StopReason,
};
use super::frame::Utterance;
use super::source::CaptureSource;
use super::vad::{classify, SegmenterConfig};
use crate::error::AudioError;
use crate::lock::lock_or_recover;
use crossbeam_channel::RecvTimeoutError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What the continuous listener hands to its callback.
#[derive(Debug)]
pub enum SegmentEvent {
    Utterance(Utterance),
    /// The capture stream failed; the listener has exited and will not retry.
    Failed(AudioError),
}

pub type SegmentCallback = Box<dyn FnMut(SegmentEvent) + Send + 'static>;

struct Listener {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct Inner {
    source: Arc<dyn CaptureSource>,
    cfg: SegmenterConfig,
    calibrator: LevelCalibrator,
    calibration: Mutex<Option<Calibration>>,
    listener: Mutex<Option<Listener>>,
    listening: Arc<AtomicBool>,
    cooldown_until: Arc<Mutex<Option<Instant>>>,
}

/// Cloneable handle to the segmentation engine.
#[derive(Clone)]
pub struct Segmenter {
    inner: Arc<Inner>,
}

impl Segmenter {
    pub fn new(
        source: Arc<dyn CaptureSource>,
        cfg: SegmenterConfig,
        calibrator: LevelCalibrator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cfg,
                calibrator,
                calibration: Mutex::new(None),
                listener: Mutex::new(None),
                listening: Arc::new(AtomicBool::new(false)),
                cooldown_until: Arc::new(Mutex::new(None)),
            }),
        }
    }

    /// Skip measurement and use the given calibration.
    pub fn with_calibration(self, calibration: Calibration) -> Self {
        *lock_or_recover(&self.inner.calibration, "segmenter.calibration") = Some(calibration);
        self
    }

    /// Calibrate on first use; later calls return the stored result. A
    /// device failure falls back to the static threshold.
    pub fn calibrate_if_needed(&self) -> Calibration {
        let mut slot = lock_or_recover(&self.inner.calibration, "segmenter.calibration");
        if let Some(calibration) = slot.as_ref() {
            return calibration.clone();
        }
        let calibration = self.measure();
        *slot = Some(calibration.clone());
        calibration
    }

    fn measure(&self) -> Calibration {
        let cfg = &self.inner.cfg;
        tracing::info!(
            duration_ms = cfg.calibration_ms,
            source = %self.inner.source.name(),
            "calibrating microphone"
        );
        match self.inner.calibrator.calibrate(
            self.inner.source.as_ref(),
            cfg.calibration_duration(),
            cfg.frame_samples(),
        ) {
            Ok(calibration) => calibration,
            Err(err) => {
                tracing::warn!(error = %err, "calibration failed; using configured threshold");
                self.inner.calibrator.fallback()
            }
        }
    }

    /// Record one utterance, returning `None` when nothing long enough was said.
    pub fn record(&self, stop: &AtomicBool) -> Result<Option<Utterance>, AudioError> {
        self.record_with_metrics(stop).map(|result| result.utterance)
    }

    /// Bounded capture: stops after trailing silence, at the frame cap, or
    /// when `stop` is raised. A device failure aborts with an error.
    pub fn record_with_metrics(&self, stop: &AtomicBool) -> Result<CaptureResult, AudioError> {
        let cfg = &self.inner.cfg;
        let threshold = self.calibrate_if_needed().thresholds.silence;
        let mut stream = self.inner.source.open(cfg.frame_samples())?;
        let poll = cfg.poll_timeout();
        let idle_frames = (cfg.poll_timeout_ms / cfg.frame_ms.max(1)).max(1) as usize;

        let mut state = SegmentState::new(cfg);
        let mut frames = Vec::new();
        let mut metrics = CaptureMetrics::default();
        let mut stop_reason = StopReason::MaxFrames;
        tracing::info!(threshold, "recording");

        loop {
            if stop.load(Ordering::Relaxed) {
                stop_reason = StopReason::ManualStop;
                break;
            }
            match stream.recv_timeout(poll) {
                Ok(frame) => {
                    let label = classify(frame.rms(), threshold);
                    frames.push(frame);
                    metrics.frames_processed += 1;
                    if let Some(reason) = state.on_frame(label) {
                        stop_reason = reason;
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(reason) = state.on_timeout(idle_frames) {
                        stop_reason = reason;
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    stream.stop();
                    tracing::warn!(frames = frames.len(), "capture stream disconnected");
                    return Err(AudioError::Disconnected);
                }
            }
        }
        metrics.frames_dropped = stream.frames_dropped();
        stream.stop();

        let result = finish_bounded(frames, &state, stop_reason, cfg, metrics);
        let m = &result.metrics;
        tracing::info!(
            capture_ms = m.capture_ms,
            frames = m.frames_processed,
            speech_frames = m.speech_frames,
            silence_tail_frames = m.silence_tail_frames,
            dropped = m.frames_dropped,
            stop_reason = m.stop_reason.label(),
            has_utterance = result.utterance.is_some(),
            "capture finished"
        );
        Ok(result)
    }

    /// Start the background listener. The stream is opened before returning
    /// so device errors surface to the caller. Calling it while already
    /// running is a no-op.
    pub fn start_continuous(&self, callback: SegmentCallback) -> Result<(), AudioError> {
        let mut listener = lock_or_recover(&self.inner.listener, "segmenter.listener");
        if listener.is_some() && self.inner.listening.load(Ordering::SeqCst) {
            tracing::debug!("continuous listening already active");
            return Ok(());
        }
        if let Some(stale) = listener.take() {
            stale.stop.store(true, Ordering::SeqCst);
            let _ = stale.thread.join();
        }

        let cfg = self.inner.cfg.clone();
        let speech_threshold = self.calibrate_if_needed().thresholds.speech;
        let mut stream = self.inner.source.open(cfg.frame_samples())?;
        let stop = Arc::new(AtomicBool::new(false));
        let listening = self.inner.listening.clone();
        let cooldown = self.inner.cooldown_until.clone();
        listening.store(true, Ordering::SeqCst);

        let thread_stop = stop.clone();
        let thread_listening = listening.clone();
        let mut callback = callback;
        let spawn = thread::Builder::new()
            .name("continuous-listener".to_string())
            .spawn(move || {
                tracing::info!(speech_threshold, "continuous listener waiting for speech");
                let mut detector = ContinuousDetector::new(&cfg, speech_threshold);
                let poll = cfg.poll_timeout();
                while !thread_stop.load(Ordering::SeqCst) {
                    match stream.recv_timeout(poll) {
                        Ok(frame) => {
                            let until = *lock_or_recover(&cooldown, "segmenter.cooldown");
                            if let Some(utterance) = detector.push(frame, Instant::now(), until) {
                                deliver(&mut callback, SegmentEvent::Utterance(utterance));
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            tracing::error!("continuous capture stream disconnected");
                            deliver(&mut callback, SegmentEvent::Failed(AudioError::Disconnected));
                            break;
                        }
                    }
                }
                stream.stop();
                thread_listening.store(false, Ordering::SeqCst);
                tracing::info!("continuous listener exited");
            });
        match spawn {
            Ok(thread) => {
                *listener = Some(Listener { stop, thread });
                Ok(())
            }
            Err(err) => {
                listening.store(false, Ordering::SeqCst);
                Err(AudioError::Device(format!(
                    "failed to spawn continuous listener: {err}"
                )))
            }
        }
    }

    /// Stop the background listener and wait for it to release the device.
    /// Safe to call when not running, and from inside the listener callback.
    pub fn stop_continuous(&self) {
        let taken = lock_or_recover(&self.inner.listener, "segmenter.listener").take();
        let Some(listener) = taken else {
            return;
        };
        listener.stop.store(true, Ordering::SeqCst);
        if listener.thread.thread().id() == thread::current().id() {
            return;
        }
        if listener.thread.join().is_err() {
            tracing::warn!("continuous listener panicked");
        }
        self.inner.listening.store(false, Ordering::SeqCst);
        tracing::info!("continuous listening stopped");
    }

    pub fn is_continuous(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    /// Ignore incoming audio for `duration` so the listener does not pick up
    /// the assistant's own reply.
    pub fn set_cooldown(&self, duration: Duration) {
        *lock_or_recover(&self.inner.cooldown_until, "segmenter.cooldown") =
            Some(Instant::now() + duration);
    }
}

fn deliver(callback: &mut SegmentCallback, event: SegmentEvent) {
    if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        tracing::error!("segment callback panicked");
    }
}
