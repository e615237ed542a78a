//! Pipeline sequencing: listen → recognize → understand → act → speak.
//!
//! Every run owns the pipeline slot through a [`RunGuard`]. Cancellation is
//! cooperative and polled at five checkpoints; playback is the only stage
//! halted from outside. Whatever happens inside a run, the slot is released,
//! the phase returns to idle and a final status event is emitted.

mod cancel;
#[cfg(test)]
mod tests;

pub use cancel::CancelToken;

use crate::actions::ActionRegistry;
use crate::audio::{
    Calibration, PlaybackOutcome, PlaybackSink, SegmentEvent, Segmenter, Utterance,
};
use crate::engines::{BrainReply, Brain, Recognizer, Voices};
use crate::error::{AudioError, Checkpoint, PipelineError};
use crate::events::{Event, EventBus, EventCallback};
use crate::i18n::{Language, Phrase};
use crate::lock::lock_or_recover;
use crate::state::{Phase, PipelineState, RunGuard, RunId};
use crate::transcript::{clean_transcript, loggable};
use cancel::RunControl;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1500);
pub const DEFAULT_INTERRUPT_GRACE: Duration = Duration::from_secs(1);
const SLOT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interrupt the current run when new speech arrives while busy.
    pub barge_in: bool,
    /// How long push-to-talk waits for an interrupted run to let go of the slot.
    pub interrupt_grace: Duration,
    /// Deafness window for the continuous listener after the assistant spoke.
    pub cooldown: Duration,
    pub log_content: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            barge_in: true,
            interrupt_grace: DEFAULT_INTERRUPT_GRACE,
            cooldown: DEFAULT_COOLDOWN,
            log_content: false,
        }
    }
}

/// External engines a pipeline run talks to.
pub struct Collaborators {
    pub recognizer: Arc<dyn Recognizer>,
    pub brain: Arc<dyn Brain>,
    pub registry: Arc<ActionRegistry>,
    pub voices: Voices,
    pub playback: Arc<dyn PlaybackSink>,
}

/// Where a run gets its audio from.
#[derive(Debug)]
pub enum UtteranceSource {
    /// Record one bounded utterance from the segmenter.
    Microphone,
    /// Audio captured elsewhere, e.g. by the continuous listener.
    Audio(Utterance),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run spoke (or would have, if muted) this reply.
    Completed { response: String },
    NoSpeech,
    Cancelled(Checkpoint),
    Failed(String),
    /// Another run holds the slot and this request was not queued.
    Busy,
    /// Stashed as pending audio; it runs after the current run's cleanup.
    Queued,
    /// The assistant is deactivated or shutting down.
    Inactive,
}

#[derive(Default)]
struct Progress {
    spoke: bool,
}

struct Inner {
    state: Arc<PipelineState>,
    segmenter: Segmenter,
    engines: Collaborators,
    cfg: OrchestratorConfig,
    events: EventBus,
    runs: RunControl,
    pending: Mutex<Option<Utterance>>,
    muted: AtomicBool,
    calibration_announced: AtomicBool,
}

/// Cloneable handle shared by the control surface, the continuous listener
/// and per-utterance worker threads.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        state: Arc<PipelineState>,
        segmenter: Segmenter,
        engines: Collaborators,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                segmenter,
                engines,
                cfg,
                events: EventBus::default(),
                runs: RunControl::default(),
                pending: Mutex::new(None),
                muted: AtomicBool::new(false),
                calibration_announced: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.inner.state
    }

    pub fn drain_events(&self) -> Vec<Event> {
        self.inner.events.drain()
    }

    pub fn subscribe(&self, callback: EventCallback) {
        self.inner.events.subscribe(callback);
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.is_busy()
    }

    pub fn current_phase(&self) -> Phase {
        self.inner.state.current_phase()
    }

    pub fn is_continuous(&self) -> bool {
        self.inner.segmenter.is_continuous()
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        lock_or_recover(&self.inner.pending, "orchestrator.pending").is_some()
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::SeqCst);
        tracing::info!(muted, "speech output mute changed");
    }

    pub fn toggle_muted(&self) -> bool {
        let muted = !self.inner.muted.fetch_xor(true, Ordering::SeqCst);
        tracing::info!(muted, "speech output mute changed");
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    fn emit(&self, event: Event) {
        self.inner.events.emit(event);
    }

    /// Calibrate the microphone if that has not happened yet. A lowered
    /// silence threshold is announced once as a status event.
    pub fn calibrate(&self) -> Calibration {
        let calibration = self.inner.segmenter.calibrate_if_needed();
        if let Some(notice) = calibration.notice() {
            if !self.inner.calibration_announced.swap(true, Ordering::SeqCst) {
                self.emit(Event::status_detail(self.current_phase(), notice));
            }
        }
        calibration
    }

    /// Run the pipeline once on the calling thread.
    pub fn run_once(&self, source: UtteranceSource) -> RunOutcome {
        let state = &self.inner.state;
        if !state.is_running() || !state.is_active() {
            tracing::debug!("assistant inactive; ignoring run request");
            return RunOutcome::Inactive;
        }
        let (guard, source) = match state.try_start() {
            Some(guard) => (guard, source),
            None => match self.acquire_busy(source) {
                Ok(acquired) => acquired,
                Err(outcome) => return outcome,
            },
        };
        let outcome = self.run_with(guard, source);
        self.drain_pending();
        outcome
    }

    /// Push-to-talk entry point: record and process on a worker thread.
    pub fn start_pipeline_run(&self) -> std::io::Result<JoinHandle<RunOutcome>> {
        let orchestrator = self.clone();
        thread::Builder::new()
            .name("pipeline-run".to_string())
            .spawn(move || orchestrator.run_once(UtteranceSource::Microphone))
    }

    /// The slot is taken. Interrupt the holder if barge-in is enabled, then
    /// either wait briefly for the slot (microphone) or stash the audio as
    /// pending so the holder's cleanup runs it.
    fn acquire_busy(
        &self,
        source: UtteranceSource,
    ) -> Result<(RunGuard, UtteranceSource), RunOutcome> {
        match source {
            UtteranceSource::Microphone => {
                if !self.inner.cfg.barge_in {
                    tracing::debug!("pipeline busy; ignoring request");
                    return Err(RunOutcome::Busy);
                }
                self.interrupt();
                let deadline = Instant::now() + self.inner.cfg.interrupt_grace;
                loop {
                    if let Some(guard) = self.inner.state.try_start() {
                        return Ok((guard, UtteranceSource::Microphone));
                    }
                    if Instant::now() >= deadline {
                        tracing::warn!("interrupted run did not release the slot in time");
                        return Err(RunOutcome::Busy);
                    }
                    thread::sleep(SLOT_POLL);
                }
            }
            UtteranceSource::Audio(utterance) => {
                if self.inner.cfg.barge_in {
                    self.interrupt();
                }
                let replaced = lock_or_recover(&self.inner.pending, "orchestrator.pending")
                    .replace(utterance)
                    .is_some();
                tracing::info!(replaced, "pipeline busy; utterance queued as pending");
                // The holder may have finished before the stash landed.
                match self.take_pending_run() {
                    Some((guard, utterance)) => Ok((guard, UtteranceSource::Audio(utterance))),
                    None => Err(RunOutcome::Queued),
                }
            }
        }
    }

    /// Claim the slot and the pending utterance together, so a concurrent
    /// releaser and a concurrent stasher cannot both miss it.
    fn take_pending_run(&self) -> Option<(RunGuard, Utterance)> {
        let mut pending = lock_or_recover(&self.inner.pending, "orchestrator.pending");
        pending.as_ref()?;
        let guard = self.inner.state.try_start()?;
        let utterance = pending.take()?;
        Some((guard, utterance))
    }

    fn drain_pending(&self) {
        while let Some((guard, utterance)) = self.take_pending_run() {
            tracing::info!(run = %guard.id(), "running pending utterance");
            self.run_with(guard, UtteranceSource::Audio(utterance));
        }
    }

    /// Execute one run while holding `guard`; always releases it.
    fn run_with(&self, guard: RunGuard, source: UtteranceSource) -> RunOutcome {
        let run = guard.id();
        let token = self.inner.runs.begin(run);
        let mut progress = Progress::default();
        tracing::info!(%run, "pipeline run started");

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.stages(&guard, &token, source, &mut progress)
        }));
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(PipelineError::Cancelled(at))) => {
                tracing::info!(%run, checkpoint = at.label(), "run cancelled");
                RunOutcome::Cancelled(at)
            }
            Ok(Err(err)) => {
                tracing::error!(%run, error = %err, "pipeline run failed");
                self.emit(Event::error(err.to_string()));
                RunOutcome::Failed(err.to_string())
            }
            Err(_) => {
                tracing::error!(%run, "pipeline run panicked");
                let message = "internal error during pipeline run".to_string();
                self.emit(Event::error(message.clone()));
                RunOutcome::Failed(message)
            }
        };

        self.inner.runs.finish(run);
        if progress.spoke && self.inner.segmenter.is_continuous() {
            self.inner.segmenter.set_cooldown(self.inner.cfg.cooldown);
        }
        let owned = guard.is_current();
        drop(guard);
        if owned {
            self.emit(Event::status(Phase::Idle));
        } else {
            tracing::warn!(%run, "run finished after losing the slot");
        }
        tracing::info!(%run, outcome = ?outcome, "pipeline run finished");
        outcome
    }

    fn enter(&self, guard: &RunGuard, phase: Phase) {
        guard.set_phase(phase);
        if guard.is_current() {
            self.emit(Event::status(phase));
        }
    }

    fn checkpoint(
        &self,
        guard: &RunGuard,
        token: &CancelToken,
        at: Checkpoint,
    ) -> Result<(), PipelineError> {
        if token.is_cancelled() || !guard.is_current() {
            return Err(PipelineError::Cancelled(at));
        }
        Ok(())
    }

    fn stages(
        &self,
        guard: &RunGuard,
        token: &CancelToken,
        source: UtteranceSource,
        progress: &mut Progress,
    ) -> Result<RunOutcome, PipelineError> {
        let inner = &self.inner;
        let log_content = inner.cfg.log_content;
        let language = inner.state.language();

        self.enter(guard, Phase::Listening);
        let utterance = match source {
            UtteranceSource::Audio(utterance) => Some(utterance),
            UtteranceSource::Microphone => {
                self.calibrate();
                inner.segmenter.record(token.flag())?
            }
        };
        self.checkpoint(guard, token, Checkpoint::Recognition)?;
        let Some(utterance) = utterance else {
            tracing::info!("no speech captured");
            return Ok(RunOutcome::NoSpeech);
        };

        self.enter(guard, Phase::Processing);
        let started = Instant::now();
        let text = match inner.engines.recognizer.transcribe(&utterance, language) {
            Ok(transcription) => {
                tracing::debug!(confidence = transcription.confidence, "recognized");
                clean_transcript(&transcription.text)
            }
            Err(err) => {
                tracing::warn!(error = %err, "recognition failed; treating as no speech");
                String::new()
            }
        };
        tracing::info!(
            stt_ms = started.elapsed().as_millis() as u64,
            audio_ms = utterance.duration().as_millis() as u64,
            text = %loggable(&text, log_content),
            "recognition finished"
        );
        drop(utterance);
        if text.is_empty() {
            return Ok(RunOutcome::NoSpeech);
        }
        self.emit(Event::user_text(text.clone(), language));

        self.checkpoint(guard, token, Checkpoint::Understanding)?;
        let reply = inner
            .engines
            .brain
            .process(&text, language)
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "understanding failed; using fallback reply");
                BrainReply::fallback(&err, language)
            });
        tracing::info!(
            action = reply.command.as_ref().map(|c| c.action.as_str()).unwrap_or("-"),
            conversational = reply.is_conversational,
            reply = %loggable(&reply.response_text, log_content),
            "understanding finished"
        );

        let mut response = reply.response_text.clone();
        if let Some(command) = reply.actionable() {
            self.checkpoint(guard, token, Checkpoint::Action)?;
            let outcome = inner.engines.registry.execute(&command.action, &command.params);
            tracing::info!(
                action = %command.action,
                success = outcome.success,
                message = %loggable(&outcome.message, log_content),
                "action dispatched"
            );
            match outcome.speech(language) {
                Some(speech) => response = speech.to_string(),
                None if !outcome.success => {
                    response = Phrase::ActionFailed.text(language).to_string();
                }
                None => {}
            }
        }

        if response.trim().is_empty() {
            return Ok(RunOutcome::Completed { response });
        }
        self.emit(Event::response_text(response.clone(), language));

        self.checkpoint(guard, token, Checkpoint::Synthesis)?;
        self.enter(guard, Phase::Speaking);
        if self.is_muted() {
            tracing::debug!("muted; skipping speech output");
            return Ok(RunOutcome::Completed { response });
        }
        progress.spoke = self.say(&response, language, guard, token)?;
        Ok(RunOutcome::Completed { response })
    }

    /// Synthesize and play `text`, returning whether any audio reached the
    /// speaker. Synthesis and playback failures are logged and swallowed;
    /// only a cancellation comes back as an error.
    fn say(
        &self,
        text: &str,
        language: Language,
        guard: &RunGuard,
        token: &CancelToken,
    ) -> Result<bool, PipelineError> {
        let playback = &self.inner.engines.playback;
        let audio = match self.inner.engines.voices.for_language(language).synthesize(text) {
            Ok(audio) => audio,
            Err(err) => {
                tracing::warn!(error = %err, %language, "speech synthesis failed");
                return Ok(false);
            }
        };
        if let Err(cancelled) = self.checkpoint(guard, token, Checkpoint::Playback) {
            playback.stop();
            return Err(cancelled);
        }
        if audio.is_empty() {
            tracing::debug!(%language, "synthesizer returned no audio");
            return Ok(false);
        }
        // The run's cancel flag covers an interrupt that lands between the
        // checkpoint above and the sink taking its stop generation.
        match playback.play(&audio, token.flag()) {
            Ok(PlaybackOutcome::TimedOut) => tracing::warn!("playback timed out; forced stop"),
            Ok(outcome) => tracing::debug!(?outcome, "playback finished"),
            Err(err) => tracing::warn!(error = %err, "playback failed"),
        }
        playback.stop();
        Ok(true)
    }

    /// Speak `text` outside of a voice command, e.g. a greeting. Returns
    /// false when a run is in progress.
    pub fn speak(&self, text: &str, language: Option<Language>) -> bool {
        let Some(guard) = self.inner.state.try_start() else {
            tracing::debug!("pipeline busy; not speaking");
            return false;
        };
        let language = language.unwrap_or_else(|| self.inner.state.language());
        let token = self.inner.runs.begin(guard.id());
        self.enter(&guard, Phase::Speaking);
        if !self.is_muted() {
            match self.say(text, language, &guard, &token) {
                Ok(true) if self.inner.segmenter.is_continuous() => {
                    self.inner.segmenter.set_cooldown(self.inner.cfg.cooldown);
                }
                Ok(_) => {}
                Err(PipelineError::Cancelled(at)) => tracing::info!(
                    run = %guard.id(),
                    checkpoint = at.label(),
                    "speech cancelled"
                ),
                Err(err) => tracing::warn!(run = %guard.id(), error = %err, "speech failed"),
            }
        }
        self.inner.runs.finish(guard.id());
        drop(guard);
        self.emit(Event::status(Phase::Idle));
        self.drain_pending();
        true
    }

    /// Cancel the active run and halt any playback or recording right away.
    pub fn interrupt(&self) -> Option<RunId> {
        let run = self.inner.runs.cancel_current();
        self.inner.engines.playback.stop();
        match run {
            Some(run) => tracing::info!(%run, "interrupt requested"),
            None => tracing::debug!("interrupt requested with no active run"),
        }
        run
    }

    /// Start always-on listening. Each detected utterance is processed on
    /// its own thread.
    pub fn start_continuous(&self) -> Result<(), AudioError> {
        self.calibrate();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner
            .segmenter
            .start_continuous(Box::new(move |event| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let orchestrator = Orchestrator { inner };
                match event {
                    SegmentEvent::Utterance(utterance) => orchestrator.dispatch(utterance),
                    SegmentEvent::Failed(err) => {
                        orchestrator.emit(Event::error(format!(
                            "continuous listening stopped: {err}"
                        )));
                    }
                }
            }))?;
        tracing::info!("continuous listening started");
        self.emit(Event::status_detail(
            self.current_phase(),
            "continuous listening started",
        ));
        Ok(())
    }

    pub fn stop_continuous(&self) {
        if !self.inner.segmenter.is_continuous() {
            return;
        }
        self.inner.segmenter.stop_continuous();
        self.emit(Event::status_detail(
            self.current_phase(),
            "continuous listening stopped",
        ));
    }

    fn dispatch(&self, utterance: Utterance) {
        if !self.inner.state.is_active() {
            tracing::debug!("assistant inactive; dropping detected speech");
            return;
        }
        let orchestrator = self.clone();
        let spawned = thread::Builder::new()
            .name("pipeline-run".to_string())
            .spawn(move || {
                orchestrator.run_once(UtteranceSource::Audio(utterance));
            });
        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to spawn pipeline run");
        }
    }

    /// Clear stale busy flags and make sure the assistant listens again.
    pub fn reactivate(&self) {
        self.inner.state.force_reset();
        self.inner.state.set_active(true);
        self.emit(Event::status_detail(Phase::Idle, "reactivated"));
    }

    pub fn shutdown(&self) {
        tracing::info!("shutting down assistant");
        self.inner.state.shutdown();
        self.inner.segmenter.stop_continuous();
        self.interrupt();
        lock_or_recover(&self.inner.pending, "orchestrator.pending").take();
        self.emit(Event::status_detail(Phase::Idle, "shutdown"));
    }
}
