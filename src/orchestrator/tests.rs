use super::*;
use crate::actions::register_conversation_actions;
use crate::audio::{
    wait_for_playback, AudioFrame, Calibration, LevelCalibrator, ScriptedSource,
    SegmenterConfig, SpeechAudio, StopSignal, Thresholds,
};
use crate::engines::{Command, Synthesizer, Transcription};
use crate::events::{EventKind, EventPayload};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::AtomicUsize;

const SPEECH: i16 = 500;
const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> SegmenterConfig {
    SegmenterConfig {
        sample_rate: 1_000,
        frame_ms: 10,
        silence_duration_ms: 30,
        max_recording_ms: 100,
        min_speech_ms: 20,
        pre_roll_ms: 30,
        calibration_ms: 50,
        poll_timeout_ms: 20,
        channel_capacity: 16,
    }
}

fn fixed_calibration() -> Calibration {
    Calibration {
        ambient_rms: Some(10.0),
        thresholds: Thresholds {
            speech: 100.0,
            silence: 100.0,
        },
        silence_lowered_from: None,
    }
}

fn script(parts: &[(i16, usize)]) -> Vec<AudioFrame> {
    parts
        .iter()
        .flat_map(|&(value, count)| (0..count).map(move |_| AudioFrame::filled(10, value)))
        .collect()
}

fn utterance(marker: i16) -> Utterance {
    Utterance::from_samples(vec![marker; 100], 1_000)
}

enum Heard {
    Marker,
    Fixed(&'static str),
    Fail,
}

struct Gate {
    entered: Sender<i16>,
    release: Receiver<()>,
}

struct FakeRecognizer {
    heard: Heard,
    gate: Mutex<Option<Gate>>,
    calls: Mutex<Vec<i16>>,
}

impl FakeRecognizer {
    fn new(heard: Heard) -> Self {
        Self {
            heard,
            gate: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Block the first transcription until the returned sender fires.
    fn gated(heard: Heard) -> (Self, Receiver<i16>, Sender<()>) {
        let (entered, entered_rx) = unbounded();
        let (release_tx, release) = bounded(1);
        let recognizer = Self::new(heard);
        *recognizer.gate.lock().unwrap() = Some(Gate { entered, release });
        (recognizer, entered_rx, release_tx)
    }

    fn calls(&self) -> Vec<i16> {
        self.calls.lock().unwrap().clone()
    }
}

impl Recognizer for FakeRecognizer {
    fn transcribe(
        &self,
        utterance: &Utterance,
        _language: Language,
    ) -> Result<Transcription, PipelineError> {
        let marker = utterance.peak();
        self.calls.lock().unwrap().push(marker);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(marker);
            let _ = gate.release.recv_timeout(WAIT);
        }
        match self.heard {
            Heard::Marker => Ok(Transcription::new(format!("command {marker}"), 0.9)),
            Heard::Fixed(text) => Ok(Transcription::new(text, 0.5)),
            Heard::Fail => Err(PipelineError::Recognition("model crashed".into())),
        }
    }
}

enum Understands {
    Echo,
    Run(Command),
    Unreachable,
    Panic,
}

struct FakeBrain {
    mode: Understands,
    calls: Mutex<Vec<String>>,
}

impl FakeBrain {
    fn new(mode: Understands) -> Self {
        Self {
            mode,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Brain for FakeBrain {
    fn process(&self, text: &str, _language: Language) -> Result<BrainReply, PipelineError> {
        self.calls.lock().unwrap().push(text.to_string());
        match &self.mode {
            Understands::Echo => Ok(BrainReply::conversational(format!("you said {text}"))),
            Understands::Run(command) => Ok(BrainReply::command(command.clone(), "on it")),
            Understands::Unreachable => Err(PipelineError::BackendUnavailable(
                "connection refused".into(),
            )),
            Understands::Panic => panic!("brain bug"),
        }
    }
}

struct Tone;

impl Synthesizer for Tone {
    fn synthesize(&mut self, text: &str) -> Result<SpeechAudio, PipelineError> {
        Ok(SpeechAudio::pcm16(&vec![1_000; text.len()], 16_000))
    }
}

struct Broken;

impl Synthesizer for Broken {
    fn synthesize(&mut self, _text: &str) -> Result<SpeechAudio, PipelineError> {
        Err(PipelineError::BackendUnavailable("no voice installed".into()))
    }
}

#[derive(Default)]
struct FakePlayback {
    blocking: bool,
    played: Mutex<Vec<usize>>,
    stops: AtomicUsize,
    signal: StopSignal,
    started: Mutex<Option<Sender<()>>>,
    /// Hold the sink before it takes its stop generation.
    hold: Mutex<Option<Receiver<()>>>,
}

impl FakePlayback {
    fn blocking() -> (Self, Receiver<()>) {
        let (tx, rx) = unbounded();
        let playback = Self {
            blocking: true,
            started: Mutex::new(Some(tx)),
            ..Self::default()
        };
        (playback, rx)
    }

    /// Like `blocking`, but the sink waits for the returned sender before it
    /// starts listening for `stop()`.
    fn late_start() -> (Self, Receiver<()>, Sender<()>) {
        let (playback, started) = Self::blocking();
        let (go, hold) = bounded(1);
        *playback.hold.lock().unwrap() = Some(hold);
        (playback, started, go)
    }

    fn plays(&self) -> usize {
        self.played.lock().unwrap().len()
    }
}

impl PlaybackSink for FakePlayback {
    fn play(
        &self,
        audio: &SpeechAudio,
        cancel: &AtomicBool,
    ) -> Result<PlaybackOutcome, AudioError> {
        self.played.lock().unwrap().push(audio.bytes.len());
        if !self.blocking {
            return Ok(PlaybackOutcome::Finished);
        }
        if let Some(tx) = self.started.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
        let hold = self.hold.lock().unwrap().take();
        if let Some(hold) = hold {
            let _ = hold.recv_timeout(WAIT);
        }
        let token = self.signal.begin();
        let never = AtomicBool::new(false);
        Ok(wait_for_playback(
            &never,
            &self.signal,
            token,
            cancel,
            WAIT,
            Duration::from_millis(5),
        ))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.signal.stop();
    }
}

struct Harness {
    orchestrator: Orchestrator,
    state: Arc<PipelineState>,
    recognizer: Arc<FakeRecognizer>,
    brain: Arc<FakeBrain>,
    playback: Arc<FakePlayback>,
}

struct Setup {
    source: ScriptedSource,
    calibration: Option<Calibration>,
    recognizer: FakeRecognizer,
    brain: FakeBrain,
    playback: FakePlayback,
    voice: fn() -> Box<dyn Synthesizer>,
    cfg: OrchestratorConfig,
    state: PipelineState,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            source: ScriptedSource::new(1_000),
            calibration: Some(fixed_calibration()),
            recognizer: FakeRecognizer::new(Heard::Marker),
            brain: FakeBrain::new(Understands::Echo),
            playback: FakePlayback::default(),
            voice: || Box::new(Tone),
            cfg: OrchestratorConfig {
                interrupt_grace: Duration::from_millis(500),
                ..OrchestratorConfig::default()
            },
            state: PipelineState::default(),
        }
    }
}

impl Setup {
    fn build(self) -> Harness {
        let state = Arc::new(self.state);
        let segmenter = Segmenter::new(
            Arc::new(self.source),
            test_config(),
            LevelCalibrator::default(),
        );
        let segmenter = match self.calibration {
            Some(calibration) => segmenter.with_calibration(calibration),
            None => segmenter,
        };
        let registry = Arc::new(
            register_conversation_actions(ActionRegistry::builder(), state.clone()).build(),
        );
        let recognizer = Arc::new(self.recognizer);
        let brain = Arc::new(self.brain);
        let playback = Arc::new(self.playback);
        let voices =
            Voices::spawn((self.voice)(), (self.voice)(), Duration::from_secs(1)).expect("voices");
        let orchestrator = Orchestrator::new(
            state.clone(),
            segmenter,
            Collaborators {
                recognizer: recognizer.clone(),
                brain: brain.clone(),
                registry,
                voices,
                playback: playback.clone(),
            },
            self.cfg,
        );
        Harness {
            orchestrator,
            state,
            recognizer,
            brain,
            playback,
        }
    }
}

fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(Event::kind).collect()
}

fn statuses(events: &[Event]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            EventPayload::Status {
                state,
                detail: None,
            } => Some(*state),
            _ => None,
        })
        .collect()
}

fn is_final_idle(event: &Event) -> bool {
    matches!(
        event.payload,
        EventPayload::Status {
            state: Phase::Idle,
            detail: None
        }
    )
}

fn wait_for_final_idle(rx: &Receiver<Event>) {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if let Ok(event) = rx.recv_timeout(Duration::from_millis(50)) {
            if is_final_idle(&event) {
                return;
            }
        }
    }
    panic!("run never returned to idle");
}

fn subscribe(orchestrator: &Orchestrator) -> Receiver<Event> {
    let (tx, rx) = unbounded();
    orchestrator.subscribe(Box::new(move |event| {
        let _ = tx.send(event.clone());
    }));
    rx
}

#[test]
fn audio_run_walks_every_stage_and_ends_idle() {
    let h = Setup::default().build();
    let outcome = h.orchestrator.run_once(UtteranceSource::Audio(utterance(7)));
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            response: "you said command 7".into()
        }
    );
    let events = h.orchestrator.drain_events();
    assert_eq!(
        statuses(&events),
        [Phase::Listening, Phase::Processing, Phase::Speaking, Phase::Idle]
    );
    assert_eq!(
        kinds(&events),
        [
            EventKind::Status,
            EventKind::Status,
            EventKind::UserText,
            EventKind::ResponseText,
            EventKind::Status,
            EventKind::Status,
        ]
    );
    assert_eq!(h.playback.plays(), 1);
    assert!(h.playback.stops.load(Ordering::SeqCst) >= 1);
    assert_eq!(h.state.current_phase(), Phase::Idle);
    assert!(h.state.holder().is_none());
}

#[test]
fn successful_action_speech_replaces_reply() {
    let h = Setup {
        brain: FakeBrain::new(Understands::Run(Command::new("switch_language"))),
        ..Setup::default()
    }
    .build();
    let outcome = h.orchestrator.run_once(UtteranceSource::Audio(utterance(3)));
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            response: "Switching to Ukrainian".into()
        }
    );
    assert_eq!(h.state.language(), Language::Uk);
}

#[test]
fn failed_action_reports_localized_speech() {
    let h = Setup {
        brain: FakeBrain::new(Understands::Run(Command::new("teleport"))),
        ..Setup::default()
    }
    .build();
    let outcome = h.orchestrator.run_once(UtteranceSource::Audio(utterance(3)));
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            response: Phrase::UnknownAction.text(Language::En).into()
        }
    );
}

#[test]
fn recognition_failure_is_treated_as_no_speech() {
    for heard in [Heard::Fail, Heard::Fixed("  [BLANK_AUDIO] ")] {
        let h = Setup {
            recognizer: FakeRecognizer::new(heard),
            ..Setup::default()
        }
        .build();
        let outcome = h.orchestrator.run_once(UtteranceSource::Audio(utterance(3)));
        assert_eq!(outcome, RunOutcome::NoSpeech);
        assert!(h.brain.calls().is_empty());
        let events = h.orchestrator.drain_events();
        assert!(!kinds(&events).contains(&EventKind::UserText));
        assert!(!kinds(&events).contains(&EventKind::Error));
        assert!(is_final_idle(events.last().expect("events")));
    }
}

#[test]
fn unreachable_backend_speaks_fallback() {
    let h = Setup {
        brain: FakeBrain::new(Understands::Unreachable),
        state: PipelineState::new(Language::Uk),
        ..Setup::default()
    }
    .build();
    let outcome = h.orchestrator.run_once(UtteranceSource::Audio(utterance(3)));
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            response: Phrase::BackendUnreachable.text(Language::Uk).into()
        }
    );
    assert_eq!(h.playback.plays(), 1);
}

#[test]
fn muted_run_skips_playback_but_reports_reply() {
    let h = Setup::default().build();
    h.orchestrator.set_muted(true);
    let outcome = h.orchestrator.run_once(UtteranceSource::Audio(utterance(4)));
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(h.playback.plays(), 0);
    assert!(kinds(&h.orchestrator.drain_events()).contains(&EventKind::ResponseText));
    assert!(!h.orchestrator.toggle_muted());
}

#[test]
fn synthesis_failure_ends_run_quietly() {
    let h = Setup {
        voice: || Box::new(Broken),
        ..Setup::default()
    }
    .build();
    let outcome = h.orchestrator.run_once(UtteranceSource::Audio(utterance(4)));
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(h.playback.plays(), 0);
    assert!(!kinds(&h.orchestrator.drain_events()).contains(&EventKind::Error));
}

#[test]
fn panicking_stage_emits_error_and_releases_slot() {
    let h = Setup {
        brain: FakeBrain::new(Understands::Panic),
        ..Setup::default()
    }
    .build();
    let outcome = h.orchestrator.run_once(UtteranceSource::Audio(utterance(4)));
    assert!(matches!(outcome, RunOutcome::Failed(_)));
    let events = h.orchestrator.drain_events();
    assert!(kinds(&events).contains(&EventKind::Error));
    assert!(is_final_idle(events.last().expect("events")));
    assert!(h.state.holder().is_none());
    assert!(!h.state.is_busy());
}

#[test]
fn microphone_run_records_then_processes() {
    let source = ScriptedSource::new(1_000);
    source.push_script(script(&[(SPEECH, 4), (0, 3)]));
    let h = Setup {
        source,
        ..Setup::default()
    }
    .build();
    let outcome = h.orchestrator.run_once(UtteranceSource::Microphone);
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            response: format!("you said command {SPEECH}")
        }
    );
    assert_eq!(h.recognizer.calls(), [SPEECH]);
}

#[test]
fn microphone_silence_skips_recognition() {
    let source = ScriptedSource::new(1_000);
    source.push_script(script(&[(0, 10)]));
    let h = Setup {
        source,
        ..Setup::default()
    }
    .build();
    assert_eq!(
        h.orchestrator.run_once(UtteranceSource::Microphone),
        RunOutcome::NoSpeech
    );
    assert!(h.recognizer.calls().is_empty());
    assert_eq!(
        statuses(&h.orchestrator.drain_events()),
        [Phase::Listening, Phase::Idle]
    );
}

#[test]
fn capture_device_failure_surfaces_as_error_event() {
    let source = ScriptedSource::new(1_000);
    source.fail_next_open(AudioError::Device("microphone unplugged".into()));
    let h = Setup {
        source,
        ..Setup::default()
    }
    .build();
    let outcome = h.orchestrator.run_once(UtteranceSource::Microphone);
    assert!(matches!(outcome, RunOutcome::Failed(ref msg) if msg.contains("unplugged")));
    let events = h.orchestrator.drain_events();
    assert!(kinds(&events).contains(&EventKind::Error));
    assert!(is_final_idle(events.last().expect("events")));
}

#[test]
fn inactive_assistant_ignores_requests() {
    let h = Setup::default().build();
    h.state.set_active(false);
    assert_eq!(
        h.orchestrator.run_once(UtteranceSource::Audio(utterance(1))),
        RunOutcome::Inactive
    );
    h.orchestrator.reactivate();
    assert!(h.state.is_active());
    assert!(matches!(
        h.orchestrator.run_once(UtteranceSource::Audio(utterance(1))),
        RunOutcome::Completed { .. }
    ));
}

#[test]
fn busy_push_to_talk_without_barge_in_is_a_no_op() {
    let h = Setup {
        cfg: OrchestratorConfig {
            barge_in: false,
            ..OrchestratorConfig::default()
        },
        ..Setup::default()
    }
    .build();
    let held = h.state.try_start().expect("slot");
    assert_eq!(
        h.orchestrator.run_once(UtteranceSource::Microphone),
        RunOutcome::Busy
    );
    assert_eq!(h.state.holder(), Some(held.id()));
}

#[test]
fn interrupt_before_recognition_completes_leaves_no_reply() {
    let source = ScriptedSource::new(1_000).with_pace(Duration::from_millis(1));
    source.push_script(script(&[(0, 3), (SPEECH, 3), (0, 4)]));
    let (recognizer, entered, release) = FakeRecognizer::gated(Heard::Marker);
    let h = Setup {
        source,
        recognizer,
        ..Setup::default()
    }
    .build();
    let rx = subscribe(&h.orchestrator);

    h.orchestrator.start_continuous().expect("continuous");
    assert!(h.orchestrator.is_continuous());
    entered.recv_timeout(WAIT).expect("speech detected");
    assert!(h.orchestrator.interrupt().is_some());
    release.send(()).expect("release");
    wait_for_final_idle(&rx);
    h.orchestrator.stop_continuous();

    let events: Vec<Event> = h
        .orchestrator
        .drain_events()
        .into_iter()
        .filter(|event| {
            !matches!(
                event.payload,
                EventPayload::Status {
                    detail: Some(_),
                    ..
                }
            )
        })
        .collect();
    assert!(!kinds(&events).contains(&EventKind::ResponseText));
    assert!(is_final_idle(events.last().expect("events")));
    assert!(h.brain.calls().is_empty());
    assert_eq!(h.playback.plays(), 0);
    assert!(!h.orchestrator.is_continuous());
}

#[test]
fn back_to_back_utterances_queue_instead_of_dropping() {
    for barge_in in [true, false] {
        let (recognizer, entered, release) = FakeRecognizer::gated(Heard::Marker);
        let h = Setup {
            recognizer,
            cfg: OrchestratorConfig {
                barge_in,
                ..OrchestratorConfig::default()
            },
            ..Setup::default()
        }
        .build();

        let first = {
            let orchestrator = h.orchestrator.clone();
            thread::spawn(move || orchestrator.run_once(UtteranceSource::Audio(utterance(1))))
        };
        entered.recv_timeout(WAIT).expect("first run recognizing");
        assert_eq!(
            h.orchestrator.run_once(UtteranceSource::Audio(utterance(2))),
            RunOutcome::Queued
        );
        assert!(h.orchestrator.has_pending());
        release.send(()).expect("release");

        let first_outcome = first.join().expect("first run");
        assert!(!h.orchestrator.has_pending());
        assert_eq!(h.recognizer.calls(), [1, 2]);
        if barge_in {
            assert_eq!(first_outcome, RunOutcome::Cancelled(Checkpoint::Understanding));
            assert_eq!(h.brain.calls(), ["command 2"]);
        } else {
            assert!(matches!(first_outcome, RunOutcome::Completed { .. }));
            assert_eq!(h.brain.calls(), ["command 1", "command 2"]);
        }
        assert!(h.state.holder().is_none());
    }
}

#[test]
fn newest_pending_utterance_wins() {
    let (recognizer, entered, release) = FakeRecognizer::gated(Heard::Marker);
    let h = Setup {
        recognizer,
        ..Setup::default()
    }
    .build();
    let first = {
        let orchestrator = h.orchestrator.clone();
        thread::spawn(move || orchestrator.run_once(UtteranceSource::Audio(utterance(1))))
    };
    entered.recv_timeout(WAIT).expect("first run recognizing");
    for marker in [2, 3] {
        assert_eq!(
            h.orchestrator.run_once(UtteranceSource::Audio(utterance(marker))),
            RunOutcome::Queued
        );
    }
    release.send(()).expect("release");
    first.join().expect("first run");
    assert_eq!(h.recognizer.calls(), [1, 3]);
}

#[test]
fn interrupt_halts_playback_and_frees_slot() {
    let (playback, started) = FakePlayback::blocking();
    let h = Setup {
        playback,
        ..Setup::default()
    }
    .build();
    let run = {
        let orchestrator = h.orchestrator.clone();
        thread::spawn(move || orchestrator.run_once(UtteranceSource::Audio(utterance(5))))
    };
    started.recv_timeout(WAIT).expect("playback started");
    assert!(h.state.is_speaking());
    let interrupted_at = Instant::now();
    assert!(h.orchestrator.interrupt().is_some());
    let outcome = run.join().expect("run");
    assert!(interrupted_at.elapsed() < Duration::from_secs(1));
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert!(h.state.holder().is_none());
}

#[test]
fn interrupt_before_the_sink_starts_still_stops_playback() {
    let (playback, started, go) = FakePlayback::late_start();
    let h = Setup {
        playback,
        ..Setup::default()
    }
    .build();
    let run = {
        let orchestrator = h.orchestrator.clone();
        thread::spawn(move || orchestrator.run_once(UtteranceSource::Audio(utterance(5))))
    };
    started.recv_timeout(WAIT).expect("playback handed over");
    let interrupted_at = Instant::now();
    assert!(h.orchestrator.interrupt().is_some());
    // The sink takes its stop generation only now, after the stop went out.
    go.send(()).expect("release sink");
    let outcome = run.join().expect("run");
    assert!(interrupted_at.elapsed() < Duration::from_secs(2));
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert!(h.state.holder().is_none());
}

#[test]
fn interrupted_speak_releases_the_slot() {
    let (playback, started) = FakePlayback::blocking();
    let h = Setup {
        playback,
        ..Setup::default()
    }
    .build();
    let greeting = {
        let orchestrator = h.orchestrator.clone();
        thread::spawn(move || orchestrator.speak("hello there", None))
    };
    started.recv_timeout(WAIT).expect("greeting playing");
    assert!(h.state.is_speaking());
    assert!(h.orchestrator.interrupt().is_some());
    assert!(greeting.join().expect("speak"));
    assert!(h.state.holder().is_none());
    assert_eq!(h.playback.plays(), 1);
}

#[test]
fn muted_replies_do_not_deafen_the_continuous_listener() {
    let source = ScriptedSource::new(1_000).with_pace(Duration::from_millis(5));
    source.push_script(script(&[(0, 3), (SPEECH, 3), (0, 40), (SPEECH * 2, 3), (0, 5)]));
    let h = Setup {
        source,
        cfg: OrchestratorConfig {
            cooldown: Duration::from_secs(10),
            ..OrchestratorConfig::default()
        },
        ..Setup::default()
    }
    .build();
    h.orchestrator.set_muted(true);
    h.orchestrator.start_continuous().expect("continuous");

    let deadline = Instant::now() + WAIT;
    while h.recognizer.calls().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    h.orchestrator.stop_continuous();
    assert_eq!(h.recognizer.calls(), [SPEECH, SPEECH * 2]);
    assert_eq!(h.playback.plays(), 0);
}

#[test]
fn push_to_talk_barges_in_on_a_running_command() {
    let (playback, started) = FakePlayback::blocking();
    let source = ScriptedSource::new(1_000);
    source.push_script(script(&[(SPEECH, 4), (0, 3)]));
    let h = Setup {
        playback,
        source,
        ..Setup::default()
    }
    .build();
    let run = {
        let orchestrator = h.orchestrator.clone();
        thread::spawn(move || orchestrator.run_once(UtteranceSource::Audio(utterance(5))))
    };
    started.recv_timeout(WAIT).expect("playback started");
    let second = h.orchestrator.start_pipeline_run().expect("spawn");
    // The second run also speaks through the blocking sink.
    started.recv_timeout(WAIT).expect("second playback");
    h.orchestrator.interrupt();
    assert!(matches!(run.join().expect("first"), RunOutcome::Completed { .. }));
    assert!(matches!(
        second.join().expect("second"),
        RunOutcome::Completed { .. }
    ));
    assert_eq!(h.recognizer.calls(), [5, SPEECH]);
}

#[test]
fn watchdog_evicted_run_stops_at_next_checkpoint() {
    let (recognizer, entered, release) = FakeRecognizer::gated(Heard::Marker);
    let h = Setup {
        recognizer,
        state: PipelineState::default().with_watchdog(Duration::from_millis(20)),
        ..Setup::default()
    }
    .build();
    let stuck = {
        let orchestrator = h.orchestrator.clone();
        thread::spawn(move || orchestrator.run_once(UtteranceSource::Audio(utterance(1))))
    };
    entered.recv_timeout(WAIT).expect("recognizing");
    thread::sleep(Duration::from_millis(50));
    let fresh = h.state.try_start().expect("watchdog frees the slot");
    release.send(()).expect("release");
    assert_eq!(
        stuck.join().expect("stuck run"),
        RunOutcome::Cancelled(Checkpoint::Understanding)
    );
    assert_eq!(h.state.holder(), Some(fresh.id()));
    assert!(h.brain.calls().is_empty());
}

#[test]
fn speak_uses_the_slot_and_refuses_when_busy() {
    let h = Setup::default().build();
    assert!(h.orchestrator.speak("hello", None));
    assert_eq!(h.playback.plays(), 1);
    assert!(h.state.holder().is_none());

    let held = h.state.try_start().expect("slot");
    assert!(!h.orchestrator.speak("hello again", Some(Language::Uk)));
    drop(held);
    assert_eq!(h.playback.plays(), 1);
}

#[test]
fn lowered_silence_threshold_is_announced_once() {
    let source = ScriptedSource::new(1_000);
    source.push_script(script(&[(50, 8)]));
    let h = Setup {
        source,
        calibration: None,
        ..Setup::default()
    }
    .build();
    let calibration = h.orchestrator.calibrate();
    assert_eq!(calibration.thresholds.speech, 150.0);
    assert_eq!(calibration.thresholds.silence, 150.0);
    h.orchestrator.calibrate();
    let notices: Vec<_> = h
        .orchestrator
        .drain_events()
        .into_iter()
        .filter_map(|event| match event.payload {
            EventPayload::Status {
                detail: Some(detail),
                ..
            } => Some(detail),
            _ => None,
        })
        .collect();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("lowered from 500 to 150"));
}

#[test]
fn shutdown_stops_everything() {
    let source = ScriptedSource::new(1_000);
    let h = Setup {
        source,
        ..Setup::default()
    }
    .build();
    h.orchestrator.start_continuous().expect("continuous");
    h.orchestrator.shutdown();
    assert!(!h.orchestrator.is_continuous());
    assert!(!h.state.is_running());
    assert_eq!(
        h.orchestrator.run_once(UtteranceSource::Audio(utterance(1))),
        RunOutcome::Inactive
    );
}
