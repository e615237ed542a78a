//! Narrow contracts for the recognition, understanding and synthesis engines,
//! plus the long-lived synthesis workers the orchestrator talks to.

use crate::audio::{SpeechAudio, Utterance};
use crate::error::PipelineError;
use crate::i18n::{Language, Phrase};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

/// Action parameters as decoded from the brain's JSON.
pub type Params = serde_json::Map<String, serde_json::Value>;

pub const DEFAULT_SYNTH_TIMEOUT: Duration = Duration::from_secs(20);
const SYNTH_QUEUE_CAPACITY: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
}

impl Transcription {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Speech-to-text engine.
pub trait Recognizer: Send + Sync {
    fn transcribe(
        &self,
        utterance: &Utterance,
        language: Language,
    ) -> Result<Transcription, PipelineError>;
}

/// Structured command picked by the understanding backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

/// What the understanding backend made of one transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrainReply {
    #[serde(default)]
    pub command: Option<Command>,
    #[serde(default)]
    pub response_text: String,
    #[serde(default, alias = "is_conversation")]
    pub is_conversational: bool,
}

impl BrainReply {
    pub fn conversational(text: impl Into<String>) -> Self {
        Self {
            command: None,
            response_text: text.into(),
            is_conversational: true,
        }
    }

    pub fn command(command: Command, text: impl Into<String>) -> Self {
        Self {
            command: Some(command),
            response_text: text.into(),
            is_conversational: false,
        }
    }

    /// Localized reply used when the backend could not be consulted.
    pub fn fallback(err: &PipelineError, language: Language) -> Self {
        let phrase = match err {
            PipelineError::BackendUnavailable(_) => Phrase::BackendUnreachable,
            PipelineError::BackendTimeout(_) | PipelineError::Timeout { .. } => {
                Phrase::BackendTimedOut
            }
            _ => Phrase::NotUnderstood,
        };
        Self::conversational(phrase.text(language))
    }

    /// The command to dispatch, if the backend asked for one.
    pub fn actionable(&self) -> Option<&Command> {
        if self.is_conversational {
            return None;
        }
        self.command.as_ref()
    }
}

/// Language-understanding backend.
pub trait Brain: Send + Sync {
    fn process(&self, text: &str, language: Language) -> Result<BrainReply, PipelineError>;
}

/// Text-to-speech engine. Runs on its own worker thread, so it only needs
/// to be `Send`.
pub trait Synthesizer: Send {
    fn synthesize(&mut self, text: &str) -> Result<SpeechAudio, PipelineError>;
}

/// Synthesizer that never produces audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSynthesizer;

impl Synthesizer for SilentSynthesizer {
    fn synthesize(&mut self, _text: &str) -> Result<SpeechAudio, PipelineError> {
        Ok(SpeechAudio::empty())
    }
}

struct SynthRequest {
    text: String,
    reply: Sender<Result<SpeechAudio, PipelineError>>,
}

/// One long-lived thread that owns a synthesizer. Callers wait at most
/// `timeout`; a stuck engine only ever blocks its own worker.
pub struct SynthWorker {
    label: &'static str,
    requests: Sender<SynthRequest>,
    timeout: Duration,
}

impl SynthWorker {
    pub fn spawn(
        label: &'static str,
        synthesizer: Box<dyn Synthesizer>,
        timeout: Duration,
    ) -> std::io::Result<Self> {
        let (requests, rx) = bounded::<SynthRequest>(SYNTH_QUEUE_CAPACITY);
        thread::Builder::new()
            .name(format!("synth-{label}"))
            .spawn(move || serve(label, synthesizer, rx))?;
        Ok(Self {
            label,
            requests,
            timeout,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Synthesize `text`. Empty text yields empty audio without touching
    /// the engine.
    pub fn synthesize(&self, text: &str) -> Result<SpeechAudio, PipelineError> {
        if text.trim().is_empty() {
            return Ok(SpeechAudio::empty());
        }
        let (reply, response) = bounded(1);
        let request = SynthRequest {
            text: text.to_string(),
            reply,
        };
        match self.requests.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(voice = self.label, "synthesis queue full");
                return Err(PipelineError::Timeout {
                    what: "synthesis queue",
                    after: Duration::ZERO,
                });
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(PipelineError::BackendUnavailable(format!(
                    "{} synthesizer worker stopped",
                    self.label
                )));
            }
        }
        match response.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    voice = self.label,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "synthesis timed out"
                );
                Err(PipelineError::Timeout {
                    what: "synthesis",
                    after: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::BackendUnavailable(
                format!("{} synthesizer dropped the request", self.label),
            )),
        }
    }
}

fn serve(label: &'static str, mut synthesizer: Box<dyn Synthesizer>, rx: Receiver<SynthRequest>) {
    tracing::debug!(voice = label, "synthesizer worker started");
    for request in rx.iter() {
        let result = catch_unwind(AssertUnwindSafe(|| synthesizer.synthesize(&request.text)))
            .unwrap_or_else(|_| {
                tracing::error!(voice = label, "synthesizer panicked");
                Err(PipelineError::BackendUnavailable(format!(
                    "{label} synthesizer panicked"
                )))
            });
        // The caller may have given up already.
        let _ = request.reply.send(result);
    }
    tracing::debug!(voice = label, "synthesizer worker exited");
}

/// The English and Ukrainian synthesis workers.
pub struct Voices {
    en: SynthWorker,
    uk: SynthWorker,
}

impl Voices {
    pub fn new(en: SynthWorker, uk: SynthWorker) -> Self {
        Self { en, uk }
    }

    /// Spawn one worker per language with the same timeout.
    pub fn spawn(
        en: Box<dyn Synthesizer>,
        uk: Box<dyn Synthesizer>,
        timeout: Duration,
    ) -> std::io::Result<Self> {
        Ok(Self::new(
            SynthWorker::spawn("en", en, timeout)?,
            SynthWorker::spawn("uk", uk, timeout)?,
        ))
    }

    pub fn silent() -> std::io::Result<Self> {
        Self::spawn(
            Box::new(SilentSynthesizer),
            Box::new(SilentSynthesizer),
            DEFAULT_SYNTH_TIMEOUT,
        )
    }

    pub fn for_language(&self, language: Language) -> &SynthWorker {
        match language {
            Language::En => &self.en,
            Language::Uk => &self.uk,
        }
    }
}
