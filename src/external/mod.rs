//! Engines backed by user-supplied helper commands.
//!
//! Each helper is a program run once per request: input on stdin, result on
//! stdout. Command lines accept `{lang}` and `{rate}` placeholders.

mod process;

pub use process::{CommandSpec, ProcessError};

use crate::actions::ActionRegistry;
use crate::audio::{AudioFormat, SpeechAudio, Utterance};
use crate::engines::{Brain, BrainReply, Recognizer, Synthesizer, Transcription};
use crate::error::PipelineError;
use crate::i18n::Language;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(30);

/// Speech-to-text via a helper that reads mono PCM16 LE from stdin and
/// prints either `{"text": .., "confidence": ..}` or plain text.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    spec: CommandSpec,
    timeout: Duration,
}

#[derive(Deserialize)]
struct RecognizerOutput {
    #[serde(default)]
    text: String,
    #[serde(default = "full_confidence")]
    confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

impl CommandRecognizer {
    pub fn new(spec: CommandSpec, timeout: Duration) -> Self {
        Self { spec, timeout }
    }
}

impl Recognizer for CommandRecognizer {
    fn transcribe(
        &self,
        utterance: &Utterance,
        language: Language,
    ) -> Result<Transcription, PipelineError> {
        let rate = utterance.sample_rate().to_string();
        let stdout = self
            .spec
            .run(
                &[("lang", language.code()), ("rate", &rate)],
                utterance.to_le_bytes(),
                self.timeout,
            )
            .map_err(|err| match err {
                ProcessError::TimedOut { after, .. } => PipelineError::Timeout {
                    what: "recognition",
                    after,
                },
                other => PipelineError::Recognition(other.to_string()),
            })?;
        Ok(parse_transcription(&String::from_utf8_lossy(&stdout)))
    }
}

fn parse_transcription(raw: &str) -> Transcription {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<RecognizerOutput>(trimmed) {
            return Transcription::new(parsed.text.trim(), parsed.confidence.clamp(0.0, 1.0));
        }
    }
    Transcription::new(trimmed, 1.0)
}

#[derive(Serialize)]
struct BrainRequest<'a> {
    text: &'a str,
    language: Language,
    actions: String,
}

/// Understanding backend reached through a helper command. The helper gets
/// the transcript, the language and the action catalog as JSON on stdin and
/// answers with a `BrainReply` JSON object.
#[derive(Debug, Clone)]
pub struct CommandBrain {
    spec: CommandSpec,
    registry: Arc<ActionRegistry>,
    timeout: Duration,
}

impl CommandBrain {
    pub fn new(spec: CommandSpec, registry: Arc<ActionRegistry>, timeout: Duration) -> Self {
        Self {
            spec,
            registry,
            timeout,
        }
    }
}

impl Brain for CommandBrain {
    fn process(&self, text: &str, language: Language) -> Result<BrainReply, PipelineError> {
        let request = BrainRequest {
            text,
            language,
            actions: self.registry.schema_for_llm(language),
        };
        let input = serde_json::to_vec(&request)
            .map_err(|err| PipelineError::BackendUnavailable(err.to_string()))?;
        let stdout = self
            .spec
            .run(&[("lang", language.code())], input, self.timeout)
            .map_err(|err| match err {
                ProcessError::TimedOut { after, .. } => {
                    PipelineError::BackendTimeout(format!("no reply within {after:?}"))
                }
                other => PipelineError::BackendUnavailable(other.to_string()),
            })?;
        serde_json::from_slice::<BrainReply>(&stdout).map_err(|err| {
            tracing::warn!(error = %err, "understanding backend returned malformed JSON");
            PipelineError::BackendUnavailable(format!("malformed reply: {err}"))
        })
    }
}

/// Text-to-speech via a helper that reads UTF-8 text on stdin and writes
/// either a WAV file or raw PCM16 at `sample_rate` to stdout.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    spec: CommandSpec,
    language: Language,
    sample_rate: u32,
    timeout: Duration,
}

impl CommandSynthesizer {
    pub fn new(spec: CommandSpec, language: Language, sample_rate: u32, timeout: Duration) -> Self {
        Self {
            spec,
            language,
            sample_rate,
            timeout,
        }
    }
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<SpeechAudio, PipelineError> {
        let rate = self.sample_rate.to_string();
        let bytes = self
            .spec
            .run(
                &[("lang", self.language.code()), ("rate", &rate)],
                text.as_bytes().to_vec(),
                self.timeout,
            )
            .map_err(|err| match err {
                ProcessError::TimedOut { after, .. } => PipelineError::Timeout {
                    what: "synthesis",
                    after,
                },
                other => PipelineError::BackendUnavailable(other.to_string()),
            })?;
        let format = if bytes.starts_with(b"RIFF") {
            AudioFormat::Wav
        } else {
            AudioFormat::Pcm16
        };
        Ok(SpeechAudio {
            bytes,
            sample_rate: self.sample_rate,
            format,
        })
    }
}
