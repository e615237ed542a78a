//! Bilingual (English/Ukrainian) voice command pipeline.
//!
//! Audio is captured and segmented into utterances, recognized, interpreted
//! by an understanding backend, optionally turned into an action, and the
//! reply is spoken back. The [`Orchestrator`] sequences one run at a time
//! and supports interrupting it at any stage.

pub mod actions;
pub mod audio;
pub mod config;
pub mod engines;
pub mod error;
pub mod events;
pub mod external;
pub mod i18n;
mod lock;
pub mod orchestrator;
pub mod state;
pub mod telemetry;
pub mod transcript;

pub use actions::{ActionMeta, ActionOutcome, ActionRegistry, ParamSpec, ParamType};
pub use config::AppConfig;
pub use engines::{Brain, BrainReply, Command, Recognizer, Synthesizer, Transcription, Voices};
pub use error::{AudioError, Checkpoint, PipelineError};
pub use events::{Event, EventBus, EventKind, EventPayload};
pub use i18n::{Language, Phrase};
pub use orchestrator::{
    CancelToken, Collaborators, Orchestrator, OrchestratorConfig, RunOutcome, UtteranceSource,
};
pub use state::{Phase, PipelineState, RunGuard, RunId};
