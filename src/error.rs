//! Error taxonomy shared by the capture, playback and pipeline layers.

use std::time::Duration;
use thiserror::Error;

/// Capture and playback hardware failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio stream disconnected")]
    Disconnected,

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid audio data: {0}")]
    InvalidData(String),
}

/// Cancellation checkpoints inside one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Recognition,
    Understanding,
    Action,
    Synthesis,
    Playback,
}

impl Checkpoint {
    pub fn label(self) -> &'static str {
        match self {
            Checkpoint::Recognition => "recognition",
            Checkpoint::Understanding => "understanding",
            Checkpoint::Action => "action",
            Checkpoint::Synthesis => "synthesis",
            Checkpoint::Playback => "playback",
        }
    }
}

/// Failures a pipeline stage can report. Soft failures are converted to
/// spoken text by the orchestrator; only `Device` and unexpected conditions
/// end a run with an `error` event.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Device(#[from] AudioError),

    #[error("recognition failed: {0}")]
    Recognition(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend timed out: {0}")]
    BackendTimeout(String),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },

    #[error("run cancelled before {}", .0.label())]
    Cancelled(Checkpoint),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled(_))
    }
}
