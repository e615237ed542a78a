use crate::lock::lock_or_recover;
use crate::state::RunId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Run-scoped cancellation flag. The same flag doubles as the stop signal
/// for a bounded recording in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.flag
    }
}

/// Tracks the token of the run that currently owns the pipeline slot.
#[derive(Debug, Default)]
pub(crate) struct RunControl {
    current: Mutex<Option<(RunId, CancelToken)>>,
}

impl RunControl {
    pub(crate) fn begin(&self, id: RunId) -> CancelToken {
        let token = CancelToken::new();
        *lock_or_recover(&self.current, "run_control") = Some((id, token.clone()));
        token
    }

    /// Forget `id`'s token unless a newer run already replaced it.
    pub(crate) fn finish(&self, id: RunId) {
        let mut current = lock_or_recover(&self.current, "run_control");
        if matches!(current.as_ref(), Some((active, _)) if *active == id) {
            *current = None;
        }
    }

    /// Cancel the active run, returning its id.
    pub(crate) fn cancel_current(&self) -> Option<RunId> {
        let current = lock_or_recover(&self.current, "run_control");
        current.as_ref().map(|(id, token)| {
            token.cancel();
            *id
        })
    }

    pub(crate) fn active(&self) -> Option<RunId> {
        lock_or_recover(&self.current, "run_control")
            .as_ref()
            .map(|(id, _)| *id)
    }
}
