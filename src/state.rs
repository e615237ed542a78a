//! Shared pipeline state: the single run slot, phase flags and assistant
//! settings that observers poll.
//!
//! The slot is the only serialization point between pipeline runs. Phase
//! flags are advisory and may be briefly stale. Every acquisition hands out a
//! [`RunGuard`] whose drop releases the slot only if the run still owns it,
//! so a run that outlives the watchdog cannot release a newer run's slot.

use crate::i18n::Language;
use crate::lock::lock_or_recover;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(60);

/// Identity of one acquisition of the pipeline slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// What the pipeline is doing right now, as observers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Listening => "listening",
            Phase::Processing => "processing",
            Phase::Speaking => "speaking",
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    holder: Option<RunId>,
    started_at: Option<Instant>,
    last_id: u64,
}

#[derive(Debug)]
pub struct PipelineState {
    slot: Mutex<Slot>,
    watchdog: Duration,
    listening: AtomicBool,
    processing: AtomicBool,
    speaking: AtomicBool,
    language: Mutex<Language>,
    active: AtomicBool,
    running: AtomicBool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new(Language::default())
    }
}

impl PipelineState {
    pub fn new(language: Language) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            watchdog: DEFAULT_WATCHDOG,
            listening: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            language: Mutex::new(language),
            active: AtomicBool::new(true),
            running: AtomicBool::new(true),
        }
    }

    /// Override the ceiling after which a held slot is considered stuck.
    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    /// Non-blocking attempt to acquire the pipeline slot. A run that has held
    /// the slot longer than the watchdog is evicted first.
    pub fn try_start(self: &Arc<Self>) -> Option<RunGuard> {
        let mut slot = lock_or_recover(&self.slot, "pipeline_state.slot");
        if let (Some(holder), Some(started_at)) = (slot.holder, slot.started_at) {
            let elapsed = started_at.elapsed();
            if elapsed > self.watchdog {
                tracing::warn!(
                    run = %holder,
                    elapsed_secs = elapsed.as_secs(),
                    "pipeline stuck; auto-resetting"
                );
                self.clear_flags();
                slot.holder = None;
                slot.started_at = None;
            }
        }
        if slot.holder.is_some() {
            return None;
        }
        slot.last_id += 1;
        let id = RunId(slot.last_id);
        slot.holder = Some(id);
        slot.started_at = Some(Instant::now());
        tracing::debug!(run = %id, "pipeline slot acquired");
        Some(RunGuard {
            state: Arc::clone(self),
            id,
        })
    }

    /// Current slot holder, if any.
    pub fn holder(&self) -> Option<RunId> {
        lock_or_recover(&self.slot, "pipeline_state.slot").holder
    }

    /// Clear every busy flag and release the slot, whoever holds it.
    pub fn end(&self) {
        let mut slot = lock_or_recover(&self.slot, "pipeline_state.slot");
        self.clear_flags();
        slot.holder = None;
        slot.started_at = None;
    }

    fn end_run(&self, id: RunId) -> bool {
        let mut slot = lock_or_recover(&self.slot, "pipeline_state.slot");
        if slot.holder != Some(id) {
            tracing::debug!(run = %id, "stale run finished; slot already reassigned");
            return false;
        }
        self.clear_flags();
        slot.holder = None;
        slot.started_at = None;
        tracing::debug!(run = %id, "pipeline slot released");
        true
    }

    /// Clear the busy flags without touching slot ownership. The start
    /// timestamp is kept so the watchdog can still reclaim a stuck slot.
    pub fn force_reset(&self) {
        self.clear_flags();
        tracing::info!("state force-reset: all flags cleared");
    }

    fn clear_flags(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.processing.store(false, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
    }

    fn store_phase(&self, phase: Phase) {
        self.listening.store(phase == Phase::Listening, Ordering::SeqCst);
        self.processing.store(phase == Phase::Processing, Ordering::SeqCst);
        self.speaking.store(phase == Phase::Speaking, Ordering::SeqCst);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.is_listening() || self.is_processing() || self.is_speaking()
    }

    pub fn current_phase(&self) -> Phase {
        if self.is_speaking() {
            Phase::Speaking
        } else if self.is_processing() {
            Phase::Processing
        } else if self.is_listening() {
            Phase::Listening
        } else {
            Phase::Idle
        }
    }

    pub fn language(&self) -> Language {
        *lock_or_recover(&self.language, "pipeline_state.language")
    }

    pub fn toggle_language(&self) -> Language {
        let mut language = lock_or_recover(&self.language, "pipeline_state.language");
        *language = language.toggled();
        tracing::info!(language = %*language, "language toggled");
        *language
    }

    /// Switch language by code; unknown codes leave it unchanged.
    pub fn set_language(&self, code: &str) -> Language {
        let mut language = lock_or_recover(&self.language, "pipeline_state.language");
        match Language::from_code(code) {
            Some(next) => *language = next,
            None => tracing::warn!(code, "ignoring unsupported language"),
        }
        *language
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn toggle_active(&self) -> bool {
        !self.active.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the assistant as stopping: inactive, not running, no busy flags.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        self.clear_flags();
        tracing::info!("assistant state shut down");
    }
}

/// Proof of slot ownership for one run. Dropping it releases the slot.
#[derive(Debug)]
pub struct RunGuard {
    state: Arc<PipelineState>,
    id: RunId,
}

impl RunGuard {
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Whether this run still owns the slot (false after a watchdog eviction
    /// or an external `end`).
    pub fn is_current(&self) -> bool {
        self.state.holder() == Some(self.id)
    }

    /// Publish this run's phase. Ignored once the run lost the slot.
    pub fn set_phase(&self, phase: Phase) {
        let slot = lock_or_recover(&self.state.slot, "pipeline_state.slot");
        if slot.holder == Some(self.id) {
            self.state.store_phase(phase);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.end_run(self.id);
    }
}
