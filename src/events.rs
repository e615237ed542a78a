//! Best-effort event stream for observers (console, GUI, logs).
//!
//! Producers never block: events land in a bounded queue that drops the
//! oldest low-value entries on overflow, and are fanned out to push
//! subscribers over unbounded channels drained by one thread per subscriber.

use crate::i18n::Language;
use crate::lock::lock_or_recover;
use crate::state::Phase;
use crossbeam_channel::{unbounded, Sender};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

pub const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Status,
    UserText,
    ResponseText,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Status {
        state: Phase,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    UserText {
        text: String,
        language: Language,
    },
    ResponseText {
        text: String,
        language: Language,
    },
    Error {
        message: String,
    },
}

/// Immutable `(kind, payload, timestamp)` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp_ms: u64,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            payload,
            timestamp_ms,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Status { .. } => EventKind::Status,
            EventPayload::UserText { .. } => EventKind::UserText,
            EventPayload::ResponseText { .. } => EventKind::ResponseText,
            EventPayload::Error { .. } => EventKind::Error,
        }
    }

    pub fn status(state: Phase) -> Self {
        Self::new(EventPayload::Status {
            state,
            detail: None,
        })
    }

    pub fn status_detail(state: Phase, detail: impl Into<String>) -> Self {
        Self::new(EventPayload::Status {
            state,
            detail: Some(detail.into()),
        })
    }

    pub fn user_text(text: impl Into<String>, language: Language) -> Self {
        Self::new(EventPayload::UserText {
            text: text.into(),
            language,
        })
    }

    pub fn response_text(text: impl Into<String>, language: Language) -> Self {
        Self::new(EventPayload::ResponseText {
            text: text.into(),
            language,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventPayload::Error {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Bounded queue with drop-oldest semantics that prefers to sacrifice
/// status updates, then transcripts, before errors.
struct BoundedEventQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Event>>,
}

impl BoundedEventQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns true when an older event had to be dropped.
    fn push(&self, event: Event) -> bool {
        let mut queue = lock_or_recover(&self.inner, "event_queue");
        let mut dropped = false;
        if queue.len() >= self.capacity {
            Self::drop_one(&mut queue);
            dropped = true;
        }
        queue.push_back(event);
        dropped
    }

    fn drain(&self) -> Vec<Event> {
        lock_or_recover(&self.inner, "event_queue").drain(..).collect()
    }

    fn drop_one(queue: &mut VecDeque<Event>) {
        for kind in [EventKind::Status, EventKind::UserText, EventKind::ResponseText] {
            if let Some(idx) = queue.iter().position(|event| event.kind() == kind) {
                queue.remove(idx);
                return;
            }
        }
        queue.pop_front();
    }
}

pub type EventCallback = Box<dyn Fn(&Event) + Send + 'static>;

/// Multi-producer event hub supporting polling (`drain`) and push
/// (`subscribe`) consumers at the same time.
pub struct EventBus {
    queue: BoundedEventQueue,
    subscribers: Mutex<Vec<Sender<Event>>>,
    dropped: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: BoundedEventQueue::new(capacity),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn emit(&self, event: Event) {
        tracing::debug!(kind = ?event.kind(), "event");
        if self.queue.push(event.clone()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        let mut subscribers = lock_or_recover(&self.subscribers, "event_bus.subscribers");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        self.queue.drain()
    }

    /// Events lost to queue overflow since startup.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver every future event to `callback` on a dedicated thread. A
    /// panicking callback is logged and keeps receiving later events.
    pub fn subscribe(&self, callback: EventCallback) {
        let (tx, rx) = unbounded::<Event>();
        let spawned = thread::Builder::new()
            .name("event-subscriber".to_string())
            .spawn(move || {
                for event in rx.iter() {
                    if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                        tracing::error!(kind = ?event.kind(), "event subscriber panicked");
                    }
                }
            });
        match spawned {
            Ok(_) => lock_or_recover(&self.subscribers, "event_bus.subscribers").push(tx),
            Err(err) => tracing::error!(error = %err, "failed to spawn event subscriber"),
        }
    }
}
