//! Structured event stream emitted by actors.
//!
//! The engine never formats narration. Each state transition and resource
//! movement becomes an [`ArbitrationEvent`] handed to an [`EventSink`]; the
//! sink decides whether to log, forward or record it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::topology::{ActorId, ResourceId};

/// Lifecycle state of one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorState {
    Thinking,
    RequestingFirst,
    RequestingSecond,
    Eating,
    Releasing,
    Stopped,
}

impl ActorState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ActorState::Thinking => 0,
            ActorState::RequestingFirst => 1,
            ActorState::RequestingSecond => 2,
            ActorState::Eating => 3,
            ActorState::Releasing => 4,
            ActorState::Stopped => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ActorState::Thinking,
            1 => ActorState::RequestingFirst,
            2 => ActorState::RequestingSecond,
            3 => ActorState::Eating,
            4 => ActorState::Releasing,
            _ => ActorState::Stopped,
        }
    }
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorState::Thinking => write!(f, "thinking"),
            ActorState::RequestingFirst => write!(f, "requesting-first"),
            ActorState::RequestingSecond => write!(f, "requesting-second"),
            ActorState::Eating => write!(f, "eating"),
            ActorState::Releasing => write!(f, "releasing"),
            ActorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What happened to an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    StateChanged { from: ActorState, to: ActorState },
    Acquired { resource: ResourceId },
    Released { resource: ResourceId },
    TimedOut { resource: ResourceId },
    Denied,
    BackedOff { delay: Duration },
    Granted { ticket: u64 },
    Cancelled,
}

/// One entry of the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbitrationEvent {
    pub actor: ActorId,
    /// Time since the run started.
    pub elapsed: Duration,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Consumer of the event stream.
pub trait EventSink: Send + Sync {
    /// Accepts one event. Must not block.
    fn emit(&self, event: ArbitrationEvent);
}

/// Forwards events to `tracing` at debug level under the `contend::events`
/// target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ArbitrationEvent) {
        tracing::debug!(
            target: "contend::events",
            actor = %event.actor,
            elapsed_ms = event.elapsed.as_millis() as u64,
            event = ?event.kind,
            "arbitration event"
        );
    }
}

/// Forwards events over an unbounded channel to an external observer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ArbitrationEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver the observer drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ArbitrationEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ArbitrationEvent) {
        // Observer hung up; the run continues without it.
        let _ = self.sender.send(event);
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ArbitrationEvent>>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events.
    pub fn events(&self) -> Vec<ArbitrationEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Checks whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ArbitrationEvent) {
        self.events.lock().push(event);
    }
}

/// Stamps events with the run-relative time before handing them to a sink.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    origin: Instant,
}

impl EventEmitter {
    /// Creates an emitter whose clock starts now.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            origin: Instant::now(),
        }
    }

    /// Emits `kind` on behalf of `actor`.
    pub fn emit(&self, actor: ActorId, kind: EventKind) {
        self.sink.emit(ArbitrationEvent {
            actor,
            elapsed: self.origin.elapsed(),
            kind,
        });
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
