//! Typed publish/subscribe events raised by a scale session.

use parking_lot::RwLock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::protocol::Packet;

/// The kinds of event a session raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Every decoded packet.
    Data,
    /// Non-final weight reading.
    LiveUpdate,
    /// Final weight reading.
    Measurement,
    /// Inactivity timeout.
    Timeout,
}

impl EventKind {
    /// Event name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::LiveUpdate => "liveupdate",
            Self::Measurement => "measurement",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An event together with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleEvent {
    /// A decoded packet, for diagnostics.
    Data(Packet),
    /// In-progress weight in kilograms.
    LiveUpdate(f64),
    /// Final weight in kilograms.
    Measurement(f64),
    /// No packet arrived within the session timeout.
    Timeout,
}

impl ScaleEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Data(_) => EventKind::Data,
            Self::LiveUpdate(_) => EventKind::LiveUpdate,
            Self::Measurement(_) => EventKind::Measurement,
            Self::Timeout => EventKind::Timeout,
        }
    }

    /// The weight carried by a live update or measurement.
    pub fn weight_kg(&self) -> Option<f64> {
        match self {
            Self::LiveUpdate(kg) | Self::Measurement(kg) => Some(*kg),
            _ => None,
        }
    }
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Get the numeric id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

type Handler = Arc<dyn Fn(&ScaleEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    kind: EventKind,
    handler: Handler,
}

/// Ordered listener registry.
///
/// Handlers run synchronously, in registration order. A handler that panics is
/// logged and skipped; the rest of the emission continues.
pub struct EventEmitter {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    /// Create an empty emitter.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&ScaleEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push(Listener {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Number of handlers registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|l| l.kind == kind)
            .count()
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Deliver an event to every handler registered for its kind.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn emit(&self, event: &ScaleEvent) -> usize {
        let kind = event.kind();

        // Snapshot so handlers can register, unregister or destroy the session.
        let handlers: Vec<Handler> = self
            .listeners
            .read()
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| l.handler.clone())
            .collect();

        trace!("Emitting {} to {} handler(s)", kind, handlers.len());

        let mut completed = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => completed += 1,
                Err(payload) => {
                    warn!("{} handler panicked: {}", kind, panic_message(&payload));
                }
            }
        }
        completed
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
