//! Signal buffering and delivery.
//!
//! Sub-indexers produce signals while a write transaction is open, but
//! observers must never see an event that may still be rolled back.
//! Signals are therefore queued in the emitter and only delivered by
//! [`SignalEmitter::emit_queued`] after the transaction committed; a
//! rollback drops the queue instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::model::PageName;

pub const SIGNAL_PAGE_ADDED: &str = "page-added";
pub const SIGNAL_PAGE_CHANGED: &str = "page-changed";
pub const SIGNAL_PAGE_NODE_CHANGED: &str = "page-node-changed";
pub const SIGNAL_PAGE_REMOVED: &str = "page-removed";
pub const SIGNAL_LINK_ADDED: &str = "link-added";
pub const SIGNAL_LINK_REMOVED: &str = "link-removed";
pub const SIGNAL_TAG_ADDED: &str = "tag-added";
pub const SIGNAL_TAG_REMOVED: &str = "tag-removed";

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a connected handler, for [`SignalEmitter::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A delivered index event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// One of the `SIGNAL_*` names.
    pub name: &'static str,
    /// The page the event is about.
    pub page: PageName,
    /// Event payload: the link reference or tag name, where applicable.
    pub detail: Option<String>,
}

pub type SignalHandler = Arc<dyn Fn(&Signal) + Send + Sync>;

struct HandlerEntry {
    id: HandlerId,
    signal: &'static str,
    handler: SignalHandler,
}

/// Per-indexer signal registry and post-commit queue.
pub struct SignalEmitter {
    names: &'static [&'static str],
    handlers: Mutex<Vec<HandlerEntry>>,
    queued: Mutex<Vec<Signal>>,
}

impl SignalEmitter {
    #[must_use]
    pub fn new(names: &'static [&'static str]) -> Self {
        Self {
            names,
            handlers: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
        }
    }

    /// The signal names this emitter advertises.
    #[must_use]
    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }

    #[must_use]
    pub fn supports(&self, signal: &str) -> bool {
        self.names.contains(&signal)
    }

    /// Register a handler for one of the advertised signals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSignal`] if the name is not advertised
    /// by this emitter.
    pub fn connect(&self, signal: &str, handler: SignalHandler) -> Result<HandlerId> {
        let name = self
            .names
            .iter()
            .find(|name| **name == signal)
            .ok_or_else(|| Error::UnknownSignal(signal.to_string()))?;
        let id = HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push(HandlerEntry {
            id,
            signal: name,
            handler,
        });
        Ok(id)
    }

    /// Remove a handler; true if it was registered here.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|entry| entry.id != id);
        handlers.len() != before
    }

    /// Queue a signal for delivery after the transaction commits.
    pub fn queue(&self, name: &'static str, page: PageName, detail: Option<String>) {
        debug_assert!(self.supports(name));
        self.queued.lock().push(Signal { name, page, detail });
    }

    /// Deliver all queued signals; call only after a commit.
    pub fn emit_queued(&self) {
        let queued = std::mem::take(&mut *self.queued.lock());
        for signal in &queued {
            let handlers: Vec<SignalHandler> = self
                .handlers
                .lock()
                .iter()
                .filter(|entry| entry.signal == signal.name)
                .map(|entry| entry.handler.clone())
                .collect();
            for handler in handlers {
                handler(signal);
            }
        }
    }

    /// Drop queued signals; call when the transaction rolled back.
    pub fn discard_queued(&self) {
        self.queued.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const NAMES: &[&str] = &["alpha", "beta"];

    #[test]
    fn test_queue_then_emit() {
        let emitter = SignalEmitter::new(NAMES);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        emitter
            .connect(
                "alpha",
                Arc::new(move |signal: &Signal| {
                    assert_eq!(signal.page.as_str(), "A");
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        emitter.queue("alpha", PageName::new("A"), None);
        assert_eq!(count.load(Ordering::SeqCst), 0, "buffered until emit");

        emitter.emit_queued();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Queue drained; a second emit delivers nothing.
        emitter.emit_queued();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_discard_drops_signals() {
        let emitter = SignalEmitter::new(NAMES);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        emitter
            .connect("beta", Arc::new(move |_: &Signal| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        emitter.queue("beta", PageName::new("B"), None);
        emitter.discard_queued();
        emitter.emit_queued();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connect_unknown_signal() {
        let emitter = SignalEmitter::new(NAMES);
        assert!(emitter.connect("nope", Arc::new(|_: &Signal| {})).is_err());
    }

    #[test]
    fn test_disconnect() {
        let emitter = SignalEmitter::new(NAMES);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = emitter
            .connect("alpha", Arc::new(move |_: &Signal| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(emitter.disconnect(id));
        assert!(!emitter.disconnect(id));

        emitter.queue("alpha", PageName::new("A"), None);
        emitter.emit_queued();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
