//! Listener registry for inbound events.
//!
//! Listeners are keyed by `EventKind` and invoked in registration order.
//! Identity is the `Arc` pointer: registering the same listener twice yields
//! two independent registrations, and `remove` drops only the first match.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use topup_protocol::EventKind;

/// Callback invoked with the raw payload of an inbound event.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync + 'static>;

/// Wrap a closure as a `Listener`.
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: EventKind, listener: Listener) {
        self.listeners.entry(kind).or_default().push(listener);
    }

    /// Remove the first registration of `listener` for `kind`.
    ///
    /// Returns false if it was not registered.
    pub fn remove(&mut self, kind: EventKind, listener: &Listener) -> bool {
        let Some(list) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let Some(index) = list.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            self.listeners.remove(&kind);
        }
        true
    }

    /// Listeners for `kind`, in registration order.
    ///
    /// Dispatch works on this snapshot so listeners may register or remove
    /// listeners while being invoked.
    pub fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        self.listeners.get(&kind).cloned().unwrap_or_default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

/// Invoke each listener with `payload`.
///
/// A panicking listener is logged and skipped; the rest still run.
/// Returns the number of listeners that panicked.
pub fn invoke_all(kind: EventKind, listeners: &[Listener], payload: &Value) -> usize {
    let mut failures = 0;
    for (index, listener) in listeners.iter().enumerate() {
        let result = catch_unwind(AssertUnwindSafe(|| listener(payload)));
        if let Err(panic) = result {
            failures += 1;
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(
                event = %kind,
                listener = index,
                "Listener panicked: {}",
                message
            );
        }
    }
    failures
}
