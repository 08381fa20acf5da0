//! Test utilities for the realtime channel.
//!
//! Available under `cfg(test)` and with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! topup-realtime = { workspace = true, features = ["testing"] }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use topup_protocol::{ClientEvent, EventKind, ServerFrame};

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent, TransportEvents};

/// In-memory transport that records emits and lets tests push inbound events.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    fail_next_open: Option<String>,
    events: Option<TransportEvents>,
    emitted: Vec<ClientEvent>,
    opens: usize,
    closes: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `open` fail with a connect error.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.state().fail_next_open = Some(message.into());
    }

    pub fn emitted(&self) -> Vec<ClientEvent> {
        self.state().emitted.clone()
    }

    pub fn emitted_names(&self) -> Vec<&'static str> {
        self.state().emitted.iter().map(ClientEvent::name).collect()
    }

    pub fn clear_emitted(&self) {
        self.state().emitted.clear();
    }

    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Push a server frame. Returns false if nobody is listening.
    pub fn push(&self, kind: EventKind, data: Value) -> bool {
        self.push_event(TransportEvent::Frame(ServerFrame::new(kind, data)))
    }

    /// Push a raw frame, e.g. one with an unknown event name.
    pub fn push_frame(&self, frame: ServerFrame) -> bool {
        self.push_event(TransportEvent::Frame(frame))
    }

    pub fn push_event(&self, event: TransportEvent) -> bool {
        match &self.state().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate an unexpected drop of the socket.
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.state().connected = false;
        self.push_event(TransportEvent::Disconnected {
            reason: reason.to_string(),
        })
    }

    /// Simulate a successful transport-level reconnect.
    pub fn restore_connection(&self, attempt: u32) -> bool {
        self.state().connected = true;
        self.push_event(TransportEvent::Reconnected { attempt })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, events: TransportEvents) -> Result<(), TransportError> {
        let mut state = self.state();
        state.opens += 1;
        if let Some(message) = state.fail_next_open.take() {
            return Err(TransportError::Connect(message));
        }
        state.events = Some(events);
        state.connected = true;
        Ok(())
    }

    fn emit(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.emitted.push(event.clone());
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state();
        state.connected = false;
        state.events = None;
        state.closes += 1;
    }
}
