//! Transport seam between the channel and the push server.
//!
//! The channel never touches sockets. A transport opens the connection,
//! sends outbound events, and reports inbound frames plus its own lifecycle
//! (drops, reconnection attempts) through an unbounded channel. Reconnection
//! policy lives entirely here.

mod backoff;
mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use topup_protocol::{ClientEvent, ServerFrame};

use crate::error::TransportError;

pub use backoff::{BackoffState, ReconnectPolicy};
pub use websocket::WebSocketTransport;

/// Notifications a transport pushes to its owner after `open` succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded frame from the server, in arrival order.
    Frame(ServerFrame),
    /// The socket dropped. Reconnection may follow.
    Disconnected { reason: String },
    /// About to retry after an unexpected drop.
    Reconnecting { attempt: u32 },
    /// A retry succeeded; the socket is live again.
    Reconnected { attempt: u32 },
    /// A retry failed. `exhausted` is set when no more attempts will be made.
    ReconnectFailed { error: String, exhausted: bool },
}

pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and resolve once the server accepted the connection.
    ///
    /// Subsequent frames and lifecycle changes are pushed into `events`.
    async fn open(&self, events: TransportEvents) -> Result<(), TransportError>;

    /// Best-effort send; `TransportError::NotConnected` when there is no live socket.
    fn emit(&self, event: &ClientEvent) -> Result<(), TransportError>;

    /// Intentional teardown. Suppresses reconnection.
    async fn close(&self);
}
