//! Real-time order channel.
//!
//! One channel owns one push connection for one principal. It authenticates
//! right after connecting, keeps the set of subscribed orders, and dispatches
//! inbound events to listeners registered per `EventKind`.
//!
//! Delivery is best-effort and at most once per connection lifetime: events
//! the server pushes while the socket is down are lost. Emits are never
//! queued; an emit without a live socket is logged and dropped.

mod connection;
mod listeners;
mod subscriptions;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use topup_protocol::{order_id_of, ClientEvent, EventKind, OrderId, ServerFrame};

use crate::config::{OrderFilter, RealtimeConfig};
use crate::error::{ChannelError, TransportError};
use crate::transport::{Transport, TransportEvent, WebSocketTransport};

pub use connection::{AuthState, Connection, ConnectionState};
pub use listeners::{invoke_all, listener, Listener, ListenerRegistry};
pub use subscriptions::{Subscription, SubscriptionSet};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client for server-pushed order and payment status.
///
/// Cheap to clone; clones share the same connection, listeners and
/// subscriptions.
#[derive(Clone)]
pub struct RealtimeOrderChannel {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    order_filter: OrderFilter,
    connection: watch::Sender<Connection>,
    listeners: Mutex<ListenerRegistry>,
    subscriptions: Mutex<SubscriptionSet>,
    ping_sent_at: Mutex<Option<Instant>>,
    last_round_trip: Mutex<Option<Duration>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeOrderChannel {
    pub fn new(transport: Arc<dyn Transport>, order_filter: OrderFilter) -> Self {
        let (connection, _) = watch::channel(Connection::default());
        Self {
            inner: Arc::new(Inner {
                transport,
                order_filter,
                connection,
                listeners: Mutex::new(ListenerRegistry::new()),
                subscriptions: Mutex::new(SubscriptionSet::default()),
                ping_sent_at: Mutex::new(None),
                last_round_trip: Mutex::new(None),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Channel over a WebSocket transport built from `config`.
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            Arc::new(WebSocketTransport::from_config(config)),
            config.order_filter,
        )
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open the transport and authenticate `principal_id`.
    ///
    /// Resolves once the transport is connected; authentication completes
    /// asynchronously and is observable through `connection()` and the
    /// `authenticated` / `authentication_error` listeners. The initial
    /// connect is not retried.
    pub async fn connect(&self, principal_id: &str) -> Result<(), ChannelError> {
        let principal_id = principal_id.trim();
        if principal_id.is_empty() {
            return Err(ChannelError::InvalidPrincipal);
        }

        let current = self.connection().state;
        match current {
            ConnectionState::Closed => return Err(ChannelError::Closed),
            ConnectionState::Disconnected => {}
            _ => {
                tracing::debug!(state = ?current, "connect() ignored, connection already active");
                return Ok(());
            }
        }

        let stale = lock(&self.inner.subscriptions).clear();
        if stale > 0 {
            tracing::debug!(stale, "Dropping subscriptions of the previous connection");
        }

        self.inner.connection.send_modify(|c| {
            c.state = ConnectionState::Connecting;
            c.auth = AuthState::Unauthenticated;
            c.principal_id = Some(principal_id.to_string());
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.inner.transport.open(events_tx).await {
            self.inner
                .connection
                .send_modify(|c| c.mark_disconnected(Some(e.to_string())));
            self.inner
                .dispatch(EventKind::ConnectError, &json!({ "message": e.to_string() }));
            return Err(ChannelError::TransportConnect(e));
        }

        if self.connection().is_closed() {
            // disconnect() raced with the open
            self.inner.transport.close().await;
            return Err(ChannelError::Closed);
        }

        self.inner.connection.send_modify(|c| {
            c.state = ConnectionState::Connected;
            c.last_error = None;
        });
        tracing::info!(principal_id = %principal_id, "Realtime channel connected");

        let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), events_rx));
        if let Some(previous) = lock(&self.inner.pump).replace(pump) {
            previous.abort();
        }

        self.inner.dispatch(EventKind::Connect, &Value::Null);
        self.authenticate(principal_id);
        Ok(())
    }

    /// Send an authentication request for `principal_id`.
    ///
    /// The outcome arrives as an `authenticated` or `authentication_error`
    /// event.
    pub fn authenticate(&self, principal_id: &str) {
        if self.connection().is_closed() {
            tracing::debug!("authenticate() on closed channel ignored");
            return;
        }
        self.inner.connection.send_modify(|c| {
            c.auth = AuthState::Pending;
            c.principal_id = Some(principal_id.to_string());
        });
        self.inner.emit(ClientEvent::authenticate(principal_id));
    }

    /// Tear down the transport and drop all subscriptions and listeners.
    ///
    /// Terminal: the channel cannot be reconnected afterwards.
    pub async fn disconnect(&self) {
        let mut newly_closed = false;
        self.inner.connection.send_modify(|c| {
            if !c.is_closed() {
                newly_closed = true;
                c.state = ConnectionState::Closed;
                c.auth = AuthState::Unauthenticated;
            }
        });
        if !newly_closed {
            return;
        }

        let dropped_subscriptions = lock(&self.inner.subscriptions).clear();
        lock(&self.inner.listeners).clear();
        self.inner.transport.close().await;
        if let Some(pump) = lock(&self.inner.pump).take() {
            pump.abort();
        }
        tracing::info!(
            dropped_subscriptions,
            "Realtime channel disconnected"
        );
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Start receiving updates for `order_id`.
    ///
    /// Requires a live connection, authenticated or not. The set is
    /// idempotent but the `subscribe_transaction` emit is sent on every call.
    /// Never fails: without a live connection the call is a silent no-op and
    /// nothing is queued for later.
    pub fn subscribe_to_order(&self, order_id: impl Into<OrderId>) {
        let order_id = order_id.into();
        let connection = self.connection();
        if !connection.is_live() {
            tracing::debug!(
                order_id = %order_id,
                state = ?connection.state,
                "subscribe without a live connection ignored"
            );
            return;
        }
        let added = lock(&self.inner.subscriptions).insert(order_id.clone());
        tracing::debug!(order_id = %order_id, added, "Subscribing to order");
        self.inner.emit(ClientEvent::subscribe(order_id));
    }

    /// Stop receiving updates for `order_id`. No-op if not subscribed.
    pub fn unsubscribe_from_order(&self, order_id: impl Into<OrderId>) {
        let order_id = order_id.into();
        if !lock(&self.inner.subscriptions).remove(order_id.as_str()) {
            return;
        }
        tracing::debug!(order_id = %order_id, "Unsubscribing from order");
        self.inner.emit(ClientEvent::unsubscribe(order_id));
    }

    pub fn is_subscribed(&self, order_id: &str) -> bool {
        lock(&self.inner.subscriptions).contains(order_id)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.inner.subscriptions).list()
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register `listener` for `kind`. Returns the same handle for `off`.
    pub fn on(&self, kind: EventKind, listener: Listener) -> Listener {
        if self.connection().is_closed() {
            tracing::debug!(event = %kind, "on() on closed channel ignored");
            return listener;
        }
        lock(&self.inner.listeners).add(kind, Arc::clone(&listener));
        listener
    }

    /// Register a closure for `kind`.
    pub fn on_fn<F>(&self, kind: EventKind, f: F) -> Listener
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(kind, listener(f))
    }

    /// Remove the first registration of `listener` for `kind`.
    pub fn off(&self, kind: EventKind, listener: &Listener) -> bool {
        lock(&self.inner.listeners).remove(kind, listener)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.listeners).count(kind)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Send a liveness check. The round trip is recorded when `pong` arrives.
    pub fn ping(&self) {
        *lock(&self.inner.ping_sent_at) = Some(Instant::now());
        self.inner.emit(ClientEvent::Ping);
    }

    pub fn last_round_trip(&self) -> Option<Duration> {
        *lock(&self.inner.last_round_trip)
    }

    pub fn connection(&self) -> Connection {
        self.inner.connection.borrow().clone()
    }

    /// Receiver that observes every connection state change.
    pub fn watch_connection(&self) -> watch::Receiver<Connection> {
        self.inner.connection.subscribe()
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.connection.borrow().is_closed()
    }

    fn emit(&self, event: ClientEvent) {
        if self.is_closed() {
            tracing::debug!(event = event.name(), "Emit on closed channel dropped");
            return;
        }
        match self.transport.emit(&event) {
            Ok(()) => tracing::trace!(event = event.name(), "Emitted"),
            Err(TransportError::NotConnected) => {
                tracing::warn!(event = event.name(), "Not connected, emit dropped");
            }
            Err(e) => tracing::warn!(event = event.name(), "Emit failed: {}", e),
        }
    }

    fn resubscribe_all(&self) {
        let order_ids = lock(&self.subscriptions).order_ids();
        for order_id in order_ids {
            self.emit(ClientEvent::subscribe(order_id));
        }
    }

    fn dispatch(&self, kind: EventKind, payload: &Value) {
        let snapshot = {
            let listeners = lock(&self.listeners);
            if self.is_closed() {
                return;
            }
            listeners.snapshot(kind)
        };
        if snapshot.is_empty() {
            tracing::trace!(event = %kind, "No listeners");
            return;
        }
        invoke_all(kind, &snapshot, payload);
    }

    /// Whether an order-scoped event passes the subscription filter.
    ///
    /// Subscribe/unsubscribe acknowledgments always pass; the unsubscribe
    /// ack arrives after the order already left the set.
    fn accepts(&self, kind: EventKind, payload: &Value) -> bool {
        if self.order_filter == OrderFilter::Broadcast
            || !kind.is_order_scoped()
            || matches!(kind, EventKind::Subscribed | EventKind::Unsubscribed)
        {
            return true;
        }
        match order_id_of(payload) {
            Some(order_id) => lock(&self.subscriptions).contains(order_id),
            None => true,
        }
    }

    fn handle_frame(&self, frame: ServerFrame) {
        let kind = match frame.kind() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::debug!("Ignoring frame: {}", e);
                return;
            }
        };
        if kind.is_lifecycle() {
            tracing::debug!(event = %kind, "Ignoring lifecycle event sent by server");
            return;
        }

        match kind {
            EventKind::Authenticated => {
                self.connection.send_modify(|c| c.auth = AuthState::Authenticated);
                tracing::info!("Principal authenticated");
            }
            EventKind::AuthenticationError => {
                let reason = error_message(&frame.data);
                tracing::warn!("Authentication rejected: {}", reason);
                self.connection.send_modify(|c| {
                    c.auth = AuthState::Rejected;
                    c.last_error = Some(ChannelError::Authentication(reason).to_string());
                });
            }
            EventKind::Pong => {
                if let Some(sent_at) = lock(&self.ping_sent_at).take() {
                    let rtt = sent_at.elapsed();
                    *lock(&self.last_round_trip) = Some(rtt);
                    tracing::debug!(rtt_ms = rtt.as_millis() as u64, "Pong received");
                }
            }
            _ => {}
        }

        if !self.accepts(kind, &frame.data) {
            tracing::trace!(event = %kind, "Dropping event for unsubscribed order");
            return;
        }
        self.dispatch(kind, &frame.data);
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.handle_frame(frame),
            TransportEvent::Disconnected { reason } => {
                tracing::warn!("Realtime connection lost: {}", reason);
                self.connection
                    .send_modify(|c| c.mark_disconnected(Some(reason.clone())));
                self.dispatch(EventKind::Disconnect, &json!({ "reason": reason }));
            }
            TransportEvent::Reconnecting { attempt } => {
                tracing::debug!(attempt, "Transport reconnecting");
                self.connection.send_modify(|c| {
                    if !c.is_closed() {
                        c.state = ConnectionState::Reconnecting;
                    }
                });
            }
            TransportEvent::Reconnected { attempt } => {
                tracing::info!(attempt, "Transport reconnected");
                let mut principal = None;
                self.connection.send_modify(|c| {
                    if !c.is_closed() {
                        c.state = ConnectionState::Connected;
                        c.last_error = None;
                        principal = c.principal_id.clone();
                    }
                });
                self.dispatch(EventKind::Connect, &Value::Null);
                self.dispatch(EventKind::Reconnect, &json!({ "attempt": attempt }));
                if let Some(principal) = principal {
                    self.connection.send_modify(|c| c.auth = AuthState::Pending);
                    self.emit(ClientEvent::authenticate(principal));
                }
                self.resubscribe_all();
            }
            TransportEvent::ReconnectFailed { error, exhausted } => {
                self.connection.send_modify(|c| {
                    c.last_error = Some(error.clone());
                    if exhausted {
                        c.mark_disconnected(None);
                    }
                });
                self.dispatch(
                    EventKind::ReconnectError,
                    &json!({ "message": error, "exhausted": exhausted }),
                );
            }
        }
    }
}

/// Drain transport events in arrival order until the transport or the
/// channel goes away.
async fn pump(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.is_closed() {
            break;
        }
        inner.handle_transport_event(event);
    }
    tracing::debug!("Realtime event pump stopped");
}

fn error_message(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}
