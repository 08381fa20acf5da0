//! Event vocabulary for the real-time order channel
//!
//! Outbound events are a closed, serde-tagged enum. Inbound events are
//! identified by `EventKind`; their payloads stay as raw JSON because the
//! server attaches fields freely and listeners decide what they need.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::order::OrderId;

// =============================================================================
// Client Events (storefront → push server)
// =============================================================================

/// Events emitted by the client.
///
/// Serializes to the wire frame `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Establish identity on the connection
    Authenticate {
        #[serde(rename = "principalId")]
        principal_id: String,
    },
    /// Begin receiving updates for an order
    SubscribeTransaction {
        #[serde(rename = "orderId")]
        order_id: OrderId,
    },
    /// Stop receiving updates for an order
    UnsubscribeTransaction {
        #[serde(rename = "orderId")]
        order_id: OrderId,
    },
    /// Liveness check
    Ping,
}

impl ClientEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::SubscribeTransaction { .. } => "subscribe_transaction",
            ClientEvent::UnsubscribeTransaction { .. } => "unsubscribe_transaction",
            ClientEvent::Ping => "ping",
        }
    }

    pub fn authenticate(principal_id: impl Into<String>) -> Self {
        ClientEvent::Authenticate {
            principal_id: principal_id.into(),
        }
    }

    pub fn subscribe(order_id: impl Into<OrderId>) -> Self {
        ClientEvent::SubscribeTransaction {
            order_id: order_id.into(),
        }
    }

    pub fn unsubscribe(order_id: impl Into<OrderId>) -> Self {
        ClientEvent::UnsubscribeTransaction {
            order_id: order_id.into(),
        }
    }
}

// =============================================================================
// Inbound Event Kinds (push server → storefront, plus local lifecycle)
// =============================================================================

/// Kind of an inbound event, used as the key of the listener registry.
///
/// The lifecycle kinds (`Connect`, `Disconnect`, `ConnectError`, `Reconnect`,
/// `ReconnectError`) are synthesized by the client from transport state and
/// are never accepted from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connect,
    Disconnect,
    Authenticated,
    AuthenticationError,
    ConnectError,
    Reconnect,
    ReconnectError,
    Subscribed,
    Unsubscribed,
    TransactionCreated,
    TransactionUpdate,
    TransactionLogUpdate,
    PaymentProcessing,
    PaymentProgress,
    PaymentCompleted,
    PaymentError,
    PaymentCallbackReceived,
    TransactionError,
    UserTransactionUpdate,
    NewTransaction,
    PaymentResult,
    TransactionLogsHistory,
    Pong,
}

impl EventKind {
    pub const ALL: [EventKind; 23] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Authenticated,
        EventKind::AuthenticationError,
        EventKind::ConnectError,
        EventKind::Reconnect,
        EventKind::ReconnectError,
        EventKind::Subscribed,
        EventKind::Unsubscribed,
        EventKind::TransactionCreated,
        EventKind::TransactionUpdate,
        EventKind::TransactionLogUpdate,
        EventKind::PaymentProcessing,
        EventKind::PaymentProgress,
        EventKind::PaymentCompleted,
        EventKind::PaymentError,
        EventKind::PaymentCallbackReceived,
        EventKind::TransactionError,
        EventKind::UserTransactionUpdate,
        EventKind::NewTransaction,
        EventKind::PaymentResult,
        EventKind::TransactionLogsHistory,
        EventKind::Pong,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Authenticated => "authenticated",
            EventKind::AuthenticationError => "authentication_error",
            EventKind::ConnectError => "connect_error",
            EventKind::Reconnect => "reconnect",
            EventKind::ReconnectError => "reconnect_error",
            EventKind::Subscribed => "subscribed",
            EventKind::Unsubscribed => "unsubscribed",
            EventKind::TransactionCreated => "transaction_created",
            EventKind::TransactionUpdate => "transaction_update",
            EventKind::TransactionLogUpdate => "transaction_log_update",
            EventKind::PaymentProcessing => "payment_processing",
            EventKind::PaymentProgress => "payment_progress",
            EventKind::PaymentCompleted => "payment_completed",
            EventKind::PaymentError => "payment_error",
            EventKind::PaymentCallbackReceived => "payment_callback_received",
            EventKind::TransactionError => "transaction_error",
            EventKind::UserTransactionUpdate => "user_transaction_update",
            EventKind::NewTransaction => "new_transaction",
            EventKind::PaymentResult => "payment_result",
            EventKind::TransactionLogsHistory => "transaction_logs_history",
            EventKind::Pong => "pong",
        }
    }

    /// Kinds produced by the client itself from transport state.
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            EventKind::Connect
                | EventKind::Disconnect
                | EventKind::ConnectError
                | EventKind::Reconnect
                | EventKind::ReconnectError
        )
    }

    /// Kinds whose payload refers to a single order through `orderId`.
    ///
    /// `user_transaction_update` and `new_transaction` are principal-wide
    /// broadcasts and are deliberately excluded.
    pub fn is_order_scoped(self) -> bool {
        matches!(
            self,
            EventKind::Subscribed
                | EventKind::Unsubscribed
                | EventKind::TransactionCreated
                | EventKind::TransactionUpdate
                | EventKind::TransactionLogUpdate
                | EventKind::PaymentProcessing
                | EventKind::PaymentProgress
                | EventKind::PaymentCompleted
                | EventKind::PaymentError
                | EventKind::PaymentCallbackReceived
                | EventKind::TransactionError
                | EventKind::PaymentResult
                | EventKind::TransactionLogsHistory
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognized event name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}
