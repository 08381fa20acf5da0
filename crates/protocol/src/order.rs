//! Order identifiers, statuses and the typed view of order-scoped payloads

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::events::EventKind;

/// Opaque order/transaction identifier issued by the order API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&OrderId> for OrderId {
    fn from(value: &OrderId) -> Self {
        value.clone()
    }
}

impl Borrow<str> for OrderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Order status vocabulary.
///
/// Unrecognized values are kept in `Other` so a newer server never breaks
/// an older client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Created,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl OrderStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" => OrderStatus::Created,
            "processing" => OrderStatus::Processing,
            "completed" => OrderStatus::Completed,
            "failed" => OrderStatus::Failed,
            "cancelled" | "canceled" => OrderStatus::Cancelled,
            _ => OrderStatus::Other(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Other(raw) => raw,
        }
    }

    /// No further status change is expected after a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(OrderStatus::parse(&raw))
    }
}

/// Read the `orderId` field of an inbound payload, if any.
pub fn order_id_of(payload: &Value) -> Option<&str> {
    payload.get("orderId").and_then(Value::as_str)
}

/// Typed view of an order-scoped inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub kind: EventKind,
    pub order_id: OrderId,
    /// Explicit `status` field, or the status implied by the event kind.
    pub status: Option<OrderStatus>,
    pub payload: Value,
}

impl OrderUpdate {
    /// Build an update from a raw payload.
    ///
    /// Returns `None` for kinds that are not order-scoped or payloads
    /// without an `orderId`.
    pub fn from_payload(kind: EventKind, payload: &Value) -> Option<Self> {
        if !kind.is_order_scoped() {
            return None;
        }
        let order_id = order_id_of(payload)?;
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .map(OrderStatus::parse)
            .or_else(|| implied_status(kind));

        Some(Self {
            kind,
            order_id: OrderId::from(order_id),
            status,
            payload: payload.clone(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(OrderStatus::is_terminal)
    }
}

fn implied_status(kind: EventKind) -> Option<OrderStatus> {
    match kind {
        EventKind::TransactionCreated => Some(OrderStatus::Created),
        EventKind::PaymentProcessing => Some(OrderStatus::Processing),
        EventKind::PaymentCompleted => Some(OrderStatus::Completed),
        EventKind::PaymentError | EventKind::TransactionError => Some(OrderStatus::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_parsing_keeps_unknown_values() {
        assert_eq!(OrderStatus::parse("COMPLETED"), OrderStatus::Completed);
        assert_eq!(OrderStatus::parse("canceled"), OrderStatus::Cancelled);
        assert_eq!(
            OrderStatus::parse("refunded"),
            OrderStatus::Other("refunded".into())
        );
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(!OrderStatus::Other("refunded".into()).is_terminal());
    }

    #[test]
    fn update_prefers_explicit_status() {
        let payload = json!({"orderId": "ORD-1", "status": "processing"});
        let update = OrderUpdate::from_payload(EventKind::PaymentCompleted, &payload).unwrap();
        assert_eq!(update.order_id.as_str(), "ORD-1");
        assert_eq!(update.status, Some(OrderStatus::Processing));
        assert!(!update.is_terminal());
    }

    #[test]
    fn update_falls_back_to_implied_status() {
        let payload = json!({"orderId": "ORD-2", "message": "card declined"});
        let update = OrderUpdate::from_payload(EventKind::PaymentError, &payload).unwrap();
        assert_eq!(update.status, Some(OrderStatus::Failed));
        assert!(update.is_terminal());
    }

    #[test]
    fn update_requires_order_scope_and_id() {
        let payload = json!({"orderId": "ORD-3"});
        assert!(OrderUpdate::from_payload(EventKind::NewTransaction, &payload).is_none());
        assert!(OrderUpdate::from_payload(EventKind::TransactionUpdate, &json!({})).is_none());
    }
}
