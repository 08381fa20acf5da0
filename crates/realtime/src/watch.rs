//! Follow a single order until it settles.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use topup_protocol::{EventKind, OrderId, OrderUpdate};

use crate::api::{CreateOrderRequest, OrderApi, OrderReceipt};
use crate::channel::RealtimeOrderChannel;
use crate::error::{ApiError, ChannelError};

/// Kinds that carry progress for a single order.
const WATCHED_KINDS: [EventKind; 11] = [
    EventKind::TransactionCreated,
    EventKind::TransactionUpdate,
    EventKind::TransactionLogUpdate,
    EventKind::PaymentProcessing,
    EventKind::PaymentProgress,
    EventKind::PaymentCompleted,
    EventKind::PaymentError,
    EventKind::PaymentCallbackReceived,
    EventKind::TransactionError,
    EventKind::PaymentResult,
    EventKind::TransactionLogsHistory,
];

type WeakListener = Weak<dyn Fn(&Value) + Send + Sync + 'static>;

/// Subscription to one order plus a stream of its updates.
///
/// Dropping the watch removes its listeners and unsubscribes. The stream
/// ends when the watch is stopped or the channel is disconnected.
pub struct OrderWatch {
    channel: RealtimeOrderChannel,
    order_id: OrderId,
    // Weak so a channel disconnect drops the senders and ends the stream
    registrations: Vec<(EventKind, WeakListener)>,
    updates: mpsc::UnboundedReceiver<OrderUpdate>,
    stopped: bool,
}

impl OrderWatch {
    pub fn start(channel: &RealtimeOrderChannel, order_id: impl Into<OrderId>) -> Self {
        let order_id = order_id.into();
        let (tx, updates) = mpsc::unbounded_channel();

        let registrations = WATCHED_KINDS
            .into_iter()
            .map(|kind| {
                let tx = tx.clone();
                let wanted = order_id.clone();
                let registered = channel.on_fn(kind, move |payload| {
                    let Some(update) = OrderUpdate::from_payload(kind, payload) else {
                        return;
                    };
                    if update.order_id == wanted {
                        let _ = tx.send(update);
                    }
                });
                (kind, Arc::downgrade(&registered))
            })
            .collect();

        channel.subscribe_to_order(order_id.clone());
        tracing::debug!(order_id = %order_id, "Watching order");

        Self {
            channel: channel.clone(),
            order_id,
            registrations,
            updates,
            stopped: false,
        }
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Next update for this order, or `None` once the stream has ended.
    pub async fn next_update(&mut self) -> Option<OrderUpdate> {
        self.updates.recv().await
    }

    /// Wait for a completed, failed or cancelled status.
    ///
    /// Non-terminal updates are skipped.
    pub async fn wait_terminal(&mut self) -> Result<OrderUpdate, ChannelError> {
        while let Some(update) = self.next_update().await {
            if update.is_terminal() {
                tracing::info!(
                    order_id = %update.order_id,
                    event = %update.kind,
                    "Order reached terminal status"
                );
                return Ok(update);
            }
        }
        Err(ChannelError::WatchEnded)
    }

    /// Remove listeners and unsubscribe. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for (kind, registered) in self.registrations.drain(..) {
            if let Some(registered) = registered.upgrade() {
                self.channel.off(kind, &registered);
            }
        }
        self.channel.unsubscribe_from_order(self.order_id.clone());
        self.updates.close();
    }
}

impl Drop for OrderWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Create an order and immediately start watching it.
pub async fn place_and_watch(
    api: &dyn OrderApi,
    channel: &RealtimeOrderChannel,
    request: &CreateOrderRequest,
) -> Result<(OrderReceipt, OrderWatch), ApiError> {
    let receipt = api.create_order(request).await?;
    let watch = OrderWatch::start(channel, receipt.order_id.clone());
    Ok((receipt, watch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockOrderApi;
    use crate::config::OrderFilter;
    use crate::testing::MockTransport;
    use serde_json::json;
    use topup_protocol::{ClientEvent, OrderStatus};

    async fn connected() -> (RealtimeOrderChannel, MockTransport) {
        let transport = MockTransport::new();
        let channel = RealtimeOrderChannel::new(Arc::new(transport.clone()), OrderFilter::Subscribed);
        channel.connect("user-1").await.unwrap();
        transport.clear_emitted();
        (channel, transport)
    }

    #[tokio::test]
    async fn start_subscribes_and_yields_updates_for_that_order() {
        let (channel, transport) = connected().await;
        let mut watch = OrderWatch::start(&channel, "ORD-1");
        assert_eq!(transport.emitted(), vec![ClientEvent::subscribe("ORD-1")]);
        assert!(channel.is_subscribed("ORD-1"));

        channel.subscribe_to_order("ORD-2");
        transport.push(EventKind::TransactionUpdate, json!({"orderId": "ORD-2", "status": "processing"}));
        transport.push(EventKind::PaymentProcessing, json!({"orderId": "ORD-1"}));

        let update = watch.next_update().await.unwrap();
        assert_eq!(update.order_id.as_str(), "ORD-1");
        assert_eq!(update.kind, EventKind::PaymentProcessing);
        assert_eq!(update.status, Some(OrderStatus::Processing));
    }

    #[tokio::test]
    async fn wait_terminal_skips_progress_updates() {
        let (channel, transport) = connected().await;
        let mut watch = OrderWatch::start(&channel, "ORD-1");

        transport.push(EventKind::PaymentProgress, json!({"orderId": "ORD-1", "percent": 50}));
        transport.push(EventKind::TransactionUpdate, json!({"orderId": "ORD-1", "status": "COMPLETED"}));

        let done = watch.wait_terminal().await.unwrap();
        assert_eq!(done.kind, EventKind::TransactionUpdate);
        assert_eq!(done.status, Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn drop_removes_listeners_and_unsubscribes() {
        let (channel, transport) = connected().await;
        let watch = OrderWatch::start(&channel, "ORD-1");
        assert_eq!(channel.listener_count(EventKind::TransactionUpdate), 1);

        drop(watch);

        assert_eq!(channel.listener_count(EventKind::TransactionUpdate), 0);
        assert!(!channel.is_subscribed("ORD-1"));
        assert_eq!(
            transport.emitted_names(),
            vec!["subscribe_transaction", "unsubscribe_transaction"]
        );
    }

    #[tokio::test]
    async fn disconnect_ends_the_watch() {
        let (channel, _transport) = connected().await;
        let mut watch = OrderWatch::start(&channel, "ORD-1");

        channel.disconnect().await;

        assert!(matches!(
            watch.wait_terminal().await,
            Err(ChannelError::WatchEnded)
        ));
    }

    #[tokio::test]
    async fn place_and_watch_subscribes_to_the_created_order() {
        let (channel, transport) = connected().await;
        let mut api = MockOrderApi::new();
        api.expect_create_order().times(1).returning(|_| {
            Ok(OrderReceipt {
                order_id: OrderId::from("ORD-9"),
                status: OrderStatus::Created,
                payment_url: None,
                amount: Some(15_000),
            })
        });

        let request = CreateOrderRequest::new("MLBB", "86-diamonds", "12345678", "qris");
        let (receipt, watch) = place_and_watch(&api, &channel, &request).await.unwrap();

        assert_eq!(receipt.order_id.as_str(), "ORD-9");
        assert_eq!(watch.order_id().as_str(), "ORD-9");
        assert_eq!(transport.emitted(), vec![ClientEvent::subscribe("ORD-9")]);
    }

    #[tokio::test]
    async fn place_and_watch_propagates_api_errors_without_subscribing() {
        let (channel, transport) = connected().await;
        let mut api = MockOrderApi::new();
        api.expect_create_order()
            .returning(|_| Err(ApiError::Unauthorized));

        let request = CreateOrderRequest::new("MLBB", "86-diamonds", "12345678", "qris");
        let result = place_and_watch(&api, &channel, &request).await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert!(channel.subscriptions().is_empty());
        assert!(transport.emitted().is_empty());
    }
}
