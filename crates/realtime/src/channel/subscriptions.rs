//! Set of orders the channel is subscribed to.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use topup_protocol::OrderId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SubscriptionSet {
    inner: HashMap<OrderId, Subscription>,
}

impl SubscriptionSet {
    /// Insert `order_id`. Returns false if it was already present; the
    /// original creation time is kept.
    pub fn insert(&mut self, order_id: OrderId) -> bool {
        if self.inner.contains_key(&order_id) {
            return false;
        }
        let subscription = Subscription {
            order_id: order_id.clone(),
            created_at: Utc::now(),
        };
        self.inner.insert(order_id, subscription);
        true
    }

    pub fn remove(&mut self, order_id: &str) -> bool {
        self.inner.remove(order_id).is_some()
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.inner.contains_key(order_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Subscriptions ordered by creation time.
    pub fn list(&self) -> Vec<Subscription> {
        let mut list: Vec<Subscription> = self.inner.values().cloned().collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        list
    }

    pub fn order_ids(&self) -> Vec<OrderId> {
        self.list().into_iter().map(|s| s.order_id).collect()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.inner.len();
        self.inner.clear();
        count
    }
}
