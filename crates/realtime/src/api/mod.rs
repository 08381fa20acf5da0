//! Order API - the request/response call that yields the order id a
//! realtime subscription is opened for.

mod http;
mod refresh;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use topup_protocol::{OrderId, OrderStatus};

use crate::error::ApiError;

pub use http::HttpOrderApi;
pub use refresh::{AccessToken, RefreshCoordinator, TokenRefresher, TokenStore};

#[cfg(any(test, feature = "testing"))]
pub use refresh::MockTokenRefresher;

/// Checkout payload for a top-up order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub product_code: String,
    pub denomination_id: String,
    /// In-game account the top-up is credited to
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    pub quantity: u32,
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voucher_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Idempotency key; a retried checkout reuses the same value
    pub client_reference: Uuid,
}

impl CreateOrderRequest {
    pub fn new(
        product_code: impl Into<String>,
        denomination_id: impl Into<String>,
        account_id: impl Into<String>,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            product_code: product_code.into(),
            denomination_id: denomination_id.into(),
            account_id: account_id.into(),
            zone_id: None,
            quantity: 1,
            payment_method: payment_method.into(),
            voucher_code: None,
            contact: None,
            client_reference: Uuid::new_v4(),
        }
    }
}

/// What the server returns for a created order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_url: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderReceipt, ApiError>;
}
