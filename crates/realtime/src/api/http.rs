//! reqwest-backed order API client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{AccessToken, CreateOrderRequest, OrderApi, OrderReceipt, TokenStore};
use crate::config::RealtimeConfig;
use crate::error::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Order API over HTTP with bearer auth.
///
/// A 401 triggers one token refresh and one retry of the request.
#[derive(Clone)]
pub struct HttpOrderApi {
    client: Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl HttpOrderApi {
    pub fn new(base_url: &str, tokens: Arc<TokenStore>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn from_config(config: &RealtimeConfig, tokens: Arc<TokenStore>) -> Self {
        Self::new(config.api_url.as_str(), tokens)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_order(
        &self,
        token: &AccessToken,
        request: &CreateOrderRequest,
    ) -> Result<Response, ApiError> {
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .bearer_auth(token.as_str())
            .json(request)
            .send()
            .await?;
        Ok(response)
    }
}

/// Some deployments wrap the payload in `{"data": ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReceiptBody {
    Wrapped { data: OrderReceipt },
    Bare(OrderReceipt),
}

impl From<ReceiptBody> for OrderReceipt {
    fn from(body: ReceiptBody) -> Self {
        match body {
            ReceiptBody::Wrapped { data } => data,
            ReceiptBody::Bare(receipt) => receipt,
        }
    }
}

#[async_trait]
impl OrderApi for HttpOrderApi {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderReceipt, ApiError> {
        let token = self.tokens.token().await?;
        let mut response = self.post_order(&token, request).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("Access token rejected, refreshing before retry");
            let token = self.tokens.refresh().await?;
            response = self.post_order(&token, request).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(ApiError::Unauthorized);
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Order creation failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ReceiptBody = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let receipt = OrderReceipt::from(body);
        tracing::info!(order_id = %receipt.order_id, status = %receipt.status, "Order created");
        Ok(receipt)
    }
}
