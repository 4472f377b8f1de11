//! Payment gateway client.
//!
//! The checkout flow only needs one gateway call: register an order for a
//! given amount so the storefront can open hosted checkout against it.

use crate::config::AppConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

/// Gateway limit on the receipt reference.
pub const MAX_RECEIPT_LEN: usize = 40;

/// Order registration request sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateGatewayOrder {
    /// Amount in minor units (paise)
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub notes: BTreeMap<String, String>,
}

impl CreateGatewayOrder {
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            receipt: new_receipt(),
            notes: BTreeMap::new(),
        }
    }

    pub fn with_note(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.notes.insert(key.into(), value.into());
        self
    }
}

/// Short server-generated receipt reference, within the gateway's length limit.
pub fn new_receipt() -> String {
    let mut receipt = format!("rcpt_{}", uuid::Uuid::new_v4().simple());
    receipt.truncate(MAX_RECEIPT_LEN);
    receipt
}

/// Order handle returned by the gateway and relayed to the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GatewayOrder {
    /// Gateway order id, e.g. `order_Nq3xY1`
    #[schema(example = "order_Nq3xY1AbCdEf")]
    pub id: String,
    /// Amount in minor units
    #[schema(example = 60000)]
    pub amount: i64,
    #[schema(example = "INR")]
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers an order with the gateway.
    ///
    /// Every failure (transport, auth, rate limit, non-2xx, undecodable body)
    /// is reported as [`ServiceError::GatewayError`].
    async fn create_order(&self, request: CreateGatewayOrder) -> Result<GatewayOrder, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorBody {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Razorpay Orders API client using HTTP basic auth.
#[derive(Clone)]
pub struct RazorpayClient {
    client: reqwest::Client,
    api_base: String,
    key_id: String,
    key_secret: String,
}

impl std::fmt::Debug for RazorpayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayClient")
            .field("api_base", &self.api_base)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl RazorpayClient {
    pub fn new(
        api_base: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::ConfigError(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        Self::new(
            config.razorpay_api_base.clone(),
            config.razorpay_key_id.clone(),
            config.razorpay_key_secret.clone(),
            Duration::from_secs(config.gateway_timeout_secs),
        )
    }

    fn orders_url(&self) -> String {
        format!("{}/orders", self.api_base)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    #[instrument(skip(self, request), fields(amount = request.amount, receipt = %request.receipt))]
    async fn create_order(&self, request: CreateGatewayOrder) -> Result<GatewayOrder, ServiceError> {
        let response = self
            .client
            .post(self.orders_url())
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                counter!("storefront_gateway.create_order.failed", 1);
                error!(error = %e, "Gateway request failed");
                ServiceError::GatewayError(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<RazorpayErrorBody>(&body)
                .ok()
                .map(|b| {
                    format!(
                        "{}: {}",
                        b.error.code.unwrap_or_default(),
                        b.error.description.unwrap_or_default()
                    )
                })
                .unwrap_or(body);
            counter!("storefront_gateway.create_order.failed", 1);
            error!(status = %status, detail = %detail, "Gateway rejected order creation");
            return Err(ServiceError::GatewayError(format!(
                "gateway returned {}: {}",
                status, detail
            )));
        }

        let order: GatewayOrder = response.json().await.map_err(|e| {
            counter!("storefront_gateway.create_order.failed", 1);
            error!(error = %e, "Gateway response could not be decoded");
            ServiceError::GatewayError(format!("invalid gateway response: {}", e))
        })?;

        info!(gateway_order_id = %order.id, "Gateway order created");
        Ok(order)
    }
}
