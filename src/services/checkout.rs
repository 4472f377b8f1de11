//! Checkout orchestration: the two-phase create-order / verify-payment flow.
//!
//! `create_order` registers the amount with the gateway and stores a Pending
//! order; the storefront then opens hosted checkout, and `verify_payment`
//! checks the gateway's signature before flipping the order to Paid and
//! sending the order emails.

use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{validate_email, Validate, ValidationError};

use crate::config::AppConfig;
use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::notifications::{templates, Mailer};
use crate::repositories::{NewOrder, NewOrderItem, OrderStore, PaidTransition};
use crate::services::gateway::{CreateGatewayOrder, GatewayOrder, PaymentGateway};
use crate::services::{money, signature};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Largest amount a `decimal(12, 2)` column holds.
pub const MAX_AMOUNT: Decimal = dec!(9999999999.99);

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

// Stored trimmed, so checked trimmed.
fn trimmed_email(value: &str) -> Result<(), ValidationError> {
    if !validate_email(value.trim()) {
        return Err(ValidationError::new("email"));
    }
    Ok(())
}

fn check_amount(value: Decimal, field: &str) -> Result<(), ServiceError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be negative",
            field
        )));
    }
    if value > MAX_AMOUNT {
        return Err(ServiceError::ValidationError(format!(
            "{} is out of range",
            field
        )));
    }
    Ok(())
}

/// One line of the storefront cart, as the frontend sends it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    /// Catalogue product id
    #[schema(example = 7)]
    pub id: Option<i64>,
    #[serde(default)]
    #[schema(example = "Model A")]
    pub title: String,
    /// Defaults to 1
    pub quantity: Option<i32>,
    /// Base price, used when `total_price` is absent
    pub price: Option<Decimal>,
    /// Per-unit price with option adjustments applied
    pub total_price: Option<Decimal>,
    #[serde(rename = "selectedOptions")]
    #[schema(value_type = Option<Object>)]
    pub selected_options: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub full_name: String,
    #[serde(default)]
    #[validate(custom = "trimmed_email")]
    pub email: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub phone: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub address: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub city: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub state: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub pincode: String,
    #[serde(default)]
    pub cart: Vec<CartLine>,
    /// Cart total in rupees, excluding shipping
    #[schema(example = 500)]
    pub total: Option<Decimal>,
    #[serde(rename = "shippingCharge")]
    #[schema(example = 100)]
    pub shipping_charge: Option<Decimal>,
    /// Optional client token; retries with the same token return the same order
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub razorpay: GatewayOrder,
    #[serde(rename = "orderId")]
    pub order_id: Uuid,
    /// Public gateway key id for opening hosted checkout
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    #[schema(example = "Payment verified successfully")]
    pub message: String,
}

/// Order header and items that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOrder {
    pub total: Decimal,
    pub shipping_charge: Decimal,
    pub items: Vec<NewOrderItem>,
}

/// Checks a create-order request before anything touches the gateway or database.
pub fn validate_create_order(request: &CreateOrderRequest) -> Result<ValidatedOrder, ServiceError> {
    request.validate()?;

    let total = request
        .total
        .ok_or_else(|| ServiceError::ValidationError("Missing or invalid fields: total".into()))?;
    check_amount(total, "total")?;

    let shipping_charge = request.shipping_charge.unwrap_or(Decimal::ZERO);
    check_amount(shipping_charge, "shippingCharge")?;

    if request.cart.is_empty() {
        return Err(ServiceError::ValidationError("Cart is empty".into()));
    }

    let mut items = Vec::with_capacity(request.cart.len());
    let mut lines_total = Decimal::ZERO;
    for (index, line) in request.cart.iter().enumerate() {
        let item = validate_cart_line(index, line)?;
        lines_total = item
            .price
            .checked_mul(Decimal::from(item.quantity))
            .and_then(|line_total| lines_total.checked_add(line_total))
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("cart[{}]: price is out of range", index))
            })?;
        items.push(item);
    }

    if total < lines_total {
        return Err(ServiceError::ValidationError(format!(
            "total {} is less than the sum of cart lines {}",
            total, lines_total
        )));
    }

    Ok(ValidatedOrder {
        total,
        shipping_charge,
        items,
    })
}

fn validate_cart_line(index: usize, line: &CartLine) -> Result<NewOrderItem, ServiceError> {
    let invalid = |what: &str| ServiceError::ValidationError(format!("cart[{}]: {}", index, what));

    let product_id = line.id.ok_or_else(|| invalid("id is required"))?;
    if line.title.trim().is_empty() {
        return Err(invalid("title is required"));
    }

    let quantity = line.quantity.unwrap_or(1);
    if quantity < 1 {
        return Err(invalid("quantity must be at least 1"));
    }

    let price = line.total_price.or(line.price).unwrap_or(Decimal::ZERO);
    if price.is_sign_negative() && !price.is_zero() {
        return Err(invalid("price must not be negative"));
    }
    if price > MAX_AMOUNT {
        return Err(invalid("price is out of range"));
    }

    let selected_options = match &line.selected_options {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(v @ Value::Object(_)) => v.clone(),
        Some(_) => return Err(invalid("selectedOptions must be an object")),
    };

    Ok(NewOrderItem {
        product_id,
        product_title: line.title.trim().to_string(),
        quantity,
        price,
        selected_options,
    })
}

fn normalize_idempotency_key(key: Option<String>) -> Result<Option<String>, ServiceError> {
    match key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
        Some(k) if k.len() > MAX_IDEMPOTENCY_KEY_LEN => Err(ServiceError::ValidationError(
            "idempotency key is too long".into(),
        )),
        other => Ok(other),
    }
}

/// Static settings the checkout flow needs from configuration.
#[derive(Clone)]
pub struct CheckoutSettings {
    pub key_id: String,
    pub key_secret: String,
    pub currency: String,
    pub merchant_email: String,
    pub store_name: String,
}

impl std::fmt::Debug for CheckoutSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutSettings")
            .field("key_id", &self.key_id)
            .field("currency", &self.currency)
            .field("merchant_email", &self.merchant_email)
            .field("store_name", &self.store_name)
            .finish_non_exhaustive()
    }
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            key_id: config.razorpay_key_id.clone(),
            key_secret: config.razorpay_key_secret.clone(),
            currency: config.payment_currency.clone(),
            merchant_email: config.merchant_email.clone(),
            store_name: config.store_name.clone(),
        }
    }
}

/// Coordinates the gateway, the order store and the mailer.
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            mailer,
            settings,
        }
    }

    fn response_for(&self, order: &OrderModel) -> Result<CreateOrderResponse, ServiceError> {
        Ok(CreateOrderResponse {
            success: true,
            razorpay: GatewayOrder {
                id: order.gateway_order_id.clone(),
                amount: money::to_minor_units(order.total_amount, order.shipping_charge)?,
                currency: order.currency.clone(),
            },
            order_id: order.id,
            key: self.settings.key_id.clone(),
        })
    }

    /// Phase one: register the amount with the gateway and store a Pending order.
    #[instrument(skip(self, request, idempotency_key), fields(cart_lines = request.cart.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        idempotency_key: Option<String>,
    ) -> Result<CreateOrderResponse, ServiceError> {
        let validated = validate_create_order(&request)?;
        let idempotency_key =
            normalize_idempotency_key(idempotency_key.or(request.idempotency_key.clone()))?;

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                info!(order_id = %existing.id, "Idempotent replay of create-order");
                return self.response_for(&existing);
            }
        }

        let amount = money::to_minor_units(validated.total, validated.shipping_charge)?;

        let mut gateway_request = CreateGatewayOrder::new(amount, self.settings.currency.clone());
        if let Some(key) = idempotency_key.as_deref() {
            gateway_request = gateway_request.with_note("idempotency_key", key);
        }
        let gateway_order = self.gateway.create_order(gateway_request).await?;

        let new_order = NewOrder {
            full_name: request.full_name.trim().to_string(),
            email: request.email.trim().to_string(),
            phone: request.phone.trim().to_string(),
            address: request.address.trim().to_string(),
            city: request.city.trim().to_string(),
            state: request.state.trim().to_string(),
            pincode: request.pincode.trim().to_string(),
            total_amount: validated.total,
            shipping_charge: validated.shipping_charge,
            currency: gateway_order.currency.clone(),
            gateway_order_id: gateway_order.id.clone(),
            idempotency_key: idempotency_key.clone(),
        };

        let order_id = match self
            .store
            .create_order_with_items(new_order, validated.items)
            .await
        {
            Ok(id) => id,
            Err(ServiceError::Conflict(_)) if idempotency_key.is_some() => {
                counter!("storefront_checkout.orphaned_gateway_orders", 1);
                error!(
                    gateway_order_id = %gateway_order.id,
                    "Concurrent create-order with the same idempotency key; gateway order orphaned"
                );
                let key = idempotency_key.as_deref().unwrap_or_default();
                let existing = self.store.find_by_idempotency_key(key).await?.ok_or_else(|| {
                    ServiceError::PersistenceError("idempotency key clash without an order".into())
                })?;
                return self.response_for(&existing);
            }
            Err(e) => {
                counter!("storefront_checkout.orphaned_gateway_orders", 1);
                error!(
                    gateway_order_id = %gateway_order.id,
                    error = %e,
                    "Order persistence failed; gateway order orphaned"
                );
                return Err(match e {
                    ServiceError::PersistenceError(_) => e,
                    other => ServiceError::PersistenceError(other.to_string()),
                });
            }
        };

        counter!("storefront_checkout.orders_created", 1);
        info!(order_id = %order_id, gateway_order_id = %gateway_order.id, amount, "Pending order created");

        Ok(CreateOrderResponse {
            success: true,
            razorpay: gateway_order,
            order_id,
            key: self.settings.key_id.clone(),
        })
    }

    /// Phase two: check the gateway signature, mark the order Paid, send emails.
    #[instrument(skip(self, request), fields(gateway_order_id = request.razorpay_order_id.as_deref().unwrap_or_default()))]
    pub async fn verify_payment(
        &self,
        request: VerifyPaymentRequest,
    ) -> Result<VerifyPaymentResponse, ServiceError> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let (Some(order_id), Some(payment_id), Some(provided)) = (
            present(&request.razorpay_order_id),
            present(&request.razorpay_payment_id),
            present(&request.razorpay_signature),
        ) else {
            let mut missing = Vec::new();
            if present(&request.razorpay_order_id).is_none() {
                missing.push("razorpay_order_id");
            }
            if present(&request.razorpay_payment_id).is_none() {
                missing.push("razorpay_payment_id");
            }
            if present(&request.razorpay_signature).is_none() {
                missing.push("razorpay_signature");
            }
            return Err(ServiceError::ValidationError(format!(
                "Missing or invalid fields: {}",
                missing.join(", ")
            )));
        };

        if !signature::verify(&order_id, &payment_id, &provided, &self.settings.key_secret) {
            counter!("storefront_checkout.signature_rejected", 1);
            warn!(gateway_order_id = %order_id, "Payment signature mismatch");
            return Err(ServiceError::AuthenticationError(format!(
                "signature mismatch for {}",
                order_id
            )));
        }

        let order = match self.store.mark_paid(&order_id, &payment_id).await? {
            PaidTransition::Transitioned(order) => order,
            PaidTransition::AlreadyPaid(order) => {
                info!(order_id = %order.id, "Payment already verified; skipping notifications");
                return Ok(verified());
            }
            PaidTransition::NotFound => {
                return Err(ServiceError::OrderNotFound(order_id));
            }
        };

        counter!("storefront_checkout.payments_verified", 1);
        info!(order_id = %order.id, payment_id = %payment_id, "Order marked paid");

        self.send_order_emails(order.id).await;

        Ok(verified())
    }

    async fn send_order_emails(&self, order_id: Uuid) {
        let order = match self.store.get_order_with_items(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_id = %order_id, "Paid order vanished before notification");
                return;
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Could not load order for notification");
                return;
            }
        };

        let messages = [
            templates::merchant_notification(
                &order,
                &self.settings.store_name,
                &self.settings.merchant_email,
            ),
            templates::customer_receipt(&order, &self.settings.store_name),
        ];

        for message in messages {
            let subject = message.subject.clone();
            if let Err(e) = self.mailer.send(message).await {
                counter!("storefront_checkout.email_failed", 1);
                warn!(order_id = %order_id, subject = %subject, error = %e, "Order email failed");
            }
        }
    }
}

fn verified() -> VerifyPaymentResponse {
    VerifyPaymentResponse {
        success: true,
        message: "Payment verified successfully".to_string(),
    }
}
