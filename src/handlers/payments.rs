use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::HeaderMap,
    routing::post,
    Router,
};

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::{
    CreateOrderRequest, CreateOrderResponse, VerifyPaymentRequest, VerifyPaymentResponse,
};

/// Header carrying the optional client retry token for create-order.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ServiceError::ValidationError(format!("Malformed request body: {}", rejection.body_text())))
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Create a gateway order and a Pending store order for the cart
#[utoipa::path(
    post,
    path = "/api/payment/create-order",
    summary = "Create order",
    description = "Registers the cart amount with the payment gateway and records a pending order",
    request_body = CreateOrderRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Retry token; repeated calls with the same key return the same order"),
    ),
    responses(
        (status = 200, description = "Gateway order created", body = CreateOrderResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid or malformed request", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway or database failure", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<Json<CreateOrderResponse>, ServiceError> {
    let request = json_body(payload)?;
    let response = state
        .checkout
        .create_order(request, idempotency_key(&headers))
        .await?;
    Ok(Json(response))
}

/// Verify the gateway's payment signature and mark the order paid
#[utoipa::path(
    post,
    path = "/api/payment/verify",
    summary = "Verify payment",
    description = "Checks the payment signature, marks the order Paid/Completed and sends order emails",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified", body = VerifyPaymentResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Missing fields, bad signature or unknown order", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<VerifyPaymentResponse>, ServiceError> {
    let request = json_body(payload)?;
    let response = state.checkout.verify_payment(request).await?;
    Ok(Json(response))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-order", post(create_order))
        .route("/verify", post(verify_payment))
}
