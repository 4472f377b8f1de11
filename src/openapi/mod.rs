use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Checkout API",
        version = "0.1.0",
        description = r#"
# Storefront Checkout API

Two-phase payment flow for the storefront cart:

1. `POST /api/payment/create-order` registers the cart amount with the payment
   gateway and records a pending order. The response carries the gateway
   order handle and the public key id used to open hosted checkout.
2. `POST /api/payment/verify` checks the signature the gateway returned to
   the browser, marks the order paid and sends the order emails.

## Error Handling

Every failure uses the same body:

```json
{
  "success": false,
  "error": "Bad Request",
  "message": "Invalid payment signature",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        crate::handlers::payments::create_order,
        crate::handlers::payments::verify_payment,
        crate::health::health_check,
    ),
    components(schemas(
        crate::services::checkout::CartLine,
        crate::services::checkout::CreateOrderRequest,
        crate::services::checkout::CreateOrderResponse,
        crate::services::checkout::VerifyPaymentRequest,
        crate::services::checkout::VerifyPaymentResponse,
        crate::services::gateway::GatewayOrder,
        crate::health::HealthInfo,
        crate::health::HealthStatus,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "Payments", description = "Checkout and payment verification"),
        (name = "Health", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Serves the generated OpenAPI document as JSON
pub fn openapi_routes() -> Router {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
