mod common;

use axum::http::{Method, StatusCode};
use axum::body::Body;
use common::{cart_body, response_json, scenario_body, TestApp, KEY_ID};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::entities::{OrderStatus, PaymentStatus};
use storefront_api::repositories::{OrderStore, SeaOrmOrderStore};
use uuid::Uuid;

async fn load_order(app: &TestApp, order_id: &str) -> storefront_api::repositories::OrderWithItems {
    let id = Uuid::parse_str(order_id).expect("orderId is a uuid");
    SeaOrmOrderStore::new(app.db.clone())
        .get_order_with_items(id)
        .await
        .expect("load order")
        .expect("order exists")
}

#[tokio::test]
async fn worked_scenario_creates_pending_order_with_one_item() {
    let app = TestApp::new().await;

    let (status, body) = app.create_order(scenario_body()).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["razorpay"]["amount"], 60000);
    assert_eq!(body["razorpay"]["currency"], "INR");
    assert_eq!(body["key"], KEY_ID);

    assert_eq!(app.gateway.calls(), 1);
    assert_eq!(app.gateway.requests()[0].amount, 60000);

    let stored = load_order(&app, body["orderId"].as_str().unwrap()).await;
    assert_eq!(stored.order.gateway_order_id, body["razorpay"]["id"].as_str().unwrap());
    assert_eq!(stored.order.total_amount, dec!(500));
    assert_eq!(stored.order.shipping_charge, dec!(100));
    assert_eq!(stored.order.payment_status, PaymentStatus::Pending);
    assert_eq!(stored.order.order_status, OrderStatus::Processing);
    assert!(stored.order.payment_id.is_none());

    assert_eq!(stored.items.len(), 1);
    let item = &stored.items[0];
    assert_eq!(item.product_id, 7);
    assert_eq!(item.product_title, "Model A");
    assert_eq!(item.price, dec!(250));
    assert_eq!(item.quantity, 2);
    assert_eq!(
        item.selected_options,
        json!({"color": {"name": "Black", "price_adjustment": 0}})
    );
}

#[tokio::test]
async fn verified_payment_marks_order_paid_and_sends_both_emails() {
    let app = TestApp::new().await;
    let (_, created) = app.create_order(scenario_body()).await;
    let gateway_order_id = created["razorpay"]["id"].as_str().unwrap().to_string();

    let (status, body) = app.verify_signed(&gateway_order_id, "pay_ABC123").await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body, json!({"success": true, "message": "Payment verified successfully"}));

    let stored = load_order(&app, created["orderId"].as_str().unwrap()).await;
    assert_eq!(stored.order.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.order.order_status, OrderStatus::Completed);
    assert_eq!(stored.order.payment_id.as_deref(), Some("pay_ABC123"));
    assert!(stored.order.updated_at.is_some());

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, "owner@timekeepers.example");
    assert!(sent[0].subject.starts_with("New order received"));
    assert_eq!(sent[1].to, "asha@example.com");
    assert!(sent[1].subject.starts_with("Your order confirmation"));
    assert!(sent[1].html_body.contains("color: Black (+₹0)"));
}

#[tokio::test]
async fn repeated_verification_stays_paid_without_resending_email() {
    let app = TestApp::new().await;
    let (_, created) = app.create_order(scenario_body()).await;
    let gateway_order_id = created["razorpay"]["id"].as_str().unwrap().to_string();

    let (first, _) = app.verify_signed(&gateway_order_id, "pay_ABC123").await;
    let (second, body) = app.verify_signed(&gateway_order_id, "pay_ABC123").await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["success"], true);

    let stored = load_order(&app, created["orderId"].as_str().unwrap()).await;
    assert_eq!(stored.order.payment_status, PaymentStatus::Paid);
    assert_eq!(app.mailer.sent().len(), 2);
}

#[tokio::test]
async fn tampered_signature_is_rejected_and_order_stays_pending() {
    let app = TestApp::new().await;
    let (_, created) = app.create_order(scenario_body()).await;
    let gateway_order_id = created["razorpay"]["id"].as_str().unwrap().to_string();

    let mut sig = storefront_api::services::signature::expected_signature(
        &gateway_order_id,
        "pay_ABC123",
        common::KEY_SECRET,
    );
    let last = sig.pop().unwrap();
    sig.push(if last == '0' { '1' } else { '0' });

    let (status, body) = app
        .post_json(
            "/api/payment/verify",
            json!({
                "razorpay_order_id": gateway_order_id,
                "razorpay_payment_id": "pay_ABC123",
                "razorpay_signature": sig,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid payment signature");

    let stored = load_order(&app, created["orderId"].as_str().unwrap()).await;
    assert_eq!(stored.order.payment_status, PaymentStatus::Pending);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn unknown_gateway_order_is_rejected_without_mutation() {
    let app = TestApp::new().await;
    let (_, created) = app.create_order(scenario_body()).await;

    let (status, body) = app.verify_signed("order_NEVERISSUED", "pay_ABC123").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Order not found");

    let stored = load_order(&app, created["orderId"].as_str().unwrap()).await;
    assert_eq!(stored.order.payment_status, PaymentStatus::Pending);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn missing_verification_fields_are_rejected() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post_json(
            "/api/payment/verify",
            json!({"razorpay_order_id": "order_X", "razorpay_payment_id": ""}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Missing or invalid fields: razorpay_payment_id, razorpay_signature"
    );
}

#[tokio::test]
async fn empty_cart_is_rejected_before_gateway_and_database() {
    let app = TestApp::new().await;
    let mut body = scenario_body();
    body["cart"] = json!([]);

    let (status, response) = app.create_order(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["message"], "Cart is empty");
    assert_eq!(app.gateway.calls(), 0);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn oversized_line_price_is_a_400_not_a_crash() {
    let app = TestApp::new().await;
    let mut body = scenario_body();
    body["cart"][0]["total_price"] = json!("79228162514264337593543950335");

    let (status, response) = app.create_order(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {response}");
    assert_eq!(response["message"], "cart[0]: price is out of range");
    assert_eq!(app.gateway.calls(), 0);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn padded_email_is_accepted_and_stored_trimmed() {
    let app = TestApp::new().await;
    let mut body = scenario_body();
    body["email"] = json!("  asha@example.com ");

    let (status, created) = app.create_order(body).await;
    assert_eq!(status, StatusCode::OK, "body: {created}");

    let stored = load_order(&app, created["orderId"].as_str().unwrap()).await;
    assert_eq!(stored.order.email, "asha@example.com");
}

#[tokio::test]
async fn missing_customer_fields_are_named_in_the_error() {
    let app = TestApp::new().await;
    let mut body = scenario_body();
    body.as_object_mut().unwrap().remove("pincode");
    body["email"] = json!("not-an-email");

    let (status, response) = app.create_order(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["message"], "Missing or invalid fields: email, pincode");
    assert_eq!(app.gateway.calls(), 0);
}

#[tokio::test]
async fn gateway_failure_returns_generic_500_and_persists_nothing() {
    let app = TestApp::new().await;
    app.gateway.set_failing(true);

    let (status, body) = app.create_order(scenario_body()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Failed to create order");
    assert!(!body.to_string().contains("bad key"));
    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.item_count().await, 0);
}

#[tokio::test]
async fn failed_item_insert_rolls_back_the_whole_order() {
    let app = TestApp::new().await;
    app.execute_sql(
        "CREATE TRIGGER fail_item_999 BEFORE INSERT ON order_items \
         WHEN NEW.product_id = 999 BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    )
    .await;

    // Third of five lines trips the trigger.
    let (status, body) = app.create_order(cart_body(&[1, 2, 999, 4, 5])).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "body: {body}");
    assert_eq!(body["message"], "Failed to create order");
    assert_eq!(app.gateway.calls(), 1);
    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.item_count().await, 0);

    // The pool connection is usable again afterwards.
    let (status, _) = app.create_order(cart_body(&[1, 2, 3, 4, 5])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.item_count().await, 5);
}

#[tokio::test]
async fn email_failure_does_not_undo_payment() {
    let app = TestApp::new().await;
    app.mailer.set_failing(true);
    let (_, created) = app.create_order(scenario_body()).await;
    let gateway_order_id = created["razorpay"]["id"].as_str().unwrap().to_string();

    let (status, body) = app.verify_signed(&gateway_order_id, "pay_ABC123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let stored = load_order(&app, created["orderId"].as_str().unwrap()).await;
    assert_eq!(stored.order.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn idempotency_key_header_returns_the_same_order() {
    let app = TestApp::new().await;
    let headers = [("Idempotency-Key", "cart-2024-001")];

    let (first_status, first) = app
        .post_json_with_headers("/api/payment/create-order", scenario_body(), &headers)
        .await;
    let (second_status, second) = app
        .post_json_with_headers("/api/payment/create-order", scenario_body(), &headers)
        .await;

    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first["orderId"], second["orderId"]);
    assert_eq!(first["razorpay"], second["razorpay"]);
    assert_eq!(app.gateway.calls(), 1);
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn idempotency_key_in_body_is_honoured() {
    let app = TestApp::new().await;
    let mut body = scenario_body();
    body["idempotency_key"] = json!("body-key-1");

    let (_, first) = app.create_order(body.clone()).await;
    let (_, second) = app.create_order(body).await;
    assert_eq!(first["orderId"], second["orderId"]);
    assert_eq!(app.gateway.calls(), 1);
}

#[tokio::test]
async fn malformed_json_is_a_400_with_request_id() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/payment/create-order",
            Some(Body::from("{\"full_name\": ")),
            &[("x-request-id", "req-malformed-1")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-malformed-1"
    );
    let body = response_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["request_id"], "req-malformed-1");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Malformed request body"));
    assert_eq!(app.gateway.calls(), 0);
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "up");

    let response = app
        .request(Method::GET, "/api-docs/openapi.json", None, &[])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = response_json(response).await;
    assert!(doc["paths"]["/api/payment/verify"].is_object());
}
