#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use sea_orm::{
    ConnectionTrait, DatabaseBackend as DbBackend, DatabaseConnection, EntityTrait,
    PaginatorTrait, Statement,
};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{order, order_item},
    errors::ServiceError,
    notifications::{EmailMessage, Mailer, NotificationError},
    services::{
        gateway::{CreateGatewayOrder, GatewayOrder, PaymentGateway},
        signature,
    },
    AppState,
};
use tower::ServiceExt;

pub const KEY_ID: &str = "rzp_test_key";
pub const KEY_SECRET: &str = "test_key_secret";

/// Gateway stand-in that hands out sequential order ids and records requests.
#[derive(Default)]
pub struct FakeGateway {
    calls: AtomicUsize,
    fail: AtomicBool,
    requests: Mutex<Vec<CreateGatewayOrder>>,
}

impl FakeGateway {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CreateGatewayOrder> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, request: CreateGatewayOrder) -> Result<GatewayOrder, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("401 Unauthorized: bad key".into()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(GatewayOrder {
            id: format!("order_TEST{:04}", n),
            amount: request.amount,
            currency: request.currency,
        })
    }
}

/// Mailer stand-in that keeps every message it was asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("connection refused".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Application wired over a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<FakeGateway>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
        KEY_ID.to_string(),
        KEY_SECRET.to_string(),
    );
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.merchant_email = "owner@timekeepers.example".to_string();
    cfg
}

/// Single-connection in-memory database with the schema applied.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let cfg = test_config();
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");
    Arc::new(pool)
}

impl TestApp {
    pub async fn new() -> Self {
        let db = test_db().await;
        let gateway = Arc::new(FakeGateway::default());
        let mailer = Arc::new(RecordingMailer::default());

        let state = AppState::new(db.clone(), test_config(), gateway.clone(), mailer.clone());
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            db,
            gateway,
            mailer,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Body>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(body)
                .expect("request body"),
            None => builder.body(Body::empty()).expect("empty request"),
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// POSTs a JSON body and returns the status and decoded JSON response.
    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_json_with_headers(uri, body, &[]).await
    }

    pub async fn post_json_with_headers(
        &self,
        uri: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let response = self
            .request(Method::POST, uri, Some(Body::from(body.to_string())), headers)
            .await;
        let status = response.status();
        (status, response_json(response).await)
    }

    pub async fn create_order(&self, body: Value) -> (StatusCode, Value) {
        self.post_json("/api/payment/create-order", body).await
    }

    /// Verifies `gateway_order_id` with a correctly signed payment id.
    pub async fn verify_signed(&self, gateway_order_id: &str, payment_id: &str) -> (StatusCode, Value) {
        let sig = signature::expected_signature(gateway_order_id, payment_id, KEY_SECRET);
        self.post_json(
            "/api/payment/verify",
            json!({
                "razorpay_order_id": gateway_order_id,
                "razorpay_payment_id": payment_id,
                "razorpay_signature": sig,
            }),
        )
        .await
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(self.db.as_ref())
            .await
            .expect("count orders")
    }

    pub async fn item_count(&self) -> u64 {
        order_item::Entity::find()
            .count(self.db.as_ref())
            .await
            .expect("count order items")
    }

    pub async fn execute_sql(&self, sql: &str) {
        self.db
            .execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
            .await
            .expect("raw sql");
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Worked-example cart: one watch, quantity 2, 250 each, total 500 plus 100 shipping.
pub fn scenario_body() -> Value {
    json!({
        "full_name": "Asha Rao",
        "email": "asha@example.com",
        "phone": "9876543210",
        "address": "12 MG Road",
        "city": "Pune",
        "state": "MH",
        "pincode": "411001",
        "cart": [{
            "id": 7,
            "title": "Model A",
            "quantity": 2,
            "total_price": 250,
            "selectedOptions": {"color": {"name": "Black", "price_adjustment": 0}}
        }],
        "total": 500,
        "shippingCharge": 100
    })
}

/// Cart with `n` single-quantity lines priced 100 each.
pub fn cart_body(product_ids: &[i64]) -> Value {
    let cart: Vec<Value> = product_ids
        .iter()
        .map(|id| json!({"id": id, "title": format!("Watch {id}"), "price": 100}))
        .collect();
    let mut body = scenario_body();
    body["cart"] = Value::Array(cart);
    body["total"] = json!(100 * product_ids.len() as i64);
    body
}
