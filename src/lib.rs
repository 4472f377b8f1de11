//! Storefront checkout API
//!
//! Two-phase payment pipeline for the storefront: gateway order creation,
//! transactional order persistence, payment signature verification and
//! order emails.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{extract::DefaultBodyLimit, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::notifications::Mailer;
use crate::repositories::SeaOrmOrderStore;
use crate::services::checkout::{CheckoutService, CheckoutSettings};
use crate::services::gateway::PaymentGateway;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub checkout: Arc<CheckoutService>,
}

impl AppState {
    /// Wires the checkout service over the database with the given gateway and mailer.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let store = Arc::new(SeaOrmOrderStore::new(db.clone()));
        let checkout = CheckoutService::new(
            store,
            gateway,
            mailer,
            CheckoutSettings::from(&config),
        );

        Self {
            db,
            config,
            checkout: Arc::new(checkout),
        }
    }
}

/// Payment API routes, mounted under `/api/payment`
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/api/payment", handlers::payments::payment_routes())
}

/// Full application router: API, health, OpenAPI document, request ids,
/// HTTP tracing and the body size limit. CORS is layered on by the binary.
pub fn app_router(state: AppState) -> Router {
    let max_body_size = state.config.max_body_size;
    let db = state.db.clone();

    api_routes()
        .with_state(state)
        .merge(health::health_routes(db))
        .merge(openapi::openapi_routes())
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
}
