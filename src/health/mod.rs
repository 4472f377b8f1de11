/*!
 * # Health Check Module
 *
 * `/health` reports whether the service can reach its database. Load
 * balancers treat a 503 as "take this instance out of rotation".
 */

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

/// Basic health status
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Overall health information
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Basic health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database are up", body = HealthInfo),
        (status = 503, description = "Database unreachable", body = HealthInfo),
    ),
    tag = "Health"
)]
pub async fn health_check(
    State(db): State<Arc<DatabaseConnection>>,
) -> (StatusCode, Json<HealthInfo>) {
    let status = match crate::db::check_connection(&db).await {
        Ok(()) => HealthStatus::Up,
        Err(e) => {
            error!("Database health check failed: {}", e);
            HealthStatus::Down
        }
    };

    let code = if status == HealthStatus::Up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthInfo {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }),
    )
}

/// Health check routes, carrying their own database handle as state
pub fn health_routes(db: Arc<DatabaseConnection>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(db)
}
