//! Health check route.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::server::AppState;
use crate::metrics::DeliveryMetricsSnapshot;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Delivery transports with credentials configured.
    pub channels: Vec<String>,
    pub metrics: DeliveryMetricsSnapshot,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses((status = 200, description = "Service is alive", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = &state.notification_service;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        channels: service
            .dispatchers()
            .enabled()
            .into_iter()
            .map(str::to_string)
            .collect(),
        metrics: service.metrics().snapshot(),
    })
}
