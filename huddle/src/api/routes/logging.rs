//! Logging API routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/logging/filter",
        get(get_logging_filter).put(update_logging_filter),
    )
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogFilterResponse {
    pub filter: String,
}

#[utoipa::path(
    get,
    path = "/api/logging/filter",
    tag = "logging",
    responses((status = 200, description = "Active filter directive", body = LogFilterResponse))
)]
pub async fn get_logging_filter(State(state): State<AppState>) -> ApiResult<Json<LogFilterResponse>> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;
    Ok(Json(LogFilterResponse {
        filter: logging_config.get_filter(),
    }))
}

#[utoipa::path(
    put,
    path = "/api/logging/filter",
    tag = "logging",
    request_body = UpdateLogFilterRequest,
    responses(
        (status = 200, description = "Filter replaced", body = LogFilterResponse),
        (status = 422, description = "Invalid filter directive", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn update_logging_filter(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LogFilterResponse>> {
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;
    logging_config.set_filter(&request.filter)?;
    Ok(Json(LogFilterResponse {
        filter: logging_config.get_filter(),
    }))
}
