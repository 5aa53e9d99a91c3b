//! Web Push bootstrap route.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/push/vapid-public-key", get(vapid_public_key))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VapidPublicKeyResponse {
    /// Base64url uncompressed P-256 point, the `applicationServerKey` for browsers.
    pub public_key: String,
}

#[utoipa::path(
    get,
    path = "/api/push/vapid-public-key",
    tag = "push",
    responses(
        (status = 200, description = "VAPID public key", body = VapidPublicKeyResponse),
        (status = 404, description = "Web Push is not configured", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn vapid_public_key(State(state): State<AppState>) -> ApiResult<Json<VapidPublicKeyResponse>> {
    let public_key = state
        .notification_service
        .dispatchers()
        .vapid_public_key
        .clone()
        .ok_or_else(|| ApiError::not_found("Web Push is not configured"))?;
    Ok(Json(VapidPublicKeyResponse { public_key }))
}
