//! Push subscription routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::database::models::PushSubscriptionDbModel;
use crate::domain::DeviceDescriptor;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/users/{user_id}/subscriptions",
        get(list_subscriptions)
            .post(subscribe)
            .delete(unsubscribe),
    )
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UnsubscribeRequest {
    /// Web Push endpoint URL or native device token.
    pub endpoint_key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnsubscribeResponse {
    pub deactivated: bool,
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/subscriptions",
    tag = "subscriptions",
    params(("user_id" = String, Path, description = "User ID")),
    responses((status = 200, description = "All of the user's subscriptions", body = Vec<PushSubscriptionDbModel>))
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<PushSubscriptionDbModel>>> {
    let subscriptions = state
        .notification_service
        .registry()
        .list_for(&user_id)
        .await?;
    Ok(Json(subscriptions))
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/subscriptions",
    tag = "subscriptions",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = DeviceDescriptor,
    responses(
        (status = 201, description = "Subscription registered or refreshed", body = PushSubscriptionDbModel),
        (status = 422, description = "Malformed device descriptor", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn subscribe(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(descriptor): Json<DeviceDescriptor>,
) -> ApiResult<(StatusCode, Json<PushSubscriptionDbModel>)> {
    let stored = state
        .notification_service
        .registry()
        .register(&user_id, &descriptor)
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

#[utoipa::path(
    delete,
    path = "/api/users/{user_id}/subscriptions",
    tag = "subscriptions",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = UnsubscribeRequest,
    responses((status = 200, description = "Unsubscribe result", body = UnsubscribeResponse))
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<UnsubscribeRequest>,
) -> ApiResult<Json<UnsubscribeResponse>> {
    if request.endpoint_key.trim().is_empty() {
        return Err(ApiError::bad_request("endpoint_key must not be empty"));
    }
    let deactivated = state
        .notification_service
        .registry()
        .deactivate(&user_id, request.endpoint_key.trim())
        .await?;
    Ok(Json(UnsubscribeResponse { deactivated }))
}
