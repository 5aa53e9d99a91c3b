//! Per-user inbox routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::database::models::UserNotification;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/notifications", get(list_user_notifications))
        .route("/users/{user_id}/notifications/unread-count", get(unread_count))
        .route("/users/{user_id}/notifications/read-all", post(mark_all_read))
        .route("/users/{user_id}/notifications/{id}/read", post(mark_read))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct InboxQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    /// `false` when the notification was already read.
    pub updated: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/notifications",
    tag = "inbox",
    params(("user_id" = String, Path, description = "User ID"), InboxQuery),
    responses(
        (status = 200, description = "The user's notifications, newest first", body = Vec<UserNotification>)
    )
)]
pub async fn list_user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<InboxQuery>,
) -> ApiResult<Json<Vec<UserNotification>>> {
    let items = state
        .notification_service
        .user_notifications(
            &user_id,
            query.limit.unwrap_or(50).clamp(1, 200),
            query.offset.unwrap_or(0).max(0),
            query.unread_only,
        )
        .await?;
    Ok(Json(items))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/notifications/unread-count",
    tag = "inbox",
    params(("user_id" = String, Path, description = "User ID")),
    responses((status = 200, description = "Unread notification count", body = UnreadCountResponse))
)]
pub async fn unread_count(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let unread = state.notification_service.unread_count(&user_id).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/notifications/{id}/read",
    tag = "inbox",
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("id" = String, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Read state recorded", body = MarkReadResponse),
        (status = 404, description = "User is not a recipient", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn mark_read(
    State(state): State<AppState>,
    Path((user_id, id)): Path<(String, String)>,
) -> ApiResult<Json<MarkReadResponse>> {
    let service = &state.notification_service;
    let updated = service.mark_read(&id, &user_id).await?;
    if !updated {
        // Distinguish "already read" from "not a recipient".
        let recipients = service.notifications().list_recipients(&id).await?;
        if !recipients.iter().any(|r| r.user_id == user_id) {
            return Err(ApiError::not_found(format!(
                "Notification '{}' has no recipient '{}'",
                id, user_id
            )));
        }
    }
    Ok(Json(MarkReadResponse { updated }))
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/notifications/read-all",
    tag = "inbox",
    params(("user_id" = String, Path, description = "User ID")),
    responses((status = 200, description = "Number of notifications marked read", body = MarkAllReadResponse))
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<MarkAllReadResponse>> {
    let updated = state.notification_service.mark_all_read(&user_id).await?;
    Ok(Json(MarkAllReadResponse { updated }))
}
