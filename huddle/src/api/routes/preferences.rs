//! Notification preference routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::NotificationPreferencesDbModel;
use crate::notification::PreferencesPatch;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/users/{user_id}/preferences",
        get(get_preferences).patch(update_preferences),
    )
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/preferences",
    tag = "preferences",
    params(("user_id" = String, Path, description = "User ID")),
    responses((status = 200, description = "Stored preferences, or defaults", body = NotificationPreferencesDbModel))
)]
pub async fn get_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<NotificationPreferencesDbModel>> {
    Ok(Json(
        state.notification_service.get_preferences(&user_id).await?,
    ))
}

#[utoipa::path(
    patch,
    path = "/api/users/{user_id}/preferences",
    tag = "preferences",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = PreferencesPatch,
    responses(
        (status = 200, description = "Merged preferences", body = NotificationPreferencesDbModel),
        (status = 422, description = "Invalid time or timezone", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn update_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(patch): Json<PreferencesPatch>,
) -> ApiResult<Json<NotificationPreferencesDbModel>> {
    let prefs = state
        .notification_service
        .preferences()
        .update(&user_id, patch)
        .await?;
    Ok(Json(prefs))
}
