//! Organization-scoped notification routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::Notification;
use crate::database::repositories::{DEFAULT_PAGE_SIZE, NotificationFilter};
use crate::domain::{Category, NotificationStatus};
use crate::notification::{CreateNotificationRequest, NotificationStats, SendResult};

const MAX_PAGE_SIZE: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/organizations/{org_id}/notifications",
            get(list_notifications).post(create_notification),
        )
        .route(
            "/organizations/{org_id}/notifications/{id}",
            delete(delete_notification),
        )
        .route("/notifications/{id}/stats", get(get_stats))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListNotificationsQuery {
    pub category: Option<Category>,
    pub status: Option<NotificationStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<ListNotificationsQuery> for NotificationFilter {
    fn from(query: ListNotificationsQuery) -> Self {
        Self {
            category: query.category,
            status: query.status,
            limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: query.offset.unwrap_or(0).max(0),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/organizations/{org_id}/notifications",
    tag = "notifications",
    params(("org_id" = String, Path, description = "Organization ID")),
    request_body = CreateNotificationRequest,
    responses(
        (status = 201, description = "Notification created and delivered", body = SendResult),
        (status = 422, description = "Invalid request or empty audience", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn create_notification(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Json(request): Json<CreateNotificationRequest>,
) -> ApiResult<(StatusCode, Json<SendResult>)> {
    let result = state
        .notification_service
        .create_notification(&org_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[utoipa::path(
    get,
    path = "/api/organizations/{org_id}/notifications",
    tag = "notifications",
    params(("org_id" = String, Path, description = "Organization ID"), ListNotificationsQuery),
    responses(
        (status = 200, description = "Notifications, newest first", body = Vec<Notification>)
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Query(query): Query<ListNotificationsQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let filter = NotificationFilter::from(query);
    let notifications = state
        .notification_service
        .list_notifications(&org_id, &filter)
        .await?;
    Ok(Json(notifications))
}

#[utoipa::path(
    delete,
    path = "/api/organizations/{org_id}/notifications/{id}",
    tag = "notifications",
    params(
        ("org_id" = String, Path, description = "Organization ID"),
        ("id" = String, Path, description = "Notification ID")
    ),
    responses(
        (status = 204, description = "Notification deleted"),
        (status = 404, description = "Notification not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn delete_notification(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .notification_service
        .delete_notification(&id, &org_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/notifications/{id}/stats",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Read and delivery statistics", body = NotificationStats),
        (status = 404, description = "Notification not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationStats>> {
    Ok(Json(state.notification_service.get_stats(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_clamps_paging() {
        let filter = NotificationFilter::from(ListNotificationsQuery {
            limit: Some(10_000),
            offset: Some(-5),
            ..Default::default()
        });
        assert_eq!(filter.limit, MAX_PAGE_SIZE);
        assert_eq!(filter.offset, 0);

        let defaults = NotificationFilter::from(ListNotificationsQuery::default());
        assert_eq!(defaults.limit, DEFAULT_PAGE_SIZE);
    }
}
