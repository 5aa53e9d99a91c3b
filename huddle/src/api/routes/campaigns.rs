//! Campaign management routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::{Campaign, CampaignRunDbModel};
use crate::scheduler::NewCampaign;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/organizations/{org_id}/campaigns",
            get(list_campaigns).post(create_campaign),
        )
        .route("/campaigns/{id}", get(get_campaign).delete(delete_campaign))
        .route("/campaigns/{id}/pause", post(pause_campaign))
        .route("/campaigns/{id}/resume", post(resume_campaign))
        .route("/campaigns/{id}/runs", get(list_runs))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/api/organizations/{org_id}/campaigns",
    tag = "campaigns",
    params(("org_id" = String, Path, description = "Organization ID")),
    request_body = NewCampaign,
    responses(
        (status = 201, description = "Campaign created", body = Campaign),
        (status = 422, description = "Invalid schedule", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Json(request): Json<NewCampaign>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.campaign_service.create(&org_id, request).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

#[utoipa::path(
    get,
    path = "/api/organizations/{org_id}/campaigns",
    tag = "campaigns",
    params(("org_id" = String, Path, description = "Organization ID")),
    responses((status = 200, description = "Campaigns of the organization", body = Vec<Campaign>))
)]
pub async fn list_campaigns(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> ApiResult<Json<Vec<Campaign>>> {
    Ok(Json(state.campaign_service.list(&org_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/campaigns/{id}",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign", body = Campaign),
        (status = 404, description = "Campaign not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaign_service.get(&id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/campaigns/{id}",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign ID")),
    responses(
        (status = 204, description = "Campaign deleted"),
        (status = 404, description = "Campaign not found", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.campaign_service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/pause",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign paused", body = Campaign),
        (status = 422, description = "Campaign is not active", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaign_service.pause(&id).await?))
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/resume",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign resumed", body = Campaign),
        (status = 422, description = "Campaign is not paused", body = crate::api::error::ApiErrorResponse)
    )
)]
pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaign_service.resume(&id).await?))
}

#[utoipa::path(
    get,
    path = "/api/campaigns/{id}/runs",
    tag = "campaigns",
    params(("id" = String, Path, description = "Campaign ID"), RunsQuery),
    responses((status = 200, description = "Execution history, newest first", body = Vec<CampaignRunDbModel>))
)]
pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<CampaignRunDbModel>>> {
    let runs = state
        .campaign_service
        .runs(&id, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(runs))
}
