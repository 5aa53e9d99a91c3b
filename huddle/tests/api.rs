//! HTTP surface exercised through the router without binding a socket.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{ORG, seed_team, seed_user, service, setup_pool};
use huddle::api::AppState;
use huddle::api::routes::create_router;
use huddle::config::SchedulerConfig;
use huddle::database::DbPool;
use huddle::database::repositories::SqlxCampaignRepository;
use huddle::notification::Dispatchers;
use huddle::scheduler::CampaignService;

fn app(pool: &DbPool) -> Router {
    let notifications = service(pool, Dispatchers::default());
    let campaigns = Arc::new(CampaignService::new(
        Arc::new(SqlxCampaignRepository::new(pool.clone())),
        notifications.clone(),
        &SchedulerConfig::default(),
    ));
    create_router(AppState::new(notifications, campaigns))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn announcement(target: Value) -> Value {
    json!({
        "title": "Picture day",
        "message": "Wear your home jersey.",
        "target": target,
        "channels": ["in_app"],
        "sent_by": "admin-1"
    })
}

#[tokio::test]
async fn test_send_then_read_through_inbox() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;
    let app = app(&pool);

    let (status, sent) = call(
        &app,
        "POST",
        &format!("/api/organizations/{ORG}/notifications"),
        Some(announcement(json!({ "type": "users", "ids": ["u1"] }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["recipient_count"], 1);
    assert_eq!(sent["success_count"], 1);
    let id = sent["notification"]["id"].as_str().unwrap().to_string();

    let (_, count) = call(&app, "GET", "/api/users/u1/notifications/unread-count", None).await;
    assert_eq!(count, json!({ "unread": 1 }));

    let read_uri = format!("/api/users/u1/notifications/{id}/read");
    let (status, first) = call(&app, "POST", &read_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, json!({ "updated": true }));
    let (_, second) = call(&app, "POST", &read_uri, None).await;
    assert_eq!(second, json!({ "updated": false }));

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/users/someone-else/notifications/{id}/read"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, stats) = call(&app, "GET", &format!("/api/notifications/{id}/stats"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["read_count"], 1);
}

#[tokio::test]
async fn test_empty_audience_is_unprocessable() {
    let pool = setup_pool().await;
    seed_team(&pool, "t-empty", &[]).await;
    let app = app(&pool);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/organizations/{ORG}/notifications"),
        Some(announcement(json!({ "type": "teams", "ids": ["t-empty"] }))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "NO_RECIPIENTS");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/organizations/{ORG}/notifications"),
        Some(json!({
            "title": " ",
            "message": "x",
            "target": { "type": "everyone" },
            "channels": ["in_app"],
            "sent_by": "admin-1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;
    let app = app(&pool);

    let (status, stored) = call(
        &app,
        "POST",
        "/api/users/u1/subscriptions",
        Some(json!({ "type": "native", "token": "device-1", "platform": "android" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(stored["endpoint_key"], "device-1");

    let (status, body) = call(
        &app,
        "DELETE",
        "/api/users/u1/subscriptions",
        Some(json!({ "endpoint_key": "device-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "deactivated": true }));

    let (status, _) = call(
        &app,
        "DELETE",
        "/api/users/u1/subscriptions",
        Some(json!({ "endpoint_key": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preferences_patch_validates_times() {
    let pool = setup_pool().await;
    let app = app(&pool);

    let (status, prefs) = call(
        &app,
        "PATCH",
        "/api/users/u1/preferences",
        Some(json!({ "quiet_hours_start": "22:00", "quiet_hours_end": "07:00", "sms_notifications": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(prefs["quiet_hours_start"], "22:00");
    assert_eq!(prefs["sms_notifications"], false);

    let (status, _) = call(
        &app,
        "PATCH",
        "/api/users/u1/preferences",
        Some(json!({ "quiet_hours_start": "25:99" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_campaign_pause_twice_is_rejected() {
    let pool = setup_pool().await;
    let app = app(&pool);

    let (status, campaign) = call(
        &app,
        "POST",
        &format!("/api/organizations/{ORG}/campaigns"),
        Some(json!({
            "name": "Registration",
            "title": "Fall registration",
            "message": "Sign up before Friday.",
            "target": { "type": "roles", "ids": ["parent"] },
            "channels": ["in_app"],
            "created_by": "admin-1",
            "schedule_type": "once",
            "scheduled_at": "2030-09-01T15:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(campaign["status"], "active");
    let id = campaign["id"].as_str().unwrap().to_string();

    let pause = format!("/api/campaigns/{id}/pause");
    let (status, _) = call(&app, "POST", &pause, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", &pause, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, runs) = call(&app, "GET", &format!("/api/campaigns/{id}/runs"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs, json!([]));

    let (status, _) = call(&app, "DELETE", &format!("/api/campaigns/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "GET", &format!("/api/campaigns/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_unconfigured_vapid_key() {
    let pool = setup_pool().await;
    let app = app(&pool);

    let (status, health) = call(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    let (status, _) = call(&app, "GET", "/api/push/vapid-public-key", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
