//! OpenAPI documentation configuration.
//!
//! The document is generated with `utoipa` and served by Swagger UI at
//! `/api/docs`.

use utoipa::OpenApi;

use crate::api::error::ApiErrorResponse;
use crate::api::routes::health::HealthResponse;
use crate::api::routes::logging::{LogFilterResponse, UpdateLogFilterRequest};
use crate::api::routes::push::VapidPublicKeyResponse;
use crate::api::routes::subscriptions::{UnsubscribeRequest, UnsubscribeResponse};
use crate::api::routes::users::{MarkAllReadResponse, MarkReadResponse, UnreadCountResponse};
use crate::api::routes::{
    campaigns, health, logging, notifications, preferences, push, subscriptions, users,
};
use crate::database::models::{
    Campaign, CampaignRunDbModel, Notification, NotificationPreferencesDbModel,
    PushSubscriptionDbModel, UserNotification,
};
use crate::domain::{
    ApnsEnvironment, CampaignStatus, Category, Channel, DeliveryStatus, DeviceDescriptor,
    NotificationStatus, Platform, RecipientTarget, RecurrenceFrequency, RunStatus, ScheduleType,
    SkippedRecipient, SubscriptionKind,
};
use crate::metrics::{DeliveryMetricsSnapshot, TransportCounters};
use crate::notification::{CreateNotificationRequest, NotificationStats, PreferencesPatch, SendResult};
use crate::scheduler::NewCampaign;

/// OpenAPI documentation for the huddle API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "huddle API",
        version = "0.1.0",
        description = "Notification delivery and scheduling for youth-sports organizations: ad-hoc sends, per-user inboxes, device subscriptions, preferences and campaigns.",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:8787", description = "Local development server")
    ),
    tags(
        (name = "notifications", description = "Create, list and inspect organization notifications"),
        (name = "inbox", description = "Per-user notification inbox and read state"),
        (name = "subscriptions", description = "Push device registration"),
        (name = "preferences", description = "Per-user notification preferences"),
        (name = "push", description = "Web Push bootstrap"),
        (name = "campaigns", description = "Scheduled and recurring campaigns"),
        (name = "health", description = "Liveness and delivery counters"),
        (name = "logging", description = "Runtime log filter")
    ),
    paths(
        notifications::create_notification,
        notifications::list_notifications,
        notifications::delete_notification,
        notifications::get_stats,
        users::list_user_notifications,
        users::unread_count,
        users::mark_read,
        users::mark_all_read,
        subscriptions::list_subscriptions,
        subscriptions::subscribe,
        subscriptions::unsubscribe,
        preferences::get_preferences,
        preferences::update_preferences,
        push::vapid_public_key,
        campaigns::create_campaign,
        campaigns::list_campaigns,
        campaigns::get_campaign,
        campaigns::delete_campaign,
        campaigns::pause_campaign,
        campaigns::resume_campaign,
        campaigns::list_runs,
        health::health_check,
        logging::get_logging_filter,
        logging::update_logging_filter,
    ),
    components(
        schemas(
            ApiErrorResponse,
            CreateNotificationRequest,
            SendResult,
            Notification,
            NotificationStats,
            UserNotification,
            UnreadCountResponse,
            MarkReadResponse,
            MarkAllReadResponse,
            DeviceDescriptor,
            SubscriptionKind,
            Platform,
            ApnsEnvironment,
            PushSubscriptionDbModel,
            UnsubscribeRequest,
            UnsubscribeResponse,
            NotificationPreferencesDbModel,
            PreferencesPatch,
            VapidPublicKeyResponse,
            NewCampaign,
            Campaign,
            CampaignRunDbModel,
            CampaignStatus,
            RunStatus,
            ScheduleType,
            RecurrenceFrequency,
            RecipientTarget,
            SkippedRecipient,
            Category,
            Channel,
            DeliveryStatus,
            NotificationStatus,
            HealthResponse,
            DeliveryMetricsSnapshot,
            TransportCounters,
            LogFilterResponse,
            UpdateLogFilterRequest,
        )
    )
)]
pub struct ApiDoc;
