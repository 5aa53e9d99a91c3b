//! End-to-end notification flows against an in-memory database.

mod common;

use std::sync::Arc;

use async_trait::async_trait;

use common::{FakeContact, FakePush, ORG, seed_org, seed_team, seed_user, service, setup_pool};
use huddle::Error;
use huddle::domain::{
    Category, Channel, DeactivationReason, DeliveryStatus, DeviceDescriptor, NotificationStatus,
    Platform, RecipientTarget, SubscriptionKind, Transport,
};
use huddle::notification::channels::{
    ContactSender, DispatchReport, NotificationPayload, PushDispatcher, PushTarget, TargetOutcome,
};
use huddle::notification::resolver::{SKIP_NO_PHONE, SKIP_NOT_IN_ORGANIZATION};
use huddle::notification::{CreateNotificationRequest, Dispatchers, PreferencesPatch};

fn request(target: RecipientTarget, channels: Vec<Channel>) -> CreateNotificationRequest {
    CreateNotificationRequest {
        categories: vec![Category::Announcement],
        title: "Field closed".into(),
        message: "Practice moves indoors tonight.".into(),
        target,
        channels,
        sent_by: "coach-1".into(),
        related_event_id: None,
    }
}

fn web_push(endpoint: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(SubscriptionKind::WebPush {
        endpoint: endpoint.into(),
        p256dh: "BOr-key".into(),
        auth: "auth-secret".into(),
    })
}

fn ios(token: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(SubscriptionKind::Native {
        token: token.into(),
        platform: Platform::Ios,
        environment: None,
    })
}

#[tokio::test]
async fn test_sms_to_team_flags_missing_phone_but_keeps_recipient() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, Some("+15550001")).await;
    seed_user(&pool, "u2", "parent", None, None).await;
    seed_team(&pool, "t1", &["u1", "u2"]).await;

    let sms = FakeContact::new(Channel::Sms);
    let dispatchers = Dispatchers {
        sms: Some(sms.clone() as Arc<dyn ContactSender>),
        ..Default::default()
    };
    let svc = service(&pool, dispatchers);

    let result = svc
        .create_notification(ORG, request(RecipientTarget::Teams(vec!["t1".into()]), vec![Channel::Sms]))
        .await
        .unwrap();

    assert_eq!(result.recipient_count, 2);
    assert_eq!(result.skipped_count, 1);
    assert_eq!(result.skipped[0].user_id, "u2");
    assert_eq!(result.skipped[0].reason, SKIP_NO_PHONE);
    assert_eq!(result.success_count, 1);
    assert_eq!(sms.sent_to.lock().as_slice(), ["+15550001".to_string()]);

    let inbox = svc.user_notifications("u2", 10, 0, false).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(
        inbox[0].delivery_status.get(&Channel::Sms),
        Some(&DeliveryStatus::SkippedNoContact)
    );
}

#[tokio::test]
async fn test_user_on_two_targeted_teams_gets_one_row() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "player", None, None).await;
    seed_user(&pool, "u2", "player", None, None).await;
    seed_team(&pool, "t1", &["u1", "u2"]).await;
    seed_team(&pool, "t2", &["u1"]).await;
    let svc = service(&pool, Dispatchers::default());

    let result = svc
        .create_notification(
            ORG,
            request(
                RecipientTarget::Teams(vec!["t1".into(), "t2".into()]),
                vec![Channel::InApp],
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.recipient_count, 2);
    let stats = svc.get_stats(&result.notification.id).await.unwrap();
    assert_eq!(stats.total_recipients, 2);
    assert_eq!(stats.unread_count, 2);
}

#[tokio::test]
async fn test_empty_audience_persists_nothing() {
    let pool = setup_pool().await;
    seed_team(&pool, "empty", &[]).await;
    let svc = service(&pool, Dispatchers::default());

    let err = svc
        .create_notification(ORG, request(RecipientTarget::Teams(vec!["empty".into()]), vec![Channel::InApp]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoRecipients(_)));

    for table in ["notification", "notification_recipient"] {
        let (rows,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0, "{table}");
    }

    // The default filter pages through real rows.
    seed_user(&pool, "u1", "parent", None, None).await;
    svc.create_notification(ORG, request(RecipientTarget::Users(vec!["u1".into()]), vec![Channel::InApp]))
        .await
        .unwrap();
    let listed = svc
        .list_notifications(ORG, &Default::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_all_push_targets_failing_reports_failures() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;
    seed_user(&pool, "u2", "parent", None, None).await;

    let push = FakePush::failing(Transport::WebPush, None);
    let dispatchers = Dispatchers {
        web_push: Some(push.clone() as Arc<dyn PushDispatcher>),
        ..Default::default()
    };
    let svc = service(&pool, dispatchers);
    svc.registry().register("u1", &web_push("https://push.example/u1")).await.unwrap();
    svc.registry().register("u2", &web_push("https://push.example/u2")).await.unwrap();

    let result = svc
        .create_notification(ORG, request(RecipientTarget::Everyone, vec![Channel::InApp, Channel::Push]))
        .await
        .unwrap();

    assert_eq!(result.recipient_count, 2);
    assert_eq!(result.success_count, 0);
    assert_eq!(result.failure_count, 2);
    assert_eq!(result.notification.status, NotificationStatus::Sent);
    assert_eq!(push.seen.lock().len(), 2);
    assert_eq!(
        result.delivery[&Channel::Push][&DeliveryStatus::Failed],
        2
    );
    // Transient failures keep the devices active.
    assert_eq!(svc.registry().active_for("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_permanent_failure_deactivates_subscription() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;

    let push = FakePush::failing(Transport::Apns, Some(DeactivationReason::BadDeviceToken));
    let dispatchers = Dispatchers {
        apns: Some(push as Arc<dyn PushDispatcher>),
        ..Default::default()
    };
    let svc = service(&pool, dispatchers);
    svc.registry().register("u1", &ios("dead-token")).await.unwrap();

    svc.create_notification(ORG, request(RecipientTarget::Users(vec!["u1".into()]), vec![Channel::Push]))
        .await
        .unwrap();

    assert!(svc.registry().active_for("u1").await.unwrap().is_empty());
    let all = svc.registry().list_for("u1").await.unwrap();
    assert_eq!(all[0].deactivation_reason.as_deref(), Some("bad_device_token"));
    assert_eq!(svc.metrics().snapshot().apns.deactivated, 1);
}

#[tokio::test]
async fn test_push_without_subscription_or_transport_is_skipped() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;
    seed_user(&pool, "u2", "parent", None, None).await;
    // Only Web Push is configured; u2 has an Android device.
    let dispatchers = Dispatchers {
        web_push: Some(FakePush::succeeding(Transport::WebPush) as Arc<dyn PushDispatcher>),
        ..Default::default()
    };
    let svc = service(&pool, dispatchers);
    svc.registry()
        .register(
            "u2",
            &DeviceDescriptor::new(SubscriptionKind::Native {
                token: "android-token".into(),
                platform: Platform::Android,
                environment: None,
            }),
        )
        .await
        .unwrap();

    let result = svc
        .create_notification(ORG, request(RecipientTarget::Everyone, vec![Channel::Push]))
        .await
        .unwrap();

    let push = &result.delivery[&Channel::Push];
    assert_eq!(push.get(&DeliveryStatus::SkippedNoSubscription), Some(&1));
    assert_eq!(push.get(&DeliveryStatus::SkippedNotConfigured), Some(&1));
}

#[tokio::test]
async fn test_disabled_category_skips_external_channels_only() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", Some("u1@example.org"), None).await;
    let email = FakeContact::new(Channel::Email);
    let dispatchers = Dispatchers {
        email: Some(email.clone() as Arc<dyn ContactSender>),
        ..Default::default()
    };
    let svc = service(&pool, dispatchers);
    svc.preferences()
        .update(
            "u1",
            PreferencesPatch {
                announcement: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = svc
        .create_notification(ORG, request(RecipientTarget::Everyone, vec![Channel::InApp, Channel::Email]))
        .await
        .unwrap();

    assert!(email.sent_to.lock().is_empty());
    let inbox = svc.user_notifications("u1", 10, 0, false).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(
        inbox[0].delivery_status.get(&Channel::Email),
        Some(&DeliveryStatus::SkippedUserPreference)
    );
    assert_eq!(inbox[0].delivery_status.get(&Channel::InApp), None);
    assert_eq!(result.success_count, 0);
}

#[tokio::test]
async fn test_new_ios_token_supersedes_previous() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;
    let svc = service(&pool, Dispatchers::default());

    svc.registry().register("u1", &ios("old-token")).await.unwrap();
    svc.registry().register("u1", &web_push("https://push.example/u1")).await.unwrap();
    svc.registry().register("u1", &ios("new-token")).await.unwrap();

    let active = svc.registry().active_for("u1").await.unwrap();
    assert_eq!(active.len(), 2);
    let ios_active: Vec<_> = active.iter().filter(|s| s.platform.as_deref() == Some("ios")).collect();
    assert_eq!(ios_active.len(), 1);
    assert_eq!(ios_active[0].endpoint_key, "new-token");

    let all = svc.registry().list_for("u1").await.unwrap();
    let old = all.iter().find(|s| s.endpoint_key == "old-token").unwrap();
    assert!(!old.is_active);
    assert_eq!(old.deactivation_reason.as_deref(), Some("superseded"));

    // Re-registering the same token refreshes instead of duplicating.
    svc.registry().register("u1", &ios("new-token")).await.unwrap();
    assert_eq!(svc.registry().list_for("u1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_mark_read_is_idempotent() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;
    let svc = service(&pool, Dispatchers::default());

    let first = svc
        .create_notification(ORG, request(RecipientTarget::Everyone, vec![Channel::InApp]))
        .await
        .unwrap();
    svc.create_notification(ORG, request(RecipientTarget::Everyone, vec![Channel::InApp]))
        .await
        .unwrap();
    assert_eq!(svc.unread_count("u1").await.unwrap(), 2);

    assert!(svc.mark_read(&first.notification.id, "u1").await.unwrap());
    assert!(!svc.mark_read(&first.notification.id, "u1").await.unwrap());
    assert_eq!(svc.unread_count("u1").await.unwrap(), 1);

    let unread = svc.user_notifications("u1", 10, 0, true).await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_ne!(unread[0].notification.id, first.notification.id);

    assert_eq!(svc.mark_all_read("u1").await.unwrap(), 1);
    assert_eq!(svc.mark_all_read("u1").await.unwrap(), 0);
    assert_eq!(svc.unread_count("u1").await.unwrap(), 0);

    let stats = svc.get_stats(&first.notification.id).await.unwrap();
    assert_eq!(stats.read_count, 1);
}

#[tokio::test]
async fn test_delete_removes_recipients() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;
    let svc = service(&pool, Dispatchers::default());

    let sent = svc
        .create_notification(ORG, request(RecipientTarget::Everyone, vec![Channel::InApp]))
        .await
        .unwrap();
    svc.delete_notification(&sent.notification.id, ORG).await.unwrap();

    assert_eq!(svc.unread_count("u1").await.unwrap(), 0);
    assert!(matches!(
        svc.delete_notification(&sent.notification.id, ORG).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_user_list_skips_ids_outside_organization() {
    let pool = setup_pool().await;
    seed_user(&pool, "u1", "parent", None, None).await;
    seed_org(&pool, "org-2").await;
    sqlx::query(
        "INSERT INTO users (id, organization_id, display_name, role) VALUES ('x1', 'org-2', 'Outsider', 'parent')",
    )
    .execute(&pool)
    .await
    .unwrap();
    let svc = service(&pool, Dispatchers::default());

    let result = svc
        .create_notification(
            ORG,
            request(
                RecipientTarget::Users(vec!["u1".into(), "x1".into(), "ghost".into()]),
                vec![Channel::InApp],
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.recipient_count, 1);
    assert_eq!(result.success_count, 1);
    let mut skipped: Vec<(&str, &str)> = result
        .skipped
        .iter()
        .map(|s| (s.user_id.as_str(), s.reason.as_str()))
        .collect();
    skipped.sort();
    assert_eq!(
        skipped,
        vec![
            ("ghost", SKIP_NOT_IN_ORGANIZATION),
            ("x1", SKIP_NOT_IN_ORGANIZATION),
        ]
    );
    assert_eq!(svc.unread_count("u1").await.unwrap(), 1);
    assert_eq!(svc.unread_count("x1").await.unwrap(), 0);
}

/// Answers in reverse order and only delivers to `u1`'s devices.
struct ReversedPush;

#[async_trait]
impl PushDispatcher for ReversedPush {
    fn transport(&self) -> Transport {
        Transport::WebPush
    }

    async fn send(&self, targets: &[PushTarget], _payload: &NotificationPayload) -> DispatchReport {
        let outcomes = targets
            .iter()
            .rev()
            .map(|t| TargetOutcome {
                subscription_id: t.subscription_id.clone(),
                user_id: t.user_id.clone(),
                success: t.user_id == "u1",
                error: None,
                deactivate: None,
            })
            .collect();
        DispatchReport::from_outcomes(outcomes)
    }
}

#[tokio::test]
async fn test_push_outcomes_are_matched_by_subscription() {
    let pool = setup_pool().await;
    for user in ["u1", "u2", "u3"] {
        seed_user(&pool, user, "parent", None, None).await;
    }
    let svc = service(
        &pool,
        Dispatchers {
            web_push: Some(Arc::new(ReversedPush) as Arc<dyn PushDispatcher>),
            ..Default::default()
        },
    );
    for user in ["u1", "u2", "u3"] {
        svc.registry()
            .register(user, &web_push(&format!("https://push.example/{user}")))
            .await
            .unwrap();
    }

    let result = svc
        .create_notification(ORG, request(RecipientTarget::Everyone, vec![Channel::Push]))
        .await
        .unwrap();

    assert_eq!(result.success_count, 1);
    assert_eq!(result.delivery[&Channel::Push][&DeliveryStatus::Sent], 1);
    assert_eq!(result.delivery[&Channel::Push][&DeliveryStatus::Failed], 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_partial_preference_updates_all_survive() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("prefs.db").display());
    let pool = huddle::database::init_pool_with_size(&url, 4).await.unwrap();
    huddle::database::run_migrations(&pool).await.unwrap();
    let prefs = service(&pool, Dispatchers::default()).preferences().clone();

    let patches = vec![
        PreferencesPatch {
            announcement: Some(false),
            ..Default::default()
        },
        PreferencesPatch {
            email_notifications: Some(false),
            ..Default::default()
        },
        PreferencesPatch {
            quiet_hours_start: Some("22:00".into()),
            quiet_hours_end: Some("07:00".into()),
            ..Default::default()
        },
        PreferencesPatch {
            timezone: Some("Europe/Berlin".into()),
            ..Default::default()
        },
        PreferencesPatch {
            sms_notifications: Some(false),
            ..Default::default()
        },
    ];
    let handles: Vec<_> = patches
        .into_iter()
        .map(|patch| {
            let prefs = prefs.clone();
            tokio::spawn(async move { prefs.update("u1", patch).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = prefs.get("u1").await.unwrap();
    assert!(!stored.announcement);
    assert!(!stored.email_notifications);
    assert!(!stored.sms_notifications);
    assert!(stored.push_notifications);
    assert_eq!(stored.quiet_hours_start.as_deref(), Some("22:00"));
    assert_eq!(stored.quiet_hours_end.as_deref(), Some("07:00"));
    assert_eq!(stored.timezone, "Europe/Berlin");
}
