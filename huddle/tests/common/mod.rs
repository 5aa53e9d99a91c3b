//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use huddle::database::{self, DbPool};
use huddle::domain::{Channel, DeactivationReason, Transport};
use huddle::metrics::DeliveryMetrics;
use huddle::notification::channels::{
    ContactSender, DispatchReport, NotificationPayload, PushDispatcher, PushTarget, TargetOutcome,
};
use huddle::notification::{Dispatchers, NotificationService};

pub const ORG: &str = "org-1";

/// In-memory database with migrations applied, on a single connection.
pub async fn setup_pool() -> DbPool {
    let pool = database::init_pool_with_size("sqlite::memory:", 1)
        .await
        .unwrap();
    database::run_migrations(&pool).await.unwrap();
    seed_org(&pool, ORG).await;
    pool
}

pub fn service(pool: &DbPool, dispatchers: Dispatchers) -> Arc<NotificationService> {
    Arc::new(NotificationService::new(
        pool.clone(),
        dispatchers,
        Arc::new(DeliveryMetrics::new()),
    ))
}

pub async fn seed_org(pool: &DbPool, id: &str) {
    sqlx::query("INSERT INTO organizations (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(format!("Org {id}"))
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_user(pool: &DbPool, id: &str, role: &str, email: Option<&str>, phone: Option<&str>) {
    sqlx::query(
        "INSERT INTO users (id, organization_id, display_name, role, email, phone) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(ORG)
    .bind(format!("User {id}"))
    .bind(role)
    .bind(email)
    .bind(phone)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_team(pool: &DbPool, id: &str, members: &[&str]) {
    sqlx::query("INSERT INTO teams (id, organization_id, name) VALUES (?, ?, ?)")
        .bind(id)
        .bind(ORG)
        .bind(format!("Team {id}"))
        .execute(pool)
        .await
        .unwrap();
    for member in members {
        sqlx::query("INSERT INTO team_members (team_id, user_id) VALUES (?, ?)")
            .bind(id)
            .bind(member)
            .execute(pool)
            .await
            .unwrap();
    }
}

pub async fn seed_event(pool: &DbPool, id: &str, title: &str, start_ms: i64, team_id: &str) {
    sqlx::query(
        "INSERT INTO events (id, organization_id, title, start_time, team_id) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(ORG)
    .bind(title)
    .bind(start_ms)
    .bind(team_id)
    .execute(pool)
    .await
    .unwrap();
}

/// Push dispatcher that records targets and answers with a fixed outcome.
pub struct FakePush {
    transport: Transport,
    succeed: bool,
    deactivate: Option<DeactivationReason>,
    pub seen: Mutex<Vec<PushTarget>>,
}

impl FakePush {
    pub fn succeeding(transport: Transport) -> Arc<Self> {
        Arc::new(Self {
            transport,
            succeed: true,
            deactivate: None,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(transport: Transport, deactivate: Option<DeactivationReason>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            succeed: false,
            deactivate,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PushDispatcher for FakePush {
    fn transport(&self) -> Transport {
        self.transport
    }

    async fn send(&self, targets: &[PushTarget], _payload: &NotificationPayload) -> DispatchReport {
        self.seen.lock().extend(targets.iter().cloned());
        DispatchReport::from_outcomes(
            targets
                .iter()
                .map(|t| TargetOutcome {
                    subscription_id: t.subscription_id.clone(),
                    user_id: t.user_id.clone(),
                    success: self.succeed,
                    error: (!self.succeed).then(|| "rejected".to_string()),
                    deactivate: if self.succeed { None } else { self.deactivate },
                })
                .collect(),
        )
    }
}

/// Email/SMS sender that records addresses.
pub struct FakeContact {
    channel: Channel,
    pub sent_to: Mutex<Vec<String>>,
}

impl FakeContact {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            sent_to: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ContactSender for FakeContact {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, address: &str, _payload: &NotificationPayload) -> huddle::Result<()> {
        self.sent_to.lock().push(address.to_string());
        Ok(())
    }
}
