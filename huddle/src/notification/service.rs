//! Notification orchestrator.
//!
//! `create_notification` is the single entry point for ad-hoc sends and the
//! scheduler: resolve recipients, persist the notification with one recipient
//! row per user, run every requested channel through the preference gate and
//! its dispatcher, then merge the outcomes into the recipient rows.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::channels::{
    ApnsConfig, ApnsDispatcher, ContactSender, DispatchReport, EmailConfig, EmailSender,
    FcmConfig, FcmDispatcher, NotificationPayload, PushDispatcher, PushTarget, SmsConfig,
    SmsSender, WebPushConfig, WebPushDispatcher,
};
use super::preferences::{PreferenceGate, evaluate};
use super::registry::SubscriptionRegistry;
use super::resolver::{RecipientResolver, Resolution};
use super::tracker::{DeliveryBreakdown, DeliveryTracker, NotificationStats};
use crate::database::DbPool;
use crate::database::models::{
    Notification, NotificationDbModel, NotificationPreferencesDbModel,
    NotificationRecipientDbModel, UserNotification,
};
use crate::database::repositories::{
    NotificationFilter, NotificationRepository, OutcomeRecord, SqlxDirectoryRepository,
    SqlxNotificationRepository, SqlxPreferencesRepository, SqlxSubscriptionRepository,
};
use crate::database::time::{datetime_to_ms, now_ms};
use crate::domain::{
    Category, Channel, DeliveryStatus, NotificationStatus, RecipientTarget, SkippedRecipient,
    Transport,
};
use crate::metrics::DeliveryMetrics;
use crate::{Error, Result};

/// Concurrent email / SMS sends per notification.
const CONTACT_CONCURRENCY: usize = 16;

fn default_categories() -> Vec<Category> {
    vec![Category::Announcement]
}

/// Input of [`NotificationService::create_notification`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateNotificationRequest {
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,
    pub title: String,
    pub message: String,
    pub target: RecipientTarget,
    pub channels: Vec<Channel>,
    pub sent_by: String,
    #[serde(default)]
    pub related_event_id: Option<String>,
}

impl CreateNotificationRequest {
    fn validate(&mut self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::validation("title must not be empty"));
        }
        if self.message.trim().is_empty() {
            return Err(Error::validation("message must not be empty"));
        }
        if self.sent_by.trim().is_empty() {
            return Err(Error::validation("sent_by must not be empty"));
        }
        self.channels = dedup_preserving_order(&self.channels);
        if self.channels.is_empty() {
            return Err(Error::validation("at least one channel is required"));
        }
        self.categories = dedup_preserving_order(&self.categories);
        if self.categories.is_empty() {
            self.categories = default_categories();
        }
        Ok(())
    }
}

fn dedup_preserving_order<T: Copy + PartialEq>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(*item);
        }
    }
    out
}

/// Result of a send.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SendResult {
    pub notification: Notification,
    pub recipient_count: usize,
    pub skipped_count: usize,
    pub skipped: Vec<SkippedRecipient>,
    /// Recipients with at least one `sent` channel.
    pub success_count: usize,
    /// Recipients with a `failed` channel and nothing sent.
    pub failure_count: usize,
    /// Recipients per channel and status for this send.
    #[schema(value_type = Object)]
    pub delivery: DeliveryBreakdown,
}

/// Configured transports. A `None` slot is a disabled channel.
#[derive(Default, Clone)]
pub struct Dispatchers {
    pub web_push: Option<Arc<dyn PushDispatcher>>,
    pub apns: Option<Arc<dyn PushDispatcher>>,
    pub fcm: Option<Arc<dyn PushDispatcher>>,
    pub email: Option<Arc<dyn ContactSender>>,
    pub sms: Option<Arc<dyn ContactSender>>,
    /// Public VAPID key handed to browsers when Web Push is enabled.
    pub vapid_public_key: Option<String>,
}

fn build_channel<C, T>(
    name: &'static str,
    config: Result<Option<C>>,
    build: impl FnOnce(C) -> Result<T>,
) -> Option<T> {
    match config.and_then(|c| c.map(build).transpose()) {
        Ok(Some(channel)) => {
            info!(channel = name, "Delivery channel enabled");
            Some(channel)
        }
        Ok(None) => {
            warn!(channel = name, "Delivery channel not configured, sends will be skipped");
            None
        }
        Err(e) => {
            warn!(channel = name, error = %e, "Delivery channel misconfigured, sends will be skipped");
            None
        }
    }
}

impl Dispatchers {
    /// Build every transport whose credentials are present in the environment.
    pub fn from_env() -> Self {
        let web_push = build_channel("web_push", WebPushConfig::from_env(), WebPushDispatcher::new);
        let vapid_public_key = web_push.as_ref().map(|d| d.vapid_public_key().to_string());

        Self {
            web_push: web_push.map(|d| Arc::new(d) as Arc<dyn PushDispatcher>),
            apns: build_channel("apns", ApnsConfig::from_env(), ApnsDispatcher::new)
                .map(|d| Arc::new(d) as Arc<dyn PushDispatcher>),
            fcm: build_channel("fcm", FcmConfig::from_env(), FcmDispatcher::new)
                .map(|d| Arc::new(d) as Arc<dyn PushDispatcher>),
            email: build_channel("email", EmailConfig::from_env(), EmailSender::new)
                .map(|s| Arc::new(s) as Arc<dyn ContactSender>),
            sms: build_channel("sms", SmsConfig::from_env(), SmsSender::new)
                .map(|s| Arc::new(s) as Arc<dyn ContactSender>),
            vapid_public_key,
        }
    }

    fn push_dispatcher(&self, transport: Transport) -> Option<&Arc<dyn PushDispatcher>> {
        match transport {
            Transport::WebPush => self.web_push.as_ref(),
            Transport::Apns => self.apns.as_ref(),
            Transport::Fcm => self.fcm.as_ref(),
        }
    }

    fn contact_sender(&self, channel: Channel) -> Option<&Arc<dyn ContactSender>> {
        match channel {
            Channel::Email => self.email.as_ref(),
            Channel::Sms => self.sms.as_ref(),
            _ => None,
        }
    }

    /// Names of the enabled transports, for health reporting.
    pub fn enabled(&self) -> Vec<&'static str> {
        let slots: [(&'static str, bool); 5] = [
            ("web_push", self.web_push.is_some()),
            ("apns", self.apns.is_some()),
            ("fcm", self.fcm.is_some()),
            ("email", self.email.is_some()),
            ("sms", self.sms.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(name, on)| on.then_some(name))
            .collect()
    }
}

/// Per-user tally of device outcomes behind the `push` channel.
#[derive(Debug, Default, Clone, Copy)]
struct PushTally {
    sent: usize,
    failed: usize,
    not_configured: usize,
}

impl PushTally {
    /// At least one device success wins; otherwise any real attempt is a
    /// failure; devices only on disabled transports are a configuration skip.
    fn status(self) -> DeliveryStatus {
        if self.sent > 0 {
            DeliveryStatus::Sent
        } else if self.failed > 0 {
            DeliveryStatus::Failed
        } else if self.not_configured > 0 {
            DeliveryStatus::SkippedNotConfigured
        } else {
            DeliveryStatus::SkippedNoSubscription
        }
    }
}

/// Count outcomes per channel and status.
fn summarize(outcomes: &[OutcomeRecord]) -> DeliveryBreakdown {
    let mut summary = DeliveryBreakdown::new();
    for outcome in outcomes {
        *summary
            .entry(outcome.channel)
            .or_default()
            .entry(outcome.status)
            .or_default() += 1;
    }
    summary
}

pub struct NotificationService {
    notifications: Arc<dyn NotificationRepository>,
    resolver: RecipientResolver,
    registry: Arc<SubscriptionRegistry>,
    preferences: Arc<PreferenceGate>,
    tracker: DeliveryTracker,
    dispatchers: Dispatchers,
    metrics: Arc<DeliveryMetrics>,
}

impl NotificationService {
    pub fn new(pool: DbPool, dispatchers: Dispatchers, metrics: Arc<DeliveryMetrics>) -> Self {
        let notifications: Arc<dyn NotificationRepository> =
            Arc::new(SqlxNotificationRepository::new(pool.clone()));
        Self {
            resolver: RecipientResolver::new(Arc::new(SqlxDirectoryRepository::new(pool.clone()))),
            registry: Arc::new(SubscriptionRegistry::new(Arc::new(
                SqlxSubscriptionRepository::new(pool.clone()),
            ))),
            preferences: Arc::new(PreferenceGate::new(Arc::new(SqlxPreferencesRepository::new(
                pool,
            )))),
            tracker: DeliveryTracker::new(notifications.clone()),
            notifications,
            dispatchers,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn preferences(&self) -> &Arc<PreferenceGate> {
        &self.preferences
    }

    pub fn resolver(&self) -> &RecipientResolver {
        &self.resolver
    }

    pub fn notifications(&self) -> &Arc<dyn NotificationRepository> {
        &self.notifications
    }

    pub fn dispatchers(&self) -> &Dispatchers {
        &self.dispatchers
    }

    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.metrics
    }

    pub async fn create_notification(
        &self,
        organization_id: &str,
        request: CreateNotificationRequest,
    ) -> Result<SendResult> {
        self.create_notification_at(organization_id, request, Utc::now())
            .await
    }

    /// [`Self::create_notification`] with an explicit clock for the gate and timestamps.
    pub async fn create_notification_at(
        &self,
        organization_id: &str,
        mut request: CreateNotificationRequest,
        now: DateTime<Utc>,
    ) -> Result<SendResult> {
        request.validate()?;

        // Nothing is persisted when resolution fails.
        let resolution = self
            .resolver
            .resolve(organization_id, &request.target, &request.channels)
            .await?;

        let now_ms = datetime_to_ms(now);
        let mut model = NotificationDbModel::new(
            organization_id,
            &request.categories,
            request.title.as_str(),
            request.message.as_str(),
            &request.target,
            &request.channels,
            request.sent_by.as_str(),
            request.related_event_id.clone(),
            now_ms,
        )?;
        let rows: Vec<NotificationRecipientDbModel> = resolution
            .user_ids
            .iter()
            .map(|user_id| NotificationRecipientDbModel::new(model.id.as_str(), user_id.as_str(), now_ms))
            .collect();

        self.notifications
            .create_with_recipients(&model, &rows)
            .await?;
        self.metrics.record_notification_created();
        info!(
            notification_id = %model.id,
            organization_id = %organization_id,
            recipients = rows.len(),
            channels = ?request.channels,
            "Notification created"
        );

        let payload = NotificationPayload {
            title: request.title.clone(),
            body: request.message.clone(),
            notification_id: Some(model.id.clone()),
            categories: request.categories.clone(),
            related_event_id: request.related_event_id.clone(),
        };

        let outcomes = match self
            .deliver(&resolution, &request.categories, &request.channels, &payload, now)
            .await
        {
            Ok(outcomes) => match self.tracker.record_outcomes(&model.id, &outcomes).await {
                Ok(()) => outcomes,
                Err(e) => {
                    self.mark_failed(&mut model, &e).await;
                    outcomes
                }
            },
            Err(e) => {
                self.mark_failed(&mut model, &e).await;
                Vec::new()
            }
        };

        let recipient_count = resolution.user_ids.len();
        let (success_count, failure_count) =
            if request.channels.iter().any(|c| c.is_external()) {
                success_failure_counts(&outcomes)
            } else {
                // In-app only: the recipient row is the delivery.
                (recipient_count, 0)
            };

        Ok(SendResult {
            notification: Notification::try_from(model)?,
            recipient_count,
            success_count,
            failure_count,
            skipped_count: resolution.skipped.len(),
            skipped: resolution.skipped,
            delivery: summarize(&outcomes),
        })
    }

    async fn mark_failed(&self, model: &mut NotificationDbModel, cause: &Error) {
        error!(notification_id = %model.id, error = %cause, "Delivery bookkeeping failed");
        match self
            .notifications
            .set_status(&model.id, NotificationStatus::Failed)
            .await
        {
            Ok(()) => model.status = NotificationStatus::Failed.to_string(),
            Err(e) => {
                error!(notification_id = %model.id, error = %e, "Failed to mark notification failed")
            }
        }
    }

    /// Gate and dispatch every external channel for every recipient.
    async fn deliver(
        &self,
        resolution: &Resolution,
        categories: &[Category],
        channels: &[Channel],
        payload: &NotificationPayload,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutcomeRecord>> {
        let external: Vec<Channel> = channels.iter().copied().filter(|c| c.is_external()).collect();
        if external.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids = resolution.user_id_list();
        let prefs = self.preferences.get_many(&user_ids).await?;

        let mut outcomes = Vec::new();
        let mut eligible: HashMap<Channel, Vec<String>> = HashMap::new();
        for channel in &external {
            for user_id in &user_ids {
                let decision = prefs
                    .get(user_id)
                    .and_then(|p| evaluate(p, categories, *channel, now));
                match decision {
                    Some(skip) => outcomes.push(OutcomeRecord {
                        user_id: user_id.clone(),
                        channel: *channel,
                        status: skip,
                    }),
                    None => eligible.entry(*channel).or_default().push(user_id.clone()),
                }
            }
        }

        let push_users = eligible.remove(&Channel::Push).unwrap_or_default();
        let email_users = eligible.remove(&Channel::Email).unwrap_or_default();
        let sms_users = eligible.remove(&Channel::Sms).unwrap_or_default();

        let (push, email, sms) = tokio::join!(
            self.deliver_push(&push_users, payload),
            self.deliver_contact(Channel::Email, &email_users, resolution, payload),
            self.deliver_contact(Channel::Sms, &sms_users, resolution, payload),
        );
        outcomes.extend(push?);
        outcomes.extend(email);
        outcomes.extend(sms);

        for outcome in outcomes.iter().filter(|o| o.status.is_skip()) {
            self.metrics.record_skip(outcome.status);
        }
        debug!(outcomes = outcomes.len(), "Delivery finished");
        Ok(outcomes)
    }

    async fn deliver_push(
        &self,
        user_ids: &[String],
        payload: &NotificationPayload,
    ) -> Result<Vec<OutcomeRecord>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let targets = self.registry.active_targets(user_ids).await?;
        let mut by_transport: HashMap<Transport, Vec<PushTarget>> = HashMap::new();
        for target in targets.into_values().flatten() {
            by_transport
                .entry(target.kind.transport())
                .or_default()
                .push(target);
        }

        // Web Push, then APNs, then FCM; only log order depends on this.
        let groups = [Transport::WebPush, Transport::Apns, Transport::Fcm].map(|transport| {
            let targets = by_transport.remove(&transport).unwrap_or_default();
            (transport, targets)
        });
        let sends = groups.iter().map(|(transport, targets)| async move {
            let report = match self.dispatchers.push_dispatcher(*transport) {
                Some(dispatcher) if !targets.is_empty() => Some(dispatcher.send(targets, payload).await),
                _ => None,
            };
            (*transport, targets, report)
        });
        let results = futures::future::join_all(sends).await;

        let mut tallies: HashMap<&str, PushTally> = HashMap::new();
        let mut delivered = Vec::new();
        for (transport, targets, report) in results {
            let Some(report) = report else {
                for target in targets {
                    tallies.entry(target.user_id.as_str()).or_default().not_configured += 1;
                }
                continue;
            };
            self.apply_report(transport, &report, &mut delivered).await;
            let succeeded: HashMap<&str, bool> = report
                .per_target
                .iter()
                .map(|o| (o.subscription_id.as_str(), o.success))
                .collect();
            for target in targets {
                let tally = tallies.entry(target.user_id.as_str()).or_default();
                // A target missing from the report counts as failed.
                if succeeded.get(target.subscription_id.as_str()).copied().unwrap_or(false) {
                    tally.sent += 1;
                } else {
                    tally.failed += 1;
                }
            }
        }

        if let Err(e) = self.registry.mark_used(&delivered).await {
            warn!(error = %e, "Failed to refresh subscription last_used");
        }

        Ok(user_ids
            .iter()
            .map(|user_id| OutcomeRecord {
                user_id: user_id.clone(),
                channel: Channel::Push,
                status: tallies
                    .get(user_id.as_str())
                    .copied()
                    .unwrap_or_default()
                    .status(),
            })
            .collect())
    }

    /// Count per-target results and deactivate permanently dead endpoints.
    async fn apply_report(
        &self,
        transport: Transport,
        report: &DispatchReport,
        delivered: &mut Vec<String>,
    ) {
        for outcome in &report.per_target {
            self.metrics.record_transport_result(transport, outcome.success);
            if outcome.success {
                delivered.push(outcome.subscription_id.clone());
                continue;
            }
            if let Some(reason) = outcome.deactivate {
                match self
                    .registry
                    .deactivate_for_failure(&outcome.subscription_id, reason)
                    .await
                {
                    Ok(true) => self.metrics.record_deactivation(transport),
                    Ok(false) => {}
                    Err(e) => warn!(
                        subscription_id = %outcome.subscription_id,
                        error = %e,
                        "Failed to deactivate subscription"
                    ),
                }
            }
        }
        debug!(
            transport = %transport,
            success = report.success_count,
            failure = report.failure_count,
            "Push batch dispatched"
        );
    }

    async fn deliver_contact(
        &self,
        channel: Channel,
        user_ids: &[String],
        resolution: &Resolution,
        payload: &NotificationPayload,
    ) -> Vec<OutcomeRecord> {
        let outcome = |user_id: &str, status| OutcomeRecord {
            user_id: user_id.to_string(),
            channel,
            status,
        };

        let Some(sender) = self.dispatchers.contact_sender(channel) else {
            return user_ids
                .iter()
                .map(|id| outcome(id, DeliveryStatus::SkippedNotConfigured))
                .collect();
        };

        let mut results = Vec::with_capacity(user_ids.len());
        let mut sendable = Vec::new();
        for user_id in user_ids {
            let address = resolution.users.get(user_id).and_then(|u| match channel {
                Channel::Email if u.has_email() => u.email.clone(),
                Channel::Sms if u.has_phone() => u.phone.clone(),
                _ => None,
            });
            match address {
                Some(address) => sendable.push((user_id.as_str(), address)),
                None => results.push(outcome(user_id, DeliveryStatus::SkippedNoContact)),
            }
        }

        // Futures are built eagerly so the stream holds no borrowing closure.
        let pending: Vec<_> = sendable
            .into_iter()
            .map(|(user_id, address)| async move {
                match sender.send(address.trim(), payload).await {
                    Ok(()) => outcome(user_id, DeliveryStatus::Sent),
                    Err(e) => {
                        warn!(user_id = %user_id, channel = %channel, error = %e, "Delivery failed");
                        outcome(user_id, DeliveryStatus::Failed)
                    }
                }
            })
            .collect();
        let sent: Vec<OutcomeRecord> = stream::iter(pending)
            .buffer_unordered(CONTACT_CONCURRENCY)
            .collect()
            .await;
        results.extend(sent);
        results
    }

    // Query and mutation API

    pub async fn get_notification(&self, id: &str) -> Result<Notification> {
        Notification::try_from(self.notifications.get(id).await?)
    }

    pub async fn list_notifications(
        &self,
        organization_id: &str,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>> {
        self.notifications
            .list(organization_id, filter)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    pub async fn get_stats(&self, notification_id: &str) -> Result<NotificationStats> {
        self.tracker.get_stats(notification_id).await
    }

    pub async fn user_notifications(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> Result<Vec<UserNotification>> {
        self.notifications
            .list_for_user(user_id, limit, offset, unread_only)
            .await?
            .into_iter()
            .map(UserNotification::try_from)
            .collect()
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64> {
        Ok(self.notifications.unread_count(user_id).await?.max(0))
    }

    /// `false` when it was already read.
    pub async fn mark_read(&self, notification_id: &str, user_id: &str) -> Result<bool> {
        self.notifications
            .mark_read(notification_id, user_id, now_ms())
            .await
    }

    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        self.notifications.mark_all_read(user_id, now_ms()).await
    }

    /// Delete a notification and its recipient rows.
    pub async fn delete_notification(&self, notification_id: &str, organization_id: &str) -> Result<()> {
        if self
            .notifications
            .delete(notification_id, organization_id)
            .await?
        {
            info!(notification_id = %notification_id, "Notification deleted");
            Ok(())
        } else {
            Err(Error::not_found("Notification", notification_id))
        }
    }

    /// Preferences for `user_id`, defaults when none are stored.
    pub async fn get_preferences(&self, user_id: &str) -> Result<NotificationPreferencesDbModel> {
        self.preferences.get(user_id).await
    }
}

/// Recipients with at least one `sent` channel and those with a `failed`
/// channel but nothing sent.
pub fn success_failure_counts(outcomes: &[OutcomeRecord]) -> (usize, usize) {
    let mut sent: BTreeSet<&str> = BTreeSet::new();
    let mut failed: BTreeSet<&str> = BTreeSet::new();
    for outcome in outcomes {
        match outcome.status {
            DeliveryStatus::Sent => {
                sent.insert(outcome.user_id.as_str());
            }
            DeliveryStatus::Failed => {
                failed.insert(outcome.user_id.as_str());
            }
            _ => {}
        }
    }
    let failed_only = failed.difference(&sent).count();
    (sent.len(), failed_only)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, channel: Channel, status: DeliveryStatus) -> OutcomeRecord {
        OutcomeRecord {
            user_id: user.to_string(),
            channel,
            status,
        }
    }

    #[test]
    fn test_push_tally_status() {
        let tally = |sent, failed, not_configured| PushTally {
            sent,
            failed,
            not_configured,
        };
        assert_eq!(tally(1, 3, 1).status(), DeliveryStatus::Sent);
        assert_eq!(tally(0, 1, 2).status(), DeliveryStatus::Failed);
        assert_eq!(tally(0, 0, 2).status(), DeliveryStatus::SkippedNotConfigured);
        assert_eq!(PushTally::default().status(), DeliveryStatus::SkippedNoSubscription);
    }

    #[test]
    fn test_success_failure_counts() {
        let outcomes = vec![
            record("u1", Channel::Push, DeliveryStatus::Sent),
            record("u1", Channel::Email, DeliveryStatus::Failed),
            record("u2", Channel::Push, DeliveryStatus::Failed),
            record("u3", Channel::Push, DeliveryStatus::SkippedQuietHours),
        ];
        assert_eq!(success_failure_counts(&outcomes), (1, 1));
    }

    #[test]
    fn test_request_validation_normalizes() {
        let mut request = CreateNotificationRequest {
            categories: vec![],
            title: "Practice".into(),
            message: "moved".into(),
            target: RecipientTarget::Everyone,
            channels: vec![Channel::Push, Channel::Push, Channel::InApp],
            sent_by: "admin".into(),
            related_event_id: None,
        };
        request.validate().unwrap();
        assert_eq!(request.channels, vec![Channel::Push, Channel::InApp]);
        assert_eq!(request.categories, vec![Category::Announcement]);

        request.title = "  ".into();
        assert!(matches!(request.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_request_defaults_category_from_json() {
        let request: CreateNotificationRequest = serde_json::from_str(
            r#"{"title":"t","message":"m","target":{"type":"everyone"},"channels":["in_app"],"sent_by":"a"}"#,
        )
        .unwrap();
        assert_eq!(request.categories, vec![Category::Announcement]);
    }
}
