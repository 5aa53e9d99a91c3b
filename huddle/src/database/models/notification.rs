//! Notification and recipient models.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::database::time::{ms_to_datetime, opt_ms_to_datetime};
use crate::domain::{Category, Channel, DeliveryStatus, NotificationStatus, RecipientTarget};
use crate::{Error, Result};

/// Per-recipient map of channel to delivery status.
pub type DeliveryMap = BTreeMap<Channel, DeliveryStatus>;

/// Row of the `notification` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    pub organization_id: String,
    /// JSON array of category names
    pub categories: String,
    pub title: String,
    pub message: String,
    pub target_kind: String,
    /// JSON array of ids / role names
    pub target_ids: String,
    /// JSON array of channel names
    pub channels: String,
    pub sent_by: String,
    pub status: String,
    pub related_event_id: Option<String>,
    pub created_at: i64,
    pub sent_at: Option<i64>,
}

impl NotificationDbModel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: impl Into<String>,
        categories: &[Category],
        title: impl Into<String>,
        message: impl Into<String>,
        target: &RecipientTarget,
        channels: &[Channel],
        sent_by: impl Into<String>,
        related_event_id: Option<String>,
        now_ms: i64,
    ) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            categories: serde_json::to_string(categories)?,
            title: title.into(),
            message: message.into(),
            target_kind: target.kind().to_string(),
            target_ids: target.ids_json()?,
            channels: serde_json::to_string(channels)?,
            sent_by: sent_by.into(),
            status: NotificationStatus::Sent.to_string(),
            related_event_id,
            created_at: now_ms,
            sent_at: Some(now_ms),
        })
    }

    pub fn categories(&self) -> Result<Vec<Category>> {
        Ok(serde_json::from_str(&self.categories)?)
    }

    pub fn channels(&self) -> Result<Vec<Channel>> {
        Ok(serde_json::from_str(&self.channels)?)
    }

    pub fn target(&self) -> Result<RecipientTarget> {
        RecipientTarget::from_columns(&self.target_kind, &self.target_ids)
    }

    pub fn status(&self) -> Result<NotificationStatus> {
        NotificationStatus::from_str(&self.status)
            .map_err(|_| Error::Database(format!("unknown notification status '{}'", self.status)))
    }
}

/// Typed view of a notification, as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: String,
    pub organization_id: String,
    pub categories: Vec<Category>,
    pub title: String,
    pub message: String,
    pub target: RecipientTarget,
    pub channels: Vec<Channel>,
    pub sent_by: String,
    pub status: NotificationStatus,
    pub related_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<NotificationDbModel> for Notification {
    type Error = Error;

    fn try_from(model: NotificationDbModel) -> Result<Self> {
        Ok(Self {
            categories: model.categories()?,
            target: model.target()?,
            channels: model.channels()?,
            status: model.status()?,
            id: model.id,
            organization_id: model.organization_id,
            title: model.title,
            message: model.message,
            sent_by: model.sent_by,
            related_event_id: model.related_event_id,
            created_at: ms_to_datetime(model.created_at),
            sent_at: opt_ms_to_datetime(model.sent_at),
        })
    }
}

/// Row of the `notification_recipient` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationRecipientDbModel {
    pub id: String,
    pub notification_id: String,
    pub user_id: String,
    pub is_read: bool,
    pub read_at: Option<i64>,
    /// JSON object: channel -> delivery status
    pub delivery_status: String,
    pub created_at: i64,
}

impl NotificationRecipientDbModel {
    pub fn new(notification_id: impl Into<String>, user_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification_id: notification_id.into(),
            user_id: user_id.into(),
            is_read: false,
            read_at: None,
            delivery_status: "{}".to_string(),
            created_at: now_ms,
        }
    }

    /// Decode the delivery map, ignoring entries this build does not know.
    pub fn delivery_map(&self) -> DeliveryMap {
        parse_delivery_map(&self.delivery_status)
    }
}

pub(crate) fn parse_delivery_map(raw: &str) -> DeliveryMap {
    let entries: BTreeMap<String, String> = serde_json::from_str(raw).unwrap_or_default();
    entries
        .into_iter()
        .filter_map(|(channel, status)| {
            Some((
                Channel::from_str(&channel).ok()?,
                DeliveryStatus::from_str(&status).ok()?,
            ))
        })
        .collect()
}

/// A notification joined with one user's recipient row.
#[derive(Debug, Clone, FromRow)]
pub struct UserNotificationRow {
    #[sqlx(flatten)]
    pub notification: NotificationDbModel,
    pub is_read: bool,
    pub read_at: Option<i64>,
    pub delivery_status: String,
    pub received_at: i64,
}

/// A notification as seen from a user's inbox.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserNotification {
    pub notification: Notification,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryMap,
    pub received_at: DateTime<Utc>,
}

impl TryFrom<UserNotificationRow> for UserNotification {
    type Error = Error;

    fn try_from(row: UserNotificationRow) -> Result<Self> {
        Ok(Self {
            delivery_status: parse_delivery_map(&row.delivery_status),
            notification: row.notification.try_into()?,
            is_read: row.is_read,
            read_at: opt_ms_to_datetime(row.read_at),
            received_at: ms_to_datetime(row.received_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_map_tolerates_unknown_entries() {
        let map = parse_delivery_map(r#"{"push":"sent","fax":"sent","email":"exploded"}"#);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Channel::Push), Some(&DeliveryStatus::Sent));

        assert!(parse_delivery_map("not json").is_empty());
    }

    #[test]
    fn test_new_notification_is_sent() {
        let model = NotificationDbModel::new(
            "org",
            &[Category::Announcement],
            "Title",
            "Body",
            &RecipientTarget::Everyone,
            &[Channel::InApp, Channel::Push],
            "admin",
            None,
            1_000,
        )
        .unwrap();

        let notification = Notification::try_from(model).unwrap();
        assert_eq!(notification.status, NotificationStatus::Sent);
        assert_eq!(notification.channels, vec![Channel::InApp, Channel::Push]);
        assert_eq!(notification.sent_at, Some(ms_to_datetime(1_000)));
    }
}
