//! Delivery tracker: per-recipient channel outcomes and read-side stats.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::Result;
use crate::database::models::NotificationRecipientDbModel;
use crate::database::repositories::{NotificationRepository, OutcomeRecord};
use crate::domain::{Channel, DeliveryStatus};

/// Channel to status to recipient count.
pub type DeliveryBreakdown = BTreeMap<Channel, BTreeMap<DeliveryStatus, u64>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct NotificationStats {
    pub total_recipients: u64,
    pub read_count: u64,
    pub unread_count: u64,
    /// Channels never attempted for a recipient are absent from its counts.
    #[schema(value_type = Object)]
    pub delivery: DeliveryBreakdown,
}

/// Fold recipient rows into stats. Rows with missing or partial channel
/// maps contribute only the channels they carry.
pub fn fold_stats(recipients: &[NotificationRecipientDbModel]) -> NotificationStats {
    let mut stats = NotificationStats::default();
    for row in recipients {
        stats.total_recipients += 1;
        if row.is_read {
            stats.read_count += 1;
        } else {
            stats.unread_count += 1;
        }
        for (channel, status) in row.delivery_map() {
            *stats
                .delivery
                .entry(channel)
                .or_default()
                .entry(status)
                .or_default() += 1;
        }
    }
    stats
}

pub struct DeliveryTracker {
    repo: Arc<dyn NotificationRepository>,
}

impl DeliveryTracker {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }

    /// Merge one channel status into the recipient's map, leaving the other
    /// channels untouched.
    pub async fn record_outcome(
        &self,
        notification_id: &str,
        user_id: &str,
        channel: Channel,
        status: DeliveryStatus,
    ) -> Result<()> {
        self.repo
            .record_outcome(notification_id, user_id, channel, status)
            .await
    }

    pub async fn record_outcomes(
        &self,
        notification_id: &str,
        outcomes: &[OutcomeRecord],
    ) -> Result<()> {
        if outcomes.is_empty() {
            return Ok(());
        }
        self.repo.record_outcomes(notification_id, outcomes).await
    }

    /// Stats for an existing notification; `NotFound` otherwise.
    pub async fn get_stats(&self, notification_id: &str) -> Result<NotificationStats> {
        self.repo.get(notification_id).await?;
        let recipients = self.repo.list_recipients(notification_id).await?;
        Ok(fold_stats(&recipients))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user: &str, read: bool, delivery: &str) -> NotificationRecipientDbModel {
        let mut row = NotificationRecipientDbModel::new("n1", user, 0);
        row.is_read = read;
        row.delivery_status = delivery.to_string();
        row
    }

    #[test]
    fn test_fold_tolerates_partial_maps() {
        let rows = vec![
            row("u1", true, r#"{"push":"sent","email":"failed"}"#),
            row("u2", false, r#"{"push":"skipped_quiet_hours"}"#),
            row("u3", false, ""),
            row("u4", false, r#"{"push":"sent","carrier_pigeon":"sent"}"#),
        ];
        let stats = fold_stats(&rows);

        assert_eq!(stats.total_recipients, 4);
        assert_eq!(stats.read_count, 1);
        assert_eq!(stats.unread_count, 3);
        assert_eq!(stats.delivery[&Channel::Push][&DeliveryStatus::Sent], 2);
        assert_eq!(
            stats.delivery[&Channel::Push][&DeliveryStatus::SkippedQuietHours],
            1
        );
        assert_eq!(stats.delivery[&Channel::Email][&DeliveryStatus::Failed], 1);
        assert!(!stats.delivery.contains_key(&Channel::Sms));
    }
}
