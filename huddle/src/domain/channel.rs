//! Delivery channels, categories and per-channel statuses.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A delivery channel requested for a notification.
///
/// `InApp` is satisfied by the recipient row itself and never dispatched.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    InApp,
    Push,
    Email,
    Sms,
}

impl Channel {
    pub fn is_external(self) -> bool {
        !matches!(self, Self::InApp)
    }
}

/// Notification category, used for per-user opt-out.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Announcement,
    EventReminder,
    CheckIn,
    RsvpClosing,
    ScheduleChange,
    Campaign,
    Payment,
}

/// Outcome recorded for one (recipient, channel) pair.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    SkippedUserPreference,
    SkippedQuietHours,
    SkippedNotConfigured,
    SkippedNoSubscription,
    SkippedNoContact,
}

impl DeliveryStatus {
    pub fn is_skip(self) -> bool {
        !matches!(self, Self::Sent | Self::Failed)
    }
}

/// Push transport behind the `push` channel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Transport {
    WebPush,
    Apns,
    Fcm,
}

/// Notification lifecycle status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_strings_match_serde() {
        let status = DeliveryStatus::SkippedQuietHours;
        assert_eq!(status.to_string(), "skipped_quiet_hours");
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            "\"skipped_quiet_hours\""
        );
        assert_eq!(
            DeliveryStatus::from_str("skipped_no_contact").unwrap(),
            DeliveryStatus::SkippedNoContact
        );
    }

    #[test]
    fn test_in_app_is_not_external() {
        assert!(!Channel::InApp.is_external());
        assert!(Channel::Sms.is_external());
        assert!(DeliveryStatus::SkippedNotConfigured.is_skip());
        assert!(!DeliveryStatus::Failed.is_skip());
    }
}
