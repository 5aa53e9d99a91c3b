//! Notification preference model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::domain::{Category, Channel};

/// Row of the `notification_preferences` table.
///
/// Users without a row get [`NotificationPreferencesDbModel::defaults`]:
/// everything enabled, no quiet hours.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct NotificationPreferencesDbModel {
    pub user_id: String,
    pub announcement: bool,
    pub event_reminder: bool,
    pub check_in: bool,
    pub rsvp_closing: bool,
    pub schedule_change: bool,
    pub campaign: bool,
    pub payment: bool,
    pub push_notifications: bool,
    pub email_notifications: bool,
    pub sms_notifications: bool,
    /// Local time of day, `HH:MM`
    pub quiet_hours_start: Option<String>,
    /// Local time of day, `HH:MM`
    pub quiet_hours_end: Option<String>,
    /// IANA timezone name
    pub timezone: String,
    pub updated_at: i64,
}

impl NotificationPreferencesDbModel {
    pub fn defaults(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            announcement: true,
            event_reminder: true,
            check_in: true,
            rsvp_closing: true,
            schedule_change: true,
            campaign: true,
            payment: true,
            push_notifications: true,
            email_notifications: true,
            sms_notifications: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            timezone: "UTC".to_string(),
            updated_at: 0,
        }
    }

    pub fn category_enabled(&self, category: Category) -> bool {
        match category {
            Category::Announcement => self.announcement,
            Category::EventReminder => self.event_reminder,
            Category::CheckIn => self.check_in,
            Category::RsvpClosing => self.rsvp_closing,
            Category::ScheduleChange => self.schedule_change,
            Category::Campaign => self.campaign,
            Category::Payment => self.payment,
        }
    }

    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::InApp => true,
            Channel::Push => self.push_notifications,
            Channel::Email => self.email_notifications,
            Channel::Sms => self.sms_notifications,
        }
    }
}
