//! Preference gate: category opt-outs, channel toggles and quiet hours.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::database::models::NotificationPreferencesDbModel;
use crate::database::repositories::PreferencesRepository;
use crate::database::time::now_ms;
use crate::domain::{Category, Channel, DeliveryStatus};
use crate::{Error, Result};

const TIME_FORMAT: &str = "%H:%M";

/// Partial preference update. Absent fields keep their stored value; an empty
/// string clears a quiet-hours bound.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PreferencesPatch {
    pub announcement: Option<bool>,
    pub event_reminder: Option<bool>,
    pub check_in: Option<bool>,
    pub rsvp_closing: Option<bool>,
    pub schedule_change: Option<bool>,
    pub campaign: Option<bool>,
    pub payment: Option<bool>,
    pub push_notifications: Option<bool>,
    pub email_notifications: Option<bool>,
    pub sms_notifications: Option<bool>,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub timezone: Option<String>,
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|_| Error::validation(format!("Invalid time of day '{raw}', expected HH:MM")))
}

fn merge_quiet_bound(current: &mut Option<String>, update: Option<String>) -> Result<()> {
    match update {
        None => {}
        Some(raw) if raw.trim().is_empty() => *current = None,
        Some(raw) => {
            let parsed = parse_time_of_day(&raw)?;
            *current = Some(parsed.format(TIME_FORMAT).to_string());
        }
    }
    Ok(())
}

impl PreferencesPatch {
    /// Merge onto `prefs`, validating times and timezone first.
    pub fn apply(self, prefs: &mut NotificationPreferencesDbModel) -> Result<()> {
        if let Some(tz) = &self.timezone {
            Tz::from_str(tz.trim())
                .map_err(|_| Error::validation(format!("Unknown timezone '{tz}'")))?;
        }

        merge_quiet_bound(&mut prefs.quiet_hours_start, self.quiet_hours_start)?;
        merge_quiet_bound(&mut prefs.quiet_hours_end, self.quiet_hours_end)?;

        let flags = [
            (&mut prefs.announcement, self.announcement),
            (&mut prefs.event_reminder, self.event_reminder),
            (&mut prefs.check_in, self.check_in),
            (&mut prefs.rsvp_closing, self.rsvp_closing),
            (&mut prefs.schedule_change, self.schedule_change),
            (&mut prefs.campaign, self.campaign),
            (&mut prefs.payment, self.payment),
            (&mut prefs.push_notifications, self.push_notifications),
            (&mut prefs.email_notifications, self.email_notifications),
            (&mut prefs.sms_notifications, self.sms_notifications),
        ];
        for (slot, value) in flags {
            if let Some(value) = value {
                *slot = value;
            }
        }

        if let Some(tz) = self.timezone {
            prefs.timezone = tz.trim().to_string();
        }
        Ok(())
    }
}

/// Whether `time` falls in `[start, end)`. A window that ends before it
/// starts wraps past midnight; `start == end` is empty.
pub fn quiet_window_contains(start: NaiveTime, end: NaiveTime, time: NaiveTime) -> bool {
    if start < end {
        start <= time && time < end
    } else if start > end {
        time >= start || time < end
    } else {
        false
    }
}

/// Whether `now` is inside the user's quiet hours, in their own timezone.
pub fn in_quiet_hours(prefs: &NotificationPreferencesDbModel, now: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (&prefs.quiet_hours_start, &prefs.quiet_hours_end) else {
        return false;
    };
    let (Ok(start), Ok(end)) = (parse_time_of_day(start), parse_time_of_day(end)) else {
        tracing::warn!(user_id = %prefs.user_id, "Ignoring unparseable quiet hours");
        return false;
    };
    let tz = Tz::from_str(&prefs.timezone).unwrap_or(Tz::UTC);
    let local = now.with_timezone(&tz).time();
    quiet_window_contains(start, end, local)
}

/// Gate decision for one (recipient, channel). `None` means deliver.
pub fn evaluate(
    prefs: &NotificationPreferencesDbModel,
    categories: &[Category],
    channel: Channel,
    now: DateTime<Utc>,
) -> Option<DeliveryStatus> {
    if !channel.is_external() {
        return None;
    }
    if !prefs.channel_enabled(channel) || categories.iter().any(|c| !prefs.category_enabled(*c)) {
        return Some(DeliveryStatus::SkippedUserPreference);
    }
    if in_quiet_hours(prefs, now) {
        return Some(DeliveryStatus::SkippedQuietHours);
    }
    None
}

pub struct PreferenceGate {
    repo: Arc<dyn PreferencesRepository>,
}

impl PreferenceGate {
    pub fn new(repo: Arc<dyn PreferencesRepository>) -> Self {
        Self { repo }
    }

    /// Stored preferences, or the all-enabled defaults.
    pub async fn get(&self, user_id: &str) -> Result<NotificationPreferencesDbModel> {
        Ok(self
            .repo
            .get(user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferencesDbModel::defaults(user_id)))
    }

    /// Preferences for every user in `user_ids`, defaults filled in.
    pub async fn get_many(
        &self,
        user_ids: &[String],
    ) -> Result<HashMap<String, NotificationPreferencesDbModel>> {
        let mut map: HashMap<String, NotificationPreferencesDbModel> = self
            .repo
            .get_many(user_ids)
            .await?
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();
        for user_id in user_ids {
            map.entry(user_id.clone())
                .or_insert_with(|| NotificationPreferencesDbModel::defaults(user_id.as_str()));
        }
        Ok(map)
    }

    pub async fn update(
        &self,
        user_id: &str,
        patch: PreferencesPatch,
    ) -> Result<NotificationPreferencesDbModel> {
        let updated_at = now_ms();
        let prefs = self
            .repo
            .modify(user_id, &|prefs| {
                patch.clone().apply(prefs)?;
                prefs.updated_at = updated_at;
                Ok(())
            })
            .await?;
        tracing::info!(user_id = %user_id, "Updated notification preferences");
        Ok(prefs)
    }

    pub async fn allows(
        &self,
        user_id: &str,
        category: Category,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let prefs = self.get(user_id).await?;
        Ok(evaluate(&prefs, &[category], channel, now).is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
    }

    fn with_quiet(start: &str, end: &str) -> NotificationPreferencesDbModel {
        let mut prefs = NotificationPreferencesDbModel::defaults("u1");
        prefs.quiet_hours_start = Some(start.to_string());
        prefs.quiet_hours_end = Some(end.to_string());
        prefs
    }

    #[rstest]
    #[case("22:00", "07:00", 23, 30, false)]
    #[case("22:00", "07:00", 6, 30, false)]
    #[case("22:00", "07:00", 12, 0, true)]
    #[case("22:00", "07:00", 7, 0, true)]
    #[case("22:00", "07:00", 22, 0, false)]
    #[case("07:00", "22:00", 23, 30, true)]
    #[case("07:00", "22:00", 12, 0, false)]
    #[case("09:00", "09:00", 9, 0, true)]
    fn test_quiet_hours_gate(
        #[case] start: &str,
        #[case] end: &str,
        #[case] hour: u32,
        #[case] minute: u32,
        #[case] allowed: bool,
    ) {
        let prefs = with_quiet(start, end);
        let decision = evaluate(&prefs, &[Category::Announcement], Channel::Push, at(hour, minute));
        assert_eq!(decision.is_none(), allowed);
        if !allowed {
            assert_eq!(decision, Some(DeliveryStatus::SkippedQuietHours));
        }
    }

    #[test]
    fn test_quiet_hours_use_local_time() {
        // 03:30 UTC is 23:30 the previous evening in New York (EDT).
        let mut prefs = with_quiet("22:00", "23:00");
        prefs.timezone = "America/New_York".to_string();
        assert!(!in_quiet_hours(&prefs, at(3, 30)));
        assert!(in_quiet_hours(&prefs, at(2, 30)));
    }

    #[test]
    fn test_disabled_category_or_channel_skips() {
        let mut prefs = NotificationPreferencesDbModel::defaults("u1");
        prefs.payment = false;
        assert_eq!(
            evaluate(&prefs, &[Category::Announcement, Category::Payment], Channel::Email, at(12, 0)),
            Some(DeliveryStatus::SkippedUserPreference)
        );

        let mut prefs = NotificationPreferencesDbModel::defaults("u1");
        prefs.sms_notifications = false;
        assert_eq!(
            evaluate(&prefs, &[Category::Announcement], Channel::Sms, at(12, 0)),
            Some(DeliveryStatus::SkippedUserPreference)
        );
        assert_eq!(evaluate(&prefs, &[Category::Announcement], Channel::Push, at(12, 0)), None);
    }

    #[test]
    fn test_in_app_is_never_gated() {
        let mut prefs = with_quiet("00:00", "23:59");
        prefs.announcement = false;
        assert_eq!(evaluate(&prefs, &[Category::Announcement], Channel::InApp, at(12, 0)), None);
    }

    #[test]
    fn test_patch_only_touches_supplied_fields() {
        let mut prefs = with_quiet("22:00", "07:00");
        let patch = PreferencesPatch {
            push_notifications: Some(false),
            quiet_hours_end: Some(" 06:30 ".to_string()),
            ..Default::default()
        };
        patch.apply(&mut prefs).unwrap();
        assert!(!prefs.push_notifications);
        assert!(prefs.email_notifications);
        assert_eq!(prefs.quiet_hours_start.as_deref(), Some("22:00"));
        assert_eq!(prefs.quiet_hours_end.as_deref(), Some("06:30"));

        let clear = PreferencesPatch {
            quiet_hours_start: Some(String::new()),
            ..Default::default()
        };
        clear.apply(&mut prefs).unwrap();
        assert_eq!(prefs.quiet_hours_start, None);
    }

    #[test]
    fn test_patch_rejects_bad_values() {
        let mut prefs = NotificationPreferencesDbModel::defaults("u1");
        let bad_tz = PreferencesPatch {
            timezone: Some("Mars/Olympus".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad_tz.apply(&mut prefs), Err(Error::Validation(_))));

        let bad_time = PreferencesPatch {
            quiet_hours_start: Some("25:00".to_string()),
            ..Default::default()
        };
        assert!(bad_time.apply(&mut prefs).is_err());
        assert_eq!(prefs.timezone, "UTC");
    }
}
