//! Event reminder cycle.
//!
//! Each tick looks at events starting within the largest milestone (plus
//! tolerance). For every milestone whose band contains the time to start,
//! participants not yet reminded get one shared notification.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::database::models::EventDbModel;
use crate::database::repositories::{DirectoryRepository, NotificationRepository};
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{Category, Channel, RecipientTarget};
use crate::metrics::DeliveryMetrics;
use crate::notification::{CreateNotificationRequest, NotificationService};
use crate::Result;

/// Sender recorded on scheduler-generated notifications.
pub const SCHEDULER_SENDER: &str = "scheduler";

const REMINDER_CHANNELS: [Channel; 2] = [Channel::InApp, Channel::Push];

/// A point before an event start at which participants are notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Milestone {
    pub name: &'static str,
    pub minutes_before: i64,
    pub category: Category,
}

pub const MILESTONES: [Milestone; 5] = [
    Milestone {
        name: "reminder_24h",
        minutes_before: 24 * 60,
        category: Category::EventReminder,
    },
    Milestone {
        name: "reminder_2h",
        minutes_before: 120,
        category: Category::EventReminder,
    },
    Milestone {
        name: "reminder_30m",
        minutes_before: 30,
        category: Category::EventReminder,
    },
    Milestone {
        name: "check_in_open",
        minutes_before: 30,
        category: Category::CheckIn,
    },
    // Fires 30 minutes ahead of the RSVP cutoff, which is 30 minutes before start.
    Milestone {
        name: "rsvp_closing",
        minutes_before: 60,
        category: Category::RsvpClosing,
    },
];

impl Milestone {
    /// Whether `until_start` lies in `[m - tolerance, m + tolerance]`.
    pub fn is_due(&self, until_start: Duration, tolerance: Duration) -> bool {
        let target = Duration::minutes(self.minutes_before);
        until_start >= target - tolerance && until_start <= target + tolerance
    }

    pub fn title(&self, event_title: &str) -> String {
        match self.category {
            Category::CheckIn => format!("Check-in open: {event_title}"),
            Category::RsvpClosing => format!("RSVP closing soon: {event_title}"),
            _ => format!("Reminder: {event_title}"),
        }
    }

    pub fn message(&self, event_title: &str) -> String {
        match self.name {
            "reminder_24h" => format!("{event_title} starts in 24 hours."),
            "reminder_2h" => format!("{event_title} starts in 2 hours."),
            "check_in_open" => format!("Check-in is now open for {event_title}."),
            "rsvp_closing" => format!("RSVPs for {event_title} close in 30 minutes."),
            _ => format!("{event_title} starts in {} minutes.", self.minutes_before),
        }
    }
}

/// Milestones due for an event starting at `start`.
pub fn due_milestones(start: DateTime<Utc>, now: DateTime<Utc>, tolerance: Duration) -> Vec<Milestone> {
    let until_start = start - now;
    MILESTONES
        .iter()
        .copied()
        .filter(|m| m.is_due(until_start, tolerance))
        .collect()
}

/// Outcome of one reminder tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderCycleReport {
    pub events_scanned: usize,
    pub notifications_created: usize,
    pub reminders_sent: usize,
    pub events_failed: usize,
}

pub struct ReminderCycle {
    directory: Arc<dyn DirectoryRepository>,
    notifications: Arc<dyn NotificationRepository>,
    service: Arc<NotificationService>,
    metrics: Arc<DeliveryMetrics>,
    lookback: Duration,
    tolerance: Duration,
}

impl ReminderCycle {
    pub fn new(
        directory: Arc<dyn DirectoryRepository>,
        service: Arc<NotificationService>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            directory,
            notifications: service.notifications().clone(),
            metrics: service.metrics().clone(),
            service,
            lookback: config.reminder_lookback,
            tolerance: config.reminder_tolerance,
        }
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ReminderCycleReport> {
        let shortest = MILESTONES.iter().map(|m| m.minutes_before).min().unwrap_or_default();
        let longest = MILESTONES.iter().map(|m| m.minutes_before).max().unwrap_or_default();
        let from = now + Duration::minutes(shortest) - self.tolerance;
        let to = now + Duration::minutes(longest) + self.tolerance;

        let events = self
            .directory
            .events_starting_between(datetime_to_ms(from), datetime_to_ms(to))
            .await?;

        let mut report = ReminderCycleReport {
            events_scanned: events.len(),
            ..Default::default()
        };

        for event in events.iter().filter(|e| !e.is_cancelled()) {
            match self.process_event(event, now).await {
                Ok((notifications, reminders)) => {
                    report.notifications_created += notifications;
                    report.reminders_sent += reminders;
                }
                Err(e) => {
                    report.events_failed += 1;
                    warn!(event_id = %event.id, error = %e, "Reminder processing failed for event");
                }
            }
        }

        self.metrics.record_reminder_tick(report.reminders_sent as u64);
        if report.reminders_sent > 0 {
            info!(
                events = report.events_scanned,
                notifications = report.notifications_created,
                reminders = report.reminders_sent,
                "Reminder cycle finished"
            );
        } else {
            debug!(events = report.events_scanned, "Reminder cycle found nothing to send");
        }
        Ok(report)
    }

    async fn process_event(&self, event: &EventDbModel, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let milestones = due_milestones(ms_to_datetime(event.start_time), now, self.tolerance);
        if milestones.is_empty() {
            return Ok((0, 0));
        }

        let participants: Vec<String> = self
            .service
            .resolver()
            .event_participants(event)
            .await?
            .into_iter()
            .collect();
        if participants.is_empty() {
            debug!(event_id = %event.id, "Event has no participants");
            return Ok((0, 0));
        }

        let mut created = 0;
        let mut reminded = 0;
        for milestone in milestones {
            let recipients = self.claim_recipients(event, &milestone, &participants, now).await?;
            if recipients.is_empty() {
                continue;
            }

            let request = CreateNotificationRequest {
                categories: vec![milestone.category],
                title: milestone.title(&event.title),
                message: milestone.message(&event.title),
                target: RecipientTarget::Users(recipients.clone()),
                channels: REMINDER_CHANNELS.to_vec(),
                sent_by: SCHEDULER_SENDER.to_string(),
                related_event_id: Some(event.id.clone()),
            };

            match self
                .service
                .create_notification_at(&event.organization_id, request, now)
                .await
            {
                Ok(result) => {
                    self.notifications
                        .attach_reminder_notification(
                            &event.id,
                            milestone.name,
                            &recipients,
                            &result.notification.id,
                        )
                        .await?;
                    created += 1;
                    reminded += result.recipient_count;
                    debug!(
                        event_id = %event.id,
                        milestone = milestone.name,
                        recipients = result.recipient_count,
                        "Reminder sent"
                    );
                }
                Err(e) => {
                    // Give the slots back so a later tick can retry.
                    self.notifications
                        .release_reminder_claims(&event.id, milestone.name, &recipients)
                        .await?;
                    return Err(e);
                }
            }
        }
        Ok((created, reminded))
    }

    /// Participants with no recent equivalent notification whose ledger slot
    /// this tick managed to claim.
    async fn claim_recipients(
        &self,
        event: &EventDbModel,
        milestone: &Milestone,
        participants: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let since = datetime_to_ms(now - self.lookback);
        let recent: HashSet<String> = self
            .notifications
            .recently_notified(participants, &event.id, milestone.category, since)
            .await?;

        let now_ms = datetime_to_ms(now);
        let mut claimed = Vec::new();
        for user_id in participants.iter().filter(|u| !recent.contains(*u)) {
            if self
                .notifications
                .claim_reminder(user_id, &event.id, milestone.name, now_ms)
                .await?
            {
                claimed.push(user_id.clone());
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn names(milestones: &[Milestone]) -> Vec<&'static str> {
        milestones.iter().map(|m| m.name).collect()
    }

    #[rstest]
    #[case(24 * 60, vec!["reminder_24h"])]
    #[case(24 * 60 + 5, vec!["reminder_24h"])]
    #[case(24 * 60 - 6, vec![])]
    #[case(120, vec!["reminder_2h"])]
    #[case(62, vec!["rsvp_closing"])]
    #[case(28, vec!["reminder_30m", "check_in_open"])]
    #[case(10, vec![])]
    fn test_due_milestones(#[case] minutes_until: i64, #[case] expected: Vec<&'static str>) {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let start = now + Duration::minutes(minutes_until);
        assert_eq!(names(&due_milestones(start, now, Duration::minutes(5))), expected);
    }

    #[test]
    fn test_milestone_copy() {
        let rsvp = MILESTONES[4];
        assert_eq!(rsvp.title("U10 Final"), "RSVP closing soon: U10 Final");
        assert_eq!(rsvp.message("U10 Final"), "RSVPs for U10 Final close in 30 minutes.");
        assert_eq!(MILESTONES[2].message("Practice"), "Practice starts in 30 minutes.");
    }
}
