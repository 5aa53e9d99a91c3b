//! Scheduler service: drives the reminder and campaign cycles on timers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::campaigns::{CampaignCycleReport, CampaignService};
use super::reminders::{ReminderCycle, ReminderCycleReport};
use crate::Result;
use crate::config::SchedulerConfig;

pub struct SchedulerService {
    reminders: Arc<ReminderCycle>,
    campaigns: Arc<CampaignService>,
    config: SchedulerConfig,
}

impl SchedulerService {
    pub fn new(
        reminders: Arc<ReminderCycle>,
        campaigns: Arc<CampaignService>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            reminders,
            campaigns,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn run_reminder_cycle_at(&self, now: DateTime<Utc>) -> Result<ReminderCycleReport> {
        self.reminders.run_at(now).await
    }

    pub async fn run_campaign_cycle_at(&self, now: DateTime<Utc>) -> Result<CampaignCycleReport> {
        self.campaigns.run_due_at(now).await
    }

    /// Spawn both duty cycles. They stop when `cancellation_token` fires.
    pub fn start(&self, cancellation_token: CancellationToken) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Scheduler disabled, no background cycles started");
            return Vec::new();
        }
        vec![
            self.start_reminder_loop(cancellation_token.clone()),
            self.start_campaign_loop(cancellation_token),
        ]
    }

    fn start_reminder_loop(&self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let reminders = self.reminders.clone();
        let period = self.config.reminder_tick;

        tokio::spawn(async move {
            let mut check_interval = interval(period);
            check_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("Reminder cycle started (interval: {}s)", period.as_secs());

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Reminder cycle shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        match reminders.run_at(Utc::now()).await {
                            Ok(report) => {
                                debug!(
                                    events = report.events_scanned,
                                    reminders = report.reminders_sent,
                                    "Reminder tick completed"
                                );
                            }
                            Err(e) => {
                                error!("Reminder cycle failed: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    fn start_campaign_loop(&self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let campaigns = self.campaigns.clone();
        let period = self.config.campaign_tick;

        tokio::spawn(async move {
            let mut check_interval = interval(period);
            check_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("Campaign cycle started (interval: {}s)", period.as_secs());

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Campaign cycle shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        match campaigns.run_due_at(Utc::now()).await {
                            Ok(report) => {
                                if report.due > 0 {
                                    debug!(
                                        executed = report.executed,
                                        failed = report.failed,
                                        "Campaign tick completed"
                                    );
                                }
                            }
                            Err(e) => {
                                error!("Campaign cycle failed: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }
}
