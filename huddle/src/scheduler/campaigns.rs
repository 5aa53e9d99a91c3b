//! Campaign management and the campaign execution cycle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::recurrence::{RecurrenceRule, first_run, next_run, parse_time_of_day, parse_timezone, resume_run};
use crate::config::SchedulerConfig;
use crate::database::models::{Campaign, CampaignDbModel, CampaignRunDbModel};
use crate::database::repositories::CampaignRepository;
use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};
use crate::domain::{
    CampaignStatus, Category, Channel, RecipientTarget, RecurrenceFrequency, RunStatus,
    ScheduleType,
};
use crate::metrics::DeliveryMetrics;
use crate::notification::{CreateNotificationRequest, NotificationService};
use crate::{Error, Result};

fn default_campaign_categories() -> Vec<Category> {
    vec![Category::Campaign]
}

fn default_interval() -> i64 {
    1
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Input for creating a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCampaign {
    pub name: String,
    pub title: String,
    pub message: String,
    #[serde(default = "default_campaign_categories")]
    pub categories: Vec<Category>,
    pub target: RecipientTarget,
    pub channels: Vec<Channel>,
    pub created_by: String,
    pub schedule_type: ScheduleType,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub recurrence_frequency: Option<RecurrenceFrequency>,
    #[serde(default = "default_interval")]
    pub recurrence_interval: i64,
    #[serde(default)]
    pub cron_expression: Option<String>,
    /// `HH:MM` in `timezone`
    #[serde(default)]
    pub time_of_day: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub recurrence_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence_end_after_occurrences: Option<i64>,
}

impl NewCampaign {
    fn into_model(self, organization_id: &str, now_ms: i64) -> Result<CampaignDbModel> {
        if self.name.trim().is_empty() || self.title.trim().is_empty() || self.message.trim().is_empty() {
            return Err(Error::validation("name, title and message must not be empty"));
        }
        if self.channels.is_empty() {
            return Err(Error::validation("at least one channel is required"));
        }
        if let Some(raw) = &self.time_of_day {
            parse_time_of_day(raw)?;
        }
        parse_timezone(&self.timezone)?;

        let categories = if self.categories.is_empty() {
            default_campaign_categories()
        } else {
            self.categories
        };

        let mut model = CampaignDbModel {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            name: self.name,
            title: self.title,
            message: self.message,
            categories: serde_json::to_string(&categories)?,
            target_kind: self.target.kind().to_string(),
            target_ids: self.target.ids_json()?,
            channels: serde_json::to_string(&self.channels)?,
            created_by: self.created_by,
            schedule_type: self.schedule_type.to_string(),
            scheduled_at: datetime_to_ms(self.scheduled_at),
            recurrence_frequency: self.recurrence_frequency.map(|f| f.to_string()),
            recurrence_interval: self.recurrence_interval,
            cron_expression: self.cron_expression,
            time_of_day: self.time_of_day,
            timezone: self.timezone.trim().to_string(),
            recurrence_end_date: self.recurrence_end_date.map(datetime_to_ms),
            recurrence_end_after_occurrences: self.recurrence_end_after_occurrences,
            status: CampaignStatus::Active.to_string(),
            last_run_at: None,
            next_run_at: None,
            total_runs: 0,
            locked_until: None,
            created_at: now_ms,
            updated_at: now_ms,
        };

        // Validates frequency, interval, cron and end conditions.
        RecurrenceRule::from_campaign(&model)?;
        model.next_run_at = first_run(&model)?.map(datetime_to_ms);
        if model.next_run_at.is_none() {
            return Err(Error::validation("schedule never produces an occurrence"));
        }
        Ok(model)
    }
}

/// Outcome of one campaign tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignCycleReport {
    pub due: usize,
    pub executed: usize,
    pub failed: usize,
    /// Skipped because another tick held the lease.
    pub contended: usize,
}

pub struct CampaignService {
    repo: Arc<dyn CampaignRepository>,
    notifications: Arc<NotificationService>,
    metrics: Arc<DeliveryMetrics>,
    lease: Duration,
    max_per_tick: i64,
}

impl CampaignService {
    pub fn new(
        repo: Arc<dyn CampaignRepository>,
        notifications: Arc<NotificationService>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            repo,
            metrics: notifications.metrics().clone(),
            notifications,
            lease: config.campaign_lease,
            max_per_tick: config.max_campaigns_per_tick,
        }
    }

    pub async fn create(&self, organization_id: &str, new: NewCampaign) -> Result<Campaign> {
        let model = new.into_model(organization_id, now_ms())?;
        self.repo.create(&model).await?;
        info!(
            campaign_id = %model.id,
            organization_id = %organization_id,
            schedule_type = %model.schedule_type,
            "Campaign created"
        );
        Campaign::try_from(model)
    }

    pub async fn list(&self, organization_id: &str) -> Result<Vec<Campaign>> {
        self.repo
            .list_for_org(organization_id)
            .await?
            .into_iter()
            .map(Campaign::try_from)
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<Campaign> {
        Campaign::try_from(self.repo.get(id).await?)
    }

    pub async fn pause(&self, id: &str) -> Result<Campaign> {
        let model = self.repo.get(id).await?;
        if model.status()? != CampaignStatus::Active {
            return Err(Error::validation(format!(
                "campaign {} is {} and cannot be paused",
                id, model.status
            )));
        }
        self.repo
            .set_status(id, CampaignStatus::Paused, model.next_run_at, now_ms())
            .await?;
        info!(campaign_id = %id, "Campaign paused");
        self.get(id).await
    }

    /// Resume a paused campaign, skipping occurrences missed while paused.
    pub async fn resume(&self, id: &str) -> Result<Campaign> {
        self.resume_at(id, Utc::now()).await
    }

    pub async fn resume_at(&self, id: &str, now: DateTime<Utc>) -> Result<Campaign> {
        let model = self.repo.get(id).await?;
        if model.status()? != CampaignStatus::Paused {
            return Err(Error::validation(format!(
                "campaign {} is {} and cannot be resumed",
                id, model.status
            )));
        }
        let next = resume_run(&model, now)?;
        let status = if next.is_some() {
            CampaignStatus::Active
        } else {
            CampaignStatus::Completed
        };
        self.repo
            .set_status(id, status, next.map(datetime_to_ms), datetime_to_ms(now))
            .await?;
        info!(campaign_id = %id, status = %status, "Campaign resumed");
        self.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.repo.delete(id).await? {
            info!(campaign_id = %id, "Campaign deleted");
            Ok(())
        } else {
            Err(Error::not_found("Campaign", id))
        }
    }

    pub async fn runs(&self, id: &str, limit: i64) -> Result<Vec<CampaignRunDbModel>> {
        self.repo.get(id).await?;
        self.repo.list_runs(id, limit.clamp(1, 500)).await
    }

    /// Execute every campaign due at `now`. One campaign failing never stops
    /// the others.
    pub async fn run_due_at(&self, now: DateTime<Utc>) -> Result<CampaignCycleReport> {
        let now_ms = datetime_to_ms(now);
        let due = self.repo.due(now_ms, self.max_per_tick).await?;
        let mut report = CampaignCycleReport {
            due: due.len(),
            ..Default::default()
        };
        self.metrics.record_campaign_tick();

        for campaign in due {
            let Some(occurrence_ms) = campaign.next_run_at else {
                continue;
            };
            let lease_until = datetime_to_ms(now + self.lease);
            if !self
                .repo
                .try_claim(&campaign.id, occurrence_ms, now_ms, lease_until)
                .await?
            {
                report.contended += 1;
                debug!(campaign_id = %campaign.id, "Campaign lease held elsewhere");
                continue;
            }

            match self.execute(&campaign, now).await {
                Ok(()) => {
                    report.executed += 1;
                    self.metrics.record_campaign_run(true);
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.record_campaign_run(false);
                    error!(campaign_id = %campaign.id, error = %e, "Campaign execution failed");
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                executed = report.executed,
                failed = report.failed,
                "Campaign cycle finished"
            );
        }
        Ok(report)
    }

    /// Run one occurrence. Any error marks the run and the campaign failed.
    async fn execute(&self, campaign: &CampaignDbModel, now: DateTime<Utc>) -> Result<()> {
        let scheduled_ms = campaign.next_run_at.unwrap_or(campaign.scheduled_at);
        let mut run = CampaignRunDbModel::executing(&campaign.id, scheduled_ms, datetime_to_ms(now));

        let outcome = async {
            self.repo.create_run(&run).await?;
            self.fire(campaign, &mut run, ms_to_datetime(scheduled_ms), now).await
        }
        .await;

        if let Err(e) = &outcome {
            run.status = RunStatus::Failed.to_string();
            run.completed_at = Some(now_ms());
            run.error_message = Some(e.to_string());
            if let Err(finish_err) = self.repo.finish_run(&run).await {
                warn!(campaign_id = %campaign.id, error = %finish_err, "Failed to record failed run");
            }
            if let Err(status_err) = self
                .repo
                .set_status(&campaign.id, CampaignStatus::Failed, None, datetime_to_ms(now))
                .await
            {
                warn!(campaign_id = %campaign.id, error = %status_err, "Failed to mark campaign failed");
            }
        }
        outcome
    }

    async fn fire(
        &self,
        campaign: &CampaignDbModel,
        run: &mut CampaignRunDbModel,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let request = CreateNotificationRequest {
            categories: campaign.categories()?,
            title: campaign.title.clone(),
            message: campaign.message.clone(),
            target: campaign.target()?,
            channels: campaign.channels()?,
            sent_by: campaign.created_by.clone(),
            related_event_id: None,
        };
        let result = self
            .notifications
            .create_notification_at(&campaign.organization_id, request, now)
            .await?;

        run.status = RunStatus::Completed.to_string();
        run.completed_at = Some(now_ms());
        run.notification_id = Some(result.notification.id.clone());
        run.recipient_count = result.recipient_count as i64;
        run.success_count = result.success_count as i64;
        run.failure_count = result.failure_count as i64;
        self.repo.finish_run(run).await?;

        let runs_completed = campaign.total_runs + 1;
        let next = next_run(campaign, scheduled, runs_completed, now)?;
        let status = if next.is_some() {
            CampaignStatus::Active
        } else {
            CampaignStatus::Completed
        };
        self.repo
            .advance(
                &campaign.id,
                datetime_to_ms(now),
                next.map(datetime_to_ms),
                status,
                datetime_to_ms(now),
            )
            .await?;

        info!(
            campaign_id = %campaign.id,
            run_id = %run.id,
            recipients = result.recipient_count,
            next_run_at = ?next,
            status = %status,
            "Campaign occurrence executed"
        );
        Ok(())
    }
}
