//! Campaign and campaign run models.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::database::time::{ms_to_datetime, opt_ms_to_datetime};
use crate::domain::{
    CampaignStatus, Category, Channel, RecipientTarget, RecurrenceFrequency, RunStatus,
    ScheduleType,
};
use crate::{Error, Result};

/// Row of the `notification_campaign` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignDbModel {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub title: String,
    pub message: String,
    pub categories: String,
    pub target_kind: String,
    pub target_ids: String,
    pub channels: String,
    pub created_by: String,
    pub schedule_type: String,
    pub scheduled_at: i64,
    pub recurrence_frequency: Option<String>,
    pub recurrence_interval: i64,
    pub cron_expression: Option<String>,
    pub time_of_day: Option<String>,
    pub timezone: String,
    pub recurrence_end_date: Option<i64>,
    pub recurrence_end_after_occurrences: Option<i64>,
    pub status: String,
    pub last_run_at: Option<i64>,
    pub next_run_at: Option<i64>,
    pub total_runs: i64,
    pub locked_until: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CampaignDbModel {
    pub fn categories(&self) -> Result<Vec<Category>> {
        Ok(serde_json::from_str(&self.categories)?)
    }

    pub fn channels(&self) -> Result<Vec<Channel>> {
        Ok(serde_json::from_str(&self.channels)?)
    }

    pub fn target(&self) -> Result<RecipientTarget> {
        RecipientTarget::from_columns(&self.target_kind, &self.target_ids)
    }

    pub fn schedule_type(&self) -> Result<ScheduleType> {
        ScheduleType::from_str(&self.schedule_type).map_err(|_| {
            Error::Database(format!(
                "campaign {} has schedule type '{}'",
                self.id, self.schedule_type
            ))
        })
    }

    pub fn frequency(&self) -> Result<Option<RecurrenceFrequency>> {
        self.recurrence_frequency
            .as_deref()
            .map(|raw| {
                RecurrenceFrequency::from_str(raw).map_err(|_| {
                    Error::Database(format!("campaign {} has frequency '{raw}'", self.id))
                })
            })
            .transpose()
    }

    pub fn status(&self) -> Result<CampaignStatus> {
        CampaignStatus::from_str(&self.status).map_err(|_| {
            Error::Database(format!("campaign {} has status '{}'", self.id, self.status))
        })
    }
}

/// Typed view of a campaign, as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Campaign {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub title: String,
    pub message: String,
    pub categories: Vec<Category>,
    pub target: RecipientTarget,
    pub channels: Vec<Channel>,
    pub created_by: String,
    pub schedule_type: ScheduleType,
    pub scheduled_at: DateTime<Utc>,
    pub recurrence_frequency: Option<RecurrenceFrequency>,
    pub recurrence_interval: i64,
    pub cron_expression: Option<String>,
    pub time_of_day: Option<String>,
    pub timezone: String,
    pub recurrence_end_date: Option<DateTime<Utc>>,
    pub recurrence_end_after_occurrences: Option<i64>,
    pub status: CampaignStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub total_runs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignDbModel> for Campaign {
    type Error = Error;

    fn try_from(model: CampaignDbModel) -> Result<Self> {
        Ok(Self {
            categories: model.categories()?,
            target: model.target()?,
            channels: model.channels()?,
            schedule_type: model.schedule_type()?,
            recurrence_frequency: model.frequency()?,
            status: model.status()?,
            id: model.id,
            organization_id: model.organization_id,
            name: model.name,
            title: model.title,
            message: model.message,
            created_by: model.created_by,
            scheduled_at: ms_to_datetime(model.scheduled_at),
            recurrence_interval: model.recurrence_interval,
            cron_expression: model.cron_expression,
            time_of_day: model.time_of_day,
            timezone: model.timezone,
            recurrence_end_date: opt_ms_to_datetime(model.recurrence_end_date),
            recurrence_end_after_occurrences: model.recurrence_end_after_occurrences,
            last_run_at: opt_ms_to_datetime(model.last_run_at),
            next_run_at: opt_ms_to_datetime(model.next_run_at),
            total_runs: model.total_runs,
            created_at: ms_to_datetime(model.created_at),
            updated_at: ms_to_datetime(model.updated_at),
        })
    }
}

/// Row of the `campaign_run` table. Immutable once completed or failed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct CampaignRunDbModel {
    pub id: String,
    pub campaign_id: String,
    pub scheduled_at: i64,
    pub executed_at: i64,
    pub completed_at: Option<i64>,
    pub status: String,
    pub notification_id: Option<String>,
    pub recipient_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub error_message: Option<String>,
}

impl CampaignRunDbModel {
    pub fn executing(campaign_id: impl Into<String>, scheduled_at: i64, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: campaign_id.into(),
            scheduled_at,
            executed_at: now_ms,
            completed_at: None,
            status: RunStatus::Executing.to_string(),
            notification_id: None,
            recipient_count: 0,
            success_count: 0,
            failure_count: 0,
            error_message: None,
        }
    }
}
