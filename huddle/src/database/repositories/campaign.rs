//! Campaign and campaign-run repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{CampaignDbModel, CampaignRunDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::domain::{CampaignStatus, RunStatus};
use crate::{Error, Result};

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, campaign: &CampaignDbModel) -> Result<()>;
    async fn get(&self, id: &str) -> Result<CampaignDbModel>;
    async fn list_for_org(&self, organization_id: &str) -> Result<Vec<CampaignDbModel>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn set_status(
        &self,
        id: &str,
        status: CampaignStatus,
        next_run_at: Option<i64>,
        now_ms: i64,
    ) -> Result<()>;

    /// Active campaigns with `next_run_at <= now_ms` and no live lease.
    async fn due(&self, now_ms: i64, limit: i64) -> Result<Vec<CampaignDbModel>>;
    /// Take the execution lease for the occurrence at `next_run_at`.
    ///
    /// `false` when another tick holds the lease, or the campaign has already
    /// moved past that occurrence.
    async fn try_claim(
        &self,
        id: &str,
        next_run_at: i64,
        now_ms: i64,
        lease_until_ms: i64,
    ) -> Result<bool>;
    /// Record a finished occurrence and release the lease.
    ///
    /// `status` only replaces `active`; a campaign paused while its run was in
    /// flight stays paused unless the run was its last.
    async fn advance(
        &self,
        id: &str,
        last_run_at: i64,
        next_run_at: Option<i64>,
        status: CampaignStatus,
        now_ms: i64,
    ) -> Result<()>;

    // Runs
    async fn create_run(&self, run: &CampaignRunDbModel) -> Result<()>;
    /// Finalize an executing run. Runs that already left `executing` are not touched.
    async fn finish_run(&self, run: &CampaignRunDbModel) -> Result<()>;
    async fn list_runs(&self, campaign_id: &str, limit: i64) -> Result<Vec<CampaignRunDbModel>>;
}

/// SQLx implementation of CampaignRepository.
pub struct SqlxCampaignRepository {
    pool: SqlitePool,
}

impl SqlxCampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for SqlxCampaignRepository {
    async fn create(&self, c: &CampaignDbModel) -> Result<()> {
        retry_on_sqlite_busy("create_campaign", || async {
            sqlx::query(
                r#"
                INSERT INTO notification_campaign (
                    id, organization_id, name, title, message, categories, target_kind,
                    target_ids, channels, created_by, schedule_type, scheduled_at,
                    recurrence_frequency, recurrence_interval, cron_expression, time_of_day,
                    timezone, recurrence_end_date, recurrence_end_after_occurrences, status,
                    last_run_at, next_run_at, total_runs, locked_until, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&c.id)
            .bind(&c.organization_id)
            .bind(&c.name)
            .bind(&c.title)
            .bind(&c.message)
            .bind(&c.categories)
            .bind(&c.target_kind)
            .bind(&c.target_ids)
            .bind(&c.channels)
            .bind(&c.created_by)
            .bind(&c.schedule_type)
            .bind(c.scheduled_at)
            .bind(&c.recurrence_frequency)
            .bind(c.recurrence_interval)
            .bind(&c.cron_expression)
            .bind(&c.time_of_day)
            .bind(&c.timezone)
            .bind(c.recurrence_end_date)
            .bind(c.recurrence_end_after_occurrences)
            .bind(&c.status)
            .bind(c.last_run_at)
            .bind(c.next_run_at)
            .bind(c.total_runs)
            .bind(c.locked_until)
            .bind(c.created_at)
            .bind(c.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<CampaignDbModel> {
        sqlx::query_as::<_, CampaignDbModel>("SELECT * FROM notification_campaign WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Campaign", id))
    }

    async fn list_for_org(&self, organization_id: &str) -> Result<Vec<CampaignDbModel>> {
        let rows = sqlx::query_as::<_, CampaignDbModel>(
            "SELECT * FROM notification_campaign WHERE organization_id = ? ORDER BY created_at DESC, id",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = retry_on_sqlite_busy("delete_campaign", || async {
            Ok(sqlx::query("DELETE FROM notification_campaign WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_status(
        &self,
        id: &str,
        status: CampaignStatus,
        next_run_at: Option<i64>,
        now_ms: i64,
    ) -> Result<()> {
        retry_on_sqlite_busy("set_campaign_status", || async {
            sqlx::query(
                r#"
                UPDATE notification_campaign
                SET status = ?, next_run_at = ?, locked_until = NULL, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(status.to_string())
            .bind(next_run_at)
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn due(&self, now_ms: i64, limit: i64) -> Result<Vec<CampaignDbModel>> {
        let rows = sqlx::query_as::<_, CampaignDbModel>(
            r#"
            SELECT * FROM notification_campaign
            WHERE status = 'active'
              AND next_run_at IS NOT NULL AND next_run_at <= ?
              AND (locked_until IS NULL OR locked_until < ?)
            ORDER BY next_run_at
            LIMIT ?
            "#,
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn try_claim(
        &self,
        id: &str,
        next_run_at: i64,
        now_ms: i64,
        lease_until_ms: i64,
    ) -> Result<bool> {
        let result = retry_on_sqlite_busy("claim_campaign", || async {
            Ok(sqlx::query(
                r#"
                UPDATE notification_campaign SET locked_until = ?
                WHERE id = ? AND status = 'active'
                  AND next_run_at = ? AND next_run_at <= ?
                  AND (locked_until IS NULL OR locked_until < ?)
                "#,
            )
            .bind(lease_until_ms)
            .bind(id)
            .bind(next_run_at)
            .bind(now_ms)
            .bind(now_ms)
            .execute(&self.pool)
            .await?)
        })
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn advance(
        &self,
        id: &str,
        last_run_at: i64,
        next_run_at: Option<i64>,
        status: CampaignStatus,
        now_ms: i64,
    ) -> Result<()> {
        retry_on_sqlite_busy("advance_campaign", || async {
            sqlx::query(
                r#"
                UPDATE notification_campaign
                SET last_run_at = ?, next_run_at = ?,
                    status = CASE WHEN status = 'active' OR ? = 'completed' THEN ? ELSE status END,
                    total_runs = total_runs + 1, locked_until = NULL, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(last_run_at)
            .bind(next_run_at)
            .bind(status.to_string())
            .bind(status.to_string())
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn create_run(&self, run: &CampaignRunDbModel) -> Result<()> {
        retry_on_sqlite_busy("create_campaign_run", || async {
            sqlx::query(
                r#"
                INSERT INTO campaign_run (
                    id, campaign_id, scheduled_at, executed_at, completed_at, status,
                    notification_id, recipient_count, success_count, failure_count, error_message
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&run.id)
            .bind(&run.campaign_id)
            .bind(run.scheduled_at)
            .bind(run.executed_at)
            .bind(run.completed_at)
            .bind(&run.status)
            .bind(&run.notification_id)
            .bind(run.recipient_count)
            .bind(run.success_count)
            .bind(run.failure_count)
            .bind(&run.error_message)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn finish_run(&self, run: &CampaignRunDbModel) -> Result<()> {
        retry_on_sqlite_busy("finish_campaign_run", || async {
            sqlx::query(
                r#"
                UPDATE campaign_run
                SET completed_at = ?, status = ?, notification_id = ?, recipient_count = ?,
                    success_count = ?, failure_count = ?, error_message = ?
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(run.completed_at)
            .bind(&run.status)
            .bind(&run.notification_id)
            .bind(run.recipient_count)
            .bind(run.success_count)
            .bind(run.failure_count)
            .bind(&run.error_message)
            .bind(&run.id)
            .bind(RunStatus::Executing.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn list_runs(&self, campaign_id: &str, limit: i64) -> Result<Vec<CampaignRunDbModel>> {
        let rows = sqlx::query_as::<_, CampaignRunDbModel>(
            "SELECT * FROM campaign_run WHERE campaign_id = ? ORDER BY executed_at DESC, id LIMIT ?",
        )
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
