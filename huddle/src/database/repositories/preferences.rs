//! Notification preferences repository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use super::notification::push_in_list;
use crate::Result;
use crate::database::begin_immediate;
use crate::database::models::NotificationPreferencesDbModel;
use crate::database::retry::retry_on_sqlite_busy;

/// In-place edit of one user's preferences.
pub type PreferencesEdit<'a> =
    &'a (dyn Fn(&mut NotificationPreferencesDbModel) -> Result<()> + Send + Sync);

#[async_trait]
pub trait PreferencesRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<NotificationPreferencesDbModel>>;
    /// Stored rows for the given users; users without a row are absent.
    async fn get_many(&self, user_ids: &[String]) -> Result<Vec<NotificationPreferencesDbModel>>;
    /// Read, edit and write back under one write lock so concurrent partial
    /// edits of different fields both survive. Users without a row start from
    /// the defaults.
    async fn modify(
        &self,
        user_id: &str,
        edit: PreferencesEdit<'_>,
    ) -> Result<NotificationPreferencesDbModel>;
}

/// SQLx implementation of PreferencesRepository.
pub struct SqlxPreferencesRepository {
    pool: SqlitePool,
}

impl SqlxPreferencesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferencesRepository for SqlxPreferencesRepository {
    async fn get(&self, user_id: &str) -> Result<Option<NotificationPreferencesDbModel>> {
        let row = sqlx::query_as::<_, NotificationPreferencesDbModel>(
            "SELECT * FROM notification_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_many(&self, user_ids: &[String]) -> Result<Vec<NotificationPreferencesDbModel>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM notification_preferences WHERE user_id IN ");
        push_in_list(&mut builder, user_ids);
        let rows = builder
            .build_query_as::<NotificationPreferencesDbModel>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn modify(
        &self,
        user_id: &str,
        edit: PreferencesEdit<'_>,
    ) -> Result<NotificationPreferencesDbModel> {
        retry_on_sqlite_busy("modify_preferences", || async {
            let mut tx = begin_immediate(&self.pool).await?;
            let outcome: Result<NotificationPreferencesDbModel> = async {
                let mut prefs = sqlx::query_as::<_, NotificationPreferencesDbModel>(
                    "SELECT * FROM notification_preferences WHERE user_id = ?",
                )
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .unwrap_or_else(|| NotificationPreferencesDbModel::defaults(user_id));
                edit(&mut prefs)?;
                write_row(&mut tx, &prefs).await?;
                Ok(prefs)
            }
            .await;
            tx.finish(outcome).await
        })
        .await
    }
}

async fn write_row(conn: &mut SqliteConnection, p: &NotificationPreferencesDbModel) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notification_preferences (
            user_id, announcement, event_reminder, check_in, rsvp_closing,
            schedule_change, campaign, payment, push_notifications,
            email_notifications, sms_notifications, quiet_hours_start,
            quiet_hours_end, timezone, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            announcement = excluded.announcement,
            event_reminder = excluded.event_reminder,
            check_in = excluded.check_in,
            rsvp_closing = excluded.rsvp_closing,
            schedule_change = excluded.schedule_change,
            campaign = excluded.campaign,
            payment = excluded.payment,
            push_notifications = excluded.push_notifications,
            email_notifications = excluded.email_notifications,
            sms_notifications = excluded.sms_notifications,
            quiet_hours_start = excluded.quiet_hours_start,
            quiet_hours_end = excluded.quiet_hours_end,
            timezone = excluded.timezone,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&p.user_id)
    .bind(p.announcement)
    .bind(p.event_reminder)
    .bind(p.check_in)
    .bind(p.rsvp_closing)
    .bind(p.schedule_change)
    .bind(p.campaign)
    .bind(p.payment)
    .bind(p.push_notifications)
    .bind(p.email_notifications)
    .bind(p.sms_notifications)
    .bind(&p.quiet_hours_start)
    .bind(&p.quiet_hours_end)
    .bind(&p.timezone)
    .bind(p.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
