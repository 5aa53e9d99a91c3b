//! Notification, recipient and reminder-ledger repository.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::begin_immediate;
use crate::database::models::{
    NotificationDbModel, NotificationRecipientDbModel, UserNotificationRow,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::domain::{Category, Channel, DeliveryStatus, NotificationStatus};
use crate::{Error, Result};

/// Page size used when a listing does not ask for one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Filters for listing an organization's notifications.
#[derive(Debug, Clone)]
pub struct NotificationFilter {
    pub category: Option<Category>,
    pub status: Option<NotificationStatus>,
    /// Non-positive values fall back to [`DEFAULT_PAGE_SIZE`].
    pub limit: i64,
    pub offset: i64,
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self {
            category: None,
            status: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl NotificationFilter {
    fn page(&self) -> (i64, i64) {
        let limit = if self.limit > 0 { self.limit } else { DEFAULT_PAGE_SIZE };
        (limit, self.offset.max(0))
    }
}

/// One delivery outcome to merge into a recipient row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub user_id: String,
    pub channel: Channel,
    pub status: DeliveryStatus,
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert the notification and its recipient rows atomically.
    async fn create_with_recipients(
        &self,
        notification: &NotificationDbModel,
        recipients: &[NotificationRecipientDbModel],
    ) -> Result<()>;
    async fn get(&self, id: &str) -> Result<NotificationDbModel>;
    async fn list(
        &self,
        organization_id: &str,
        filter: &NotificationFilter,
    ) -> Result<Vec<NotificationDbModel>>;
    async fn set_status(&self, id: &str, status: NotificationStatus) -> Result<()>;
    /// Returns `false` when no notification with that id exists in the organization.
    async fn delete(&self, id: &str, organization_id: &str) -> Result<bool>;

    // Recipients
    async fn list_recipients(&self, notification_id: &str)
    -> Result<Vec<NotificationRecipientDbModel>>;
    async fn record_outcome(
        &self,
        notification_id: &str,
        user_id: &str,
        channel: Channel,
        status: DeliveryStatus,
    ) -> Result<()>;
    async fn record_outcomes(&self, notification_id: &str, outcomes: &[OutcomeRecord])
    -> Result<()>;

    // Inbox
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> Result<Vec<UserNotificationRow>>;
    async fn unread_count(&self, user_id: &str) -> Result<i64>;
    /// Returns `true` if the row changed, `false` if it was already read.
    async fn mark_read(&self, notification_id: &str, user_id: &str, now_ms: i64) -> Result<bool>;
    async fn mark_all_read(&self, user_id: &str, now_ms: i64) -> Result<u64>;

    // Reminder de-duplication
    /// Users among `user_ids` that already received a `category` notification
    /// about `event_id` created at or after `since_ms`.
    async fn recently_notified(
        &self,
        user_ids: &[String],
        event_id: &str,
        category: Category,
        since_ms: i64,
    ) -> Result<HashSet<String>>;
    /// Claim the (user, event, milestone) slot. `false` means it was already taken.
    async fn claim_reminder(
        &self,
        user_id: &str,
        event_id: &str,
        milestone: &str,
        now_ms: i64,
    ) -> Result<bool>;
    async fn attach_reminder_notification(
        &self,
        event_id: &str,
        milestone: &str,
        user_ids: &[String],
        notification_id: &str,
    ) -> Result<()>;
    async fn release_reminder_claims(
        &self,
        event_id: &str,
        milestone: &str,
        user_ids: &[String],
    ) -> Result<()>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const MERGE_OUTCOME_SQL: &str = r#"
    UPDATE notification_recipient
    SET delivery_status = json_set(COALESCE(NULLIF(delivery_status, ''), '{}'), '$.' || ?, ?)
    WHERE notification_id = ? AND user_id = ?
"#;

async fn insert_rows(
    conn: &mut sqlx::SqliteConnection,
    notification: &NotificationDbModel,
    recipients: &[NotificationRecipientDbModel],
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notification (
            id, organization_id, categories, title, message, target_kind, target_ids,
            channels, sent_by, status, related_event_id, created_at, sent_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&notification.id)
    .bind(&notification.organization_id)
    .bind(&notification.categories)
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(&notification.target_kind)
    .bind(&notification.target_ids)
    .bind(&notification.channels)
    .bind(&notification.sent_by)
    .bind(&notification.status)
    .bind(&notification.related_event_id)
    .bind(notification.created_at)
    .bind(notification.sent_at)
    .execute(&mut *conn)
    .await?;

    // SQLite caps bound parameters per statement; 7 columns * 100 rows stays well under it.
    for chunk in recipients.chunks(100) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO notification_recipient (id, notification_id, user_id, is_read, read_at, delivery_status, created_at) ",
        );
        builder.push_values(chunk, |mut row, recipient| {
            row.push_bind(&recipient.id)
                .push_bind(&recipient.notification_id)
                .push_bind(&recipient.user_id)
                .push_bind(recipient.is_read)
                .push_bind(recipient.read_at)
                .push_bind(&recipient.delivery_status)
                .push_bind(recipient.created_at);
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok(())
}

async fn merge_outcomes(
    conn: &mut sqlx::SqliteConnection,
    notification_id: &str,
    outcomes: &[OutcomeRecord],
) -> Result<()> {
    for outcome in outcomes {
        sqlx::query(MERGE_OUTCOME_SQL)
            .bind(outcome.channel.to_string())
            .bind(outcome.status.to_string())
            .bind(notification_id)
            .bind(&outcome.user_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub(crate) fn push_in_list<'a>(builder: &mut QueryBuilder<'a, Sqlite>, values: &'a [String]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create_with_recipients(
        &self,
        notification: &NotificationDbModel,
        recipients: &[NotificationRecipientDbModel],
    ) -> Result<()> {
        retry_on_sqlite_busy("create_notification", || async {
            let mut tx = begin_immediate(&self.pool).await?;
            let outcome = insert_rows(&mut tx, notification, recipients).await;
            tx.finish(outcome).await
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<NotificationDbModel> {
        sqlx::query_as::<_, NotificationDbModel>("SELECT * FROM notification WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id))
    }

    async fn list(
        &self,
        organization_id: &str,
        filter: &NotificationFilter,
    ) -> Result<Vec<NotificationDbModel>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM notification WHERE organization_id = ");
        builder.push_bind(organization_id);
        if let Some(category) = filter.category {
            builder
                .push(" AND EXISTS (SELECT 1 FROM json_each(notification.categories) WHERE value = ")
                .push_bind(category.to_string())
                .push(")");
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.to_string());
        }
        let (limit, offset) = filter.page();
        builder
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder
            .build_query_as::<NotificationDbModel>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn set_status(&self, id: &str, status: NotificationStatus) -> Result<()> {
        retry_on_sqlite_busy("set_notification_status", || async {
            sqlx::query("UPDATE notification SET status = ? WHERE id = ?")
                .bind(status.to_string())
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str, organization_id: &str) -> Result<bool> {
        let result = retry_on_sqlite_busy("delete_notification", || async {
            Ok(
                sqlx::query("DELETE FROM notification WHERE id = ? AND organization_id = ?")
                    .bind(id)
                    .bind(organization_id)
                    .execute(&self.pool)
                    .await?,
            )
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_recipients(
        &self,
        notification_id: &str,
    ) -> Result<Vec<NotificationRecipientDbModel>> {
        let rows = sqlx::query_as::<_, NotificationRecipientDbModel>(
            "SELECT * FROM notification_recipient WHERE notification_id = ? ORDER BY user_id",
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn record_outcome(
        &self,
        notification_id: &str,
        user_id: &str,
        channel: Channel,
        status: DeliveryStatus,
    ) -> Result<()> {
        retry_on_sqlite_busy("record_outcome", || async {
            sqlx::query(MERGE_OUTCOME_SQL)
                .bind(channel.to_string())
                .bind(status.to_string())
                .bind(notification_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn record_outcomes(
        &self,
        notification_id: &str,
        outcomes: &[OutcomeRecord],
    ) -> Result<()> {
        if outcomes.is_empty() {
            return Ok(());
        }
        retry_on_sqlite_busy("record_outcomes", || async {
            let mut tx = begin_immediate(&self.pool).await?;
            let outcome = merge_outcomes(&mut tx, notification_id, outcomes).await;
            tx.finish(outcome).await
        })
        .await
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> Result<Vec<UserNotificationRow>> {
        let sql = format!(
            r#"
            SELECT n.*, r.is_read, r.read_at, r.delivery_status AS delivery_status, r.created_at AS received_at
            FROM notification_recipient r
            JOIN notification n ON n.id = r.notification_id
            WHERE r.user_id = ? {}
            ORDER BY r.created_at DESC, n.id
            LIMIT ? OFFSET ?
            "#,
            if unread_only { "AND r.is_read = 0" } else { "" }
        );
        let rows = sqlx::query_as::<_, UserNotificationRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn unread_count(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notification_recipient WHERE user_id = ? AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_read(&self, notification_id: &str, user_id: &str, now_ms: i64) -> Result<bool> {
        let result = retry_on_sqlite_busy("mark_read", || async {
            Ok(sqlx::query(
                r#"
                UPDATE notification_recipient SET is_read = 1, read_at = ?
                WHERE notification_id = ? AND user_id = ? AND is_read = 0
                "#,
            )
            .bind(now_ms)
            .bind(notification_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?)
        })
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM notification_recipient WHERE notification_id = ? AND user_id = ?",
        )
        .bind(notification_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match exists {
            Some(_) => Ok(false),
            None => Err(Error::not_found(
                "NotificationRecipient",
                format!("{notification_id}/{user_id}"),
            )),
        }
    }

    async fn mark_all_read(&self, user_id: &str, now_ms: i64) -> Result<u64> {
        let result = retry_on_sqlite_busy("mark_all_read", || async {
            Ok(sqlx::query(
                "UPDATE notification_recipient SET is_read = 1, read_at = ? WHERE user_id = ? AND is_read = 0",
            )
            .bind(now_ms)
            .bind(user_id)
            .execute(&self.pool)
            .await?)
        })
        .await?;
        Ok(result.rows_affected())
    }

    async fn recently_notified(
        &self,
        user_ids: &[String],
        event_id: &str,
        category: Category,
        since_ms: i64,
    ) -> Result<HashSet<String>> {
        if user_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT DISTINCT r.user_id
            FROM notification_recipient r
            JOIN notification n ON n.id = r.notification_id
            WHERE n.related_event_id = "#,
        );
        builder
            .push_bind(event_id)
            .push(" AND n.created_at >= ")
            .push_bind(since_ms)
            .push(" AND EXISTS (SELECT 1 FROM json_each(n.categories) WHERE value = ")
            .push_bind(category.to_string())
            .push(") AND r.user_id IN ");
        push_in_list(&mut builder, user_ids);

        let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn claim_reminder(
        &self,
        user_id: &str,
        event_id: &str,
        milestone: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let result = retry_on_sqlite_busy("claim_reminder", || async {
            Ok(sqlx::query(
                r#"
                INSERT OR IGNORE INTO reminder_ledger (user_id, event_id, milestone, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(event_id)
            .bind(milestone)
            .bind(now_ms)
            .execute(&self.pool)
            .await?)
        })
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn attach_reminder_notification(
        &self,
        event_id: &str,
        milestone: &str,
        user_ids: &[String],
        notification_id: &str,
    ) -> Result<()> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE reminder_ledger SET notification_id = ");
        builder
            .push_bind(notification_id)
            .push(" WHERE event_id = ")
            .push_bind(event_id)
            .push(" AND milestone = ")
            .push_bind(milestone)
            .push(" AND user_id IN ");
        push_in_list(&mut builder, user_ids);
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn release_reminder_claims(
        &self,
        event_id: &str,
        milestone: &str,
        user_ids: &[String],
    ) -> Result<()> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM reminder_ledger WHERE event_id = ");
        builder
            .push_bind(event_id)
            .push(" AND milestone = ")
            .push_bind(milestone)
            .push(" AND notification_id IS NULL AND user_id IN ");
        push_in_list(&mut builder, user_ids);
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
