//! Push subscription repository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::notification::push_in_list;
use crate::database::begin_immediate;
use crate::database::models::PushSubscriptionDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::domain::DeactivationReason;
use crate::{Error, Result};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert or refresh the row keyed by `(user_id, endpoint_key)`.
    ///
    /// With `supersede_other_ios`, the user's other active iOS rows are
    /// deactivated in the same transaction.
    async fn upsert(
        &self,
        subscription: &PushSubscriptionDbModel,
        supersede_other_ios: bool,
    ) -> Result<PushSubscriptionDbModel>;
    async fn get(&self, id: &str) -> Result<PushSubscriptionDbModel>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>>;
    async fn active_for_user(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>>;
    async fn active_for_users(&self, user_ids: &[String]) -> Result<Vec<PushSubscriptionDbModel>>;
    /// Returns `false` when there was no active row for the key.
    async fn deactivate(
        &self,
        user_id: &str,
        endpoint_key: &str,
        reason: DeactivationReason,
        now_ms: i64,
    ) -> Result<bool>;
    async fn deactivate_by_id(&self, id: &str, reason: DeactivationReason, now_ms: i64)
    -> Result<bool>;
    async fn touch(&self, ids: &[String], now_ms: i64) -> Result<()>;
}

/// SQLx implementation of SubscriptionRepository.
pub struct SqlxSubscriptionRepository {
    pool: SqlitePool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn upsert_rows(
    conn: &mut sqlx::SqliteConnection,
    sub: &PushSubscriptionDbModel,
    supersede_other_ios: bool,
) -> Result<PushSubscriptionDbModel> {
    if supersede_other_ios {
        let superseded = sqlx::query(
            r#"
            UPDATE push_subscription
            SET is_active = 0, deactivated_at = ?, deactivation_reason = ?, updated_at = ?
            WHERE user_id = ? AND kind = 'native' AND platform = 'ios'
              AND endpoint_key != ? AND is_active = 1
            "#,
        )
        .bind(sub.updated_at)
        .bind(DeactivationReason::Superseded.to_string())
        .bind(sub.updated_at)
        .bind(&sub.user_id)
        .bind(&sub.endpoint_key)
        .execute(&mut *conn)
        .await?;

        if superseded.rows_affected() > 0 {
            tracing::debug!(
                user_id = %sub.user_id,
                count = superseded.rows_affected(),
                "Superseded older iOS subscriptions"
            );
        }
    }

    let row = sqlx::query_as::<_, PushSubscriptionDbModel>(
        r#"
        INSERT INTO push_subscription (
            id, user_id, kind, endpoint_key, endpoint, p256dh, auth, fcm_token, platform,
            apns_environment, device_name, user_agent, is_active, created_at, updated_at,
            last_used, deactivated_at, deactivation_reason
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, NULL, NULL)
        ON CONFLICT(user_id, endpoint_key) DO UPDATE SET
            kind = excluded.kind,
            endpoint = excluded.endpoint,
            p256dh = excluded.p256dh,
            auth = excluded.auth,
            fcm_token = excluded.fcm_token,
            platform = excluded.platform,
            apns_environment = excluded.apns_environment,
            device_name = COALESCE(excluded.device_name, push_subscription.device_name),
            user_agent = COALESCE(excluded.user_agent, push_subscription.user_agent),
            is_active = 1,
            updated_at = excluded.updated_at,
            last_used = excluded.last_used,
            deactivated_at = NULL,
            deactivation_reason = NULL
        RETURNING *
        "#,
    )
    .bind(&sub.id)
    .bind(&sub.user_id)
    .bind(&sub.kind)
    .bind(&sub.endpoint_key)
    .bind(&sub.endpoint)
    .bind(&sub.p256dh)
    .bind(&sub.auth)
    .bind(&sub.fcm_token)
    .bind(&sub.platform)
    .bind(&sub.apns_environment)
    .bind(&sub.device_name)
    .bind(&sub.user_agent)
    .bind(sub.created_at)
    .bind(sub.updated_at)
    .bind(sub.last_used)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row)
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn upsert(
        &self,
        subscription: &PushSubscriptionDbModel,
        supersede_other_ios: bool,
    ) -> Result<PushSubscriptionDbModel> {
        retry_on_sqlite_busy("upsert_subscription", || async {
            let mut tx = begin_immediate(&self.pool).await?;
            let outcome = upsert_rows(&mut tx, subscription, supersede_other_ios).await;
            tx.finish(outcome).await
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<PushSubscriptionDbModel> {
        sqlx::query_as::<_, PushSubscriptionDbModel>("SELECT * FROM push_subscription WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("PushSubscription", id))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>> {
        let rows = sqlx::query_as::<_, PushSubscriptionDbModel>(
            "SELECT * FROM push_subscription WHERE user_id = ? ORDER BY is_active DESC, updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn active_for_user(&self, user_id: &str) -> Result<Vec<PushSubscriptionDbModel>> {
        let rows = sqlx::query_as::<_, PushSubscriptionDbModel>(
            "SELECT * FROM push_subscription WHERE user_id = ? AND is_active = 1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn active_for_users(&self, user_ids: &[String]) -> Result<Vec<PushSubscriptionDbModel>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM push_subscription WHERE is_active = 1 AND user_id IN ");
        push_in_list(&mut builder, user_ids);
        builder.push(" ORDER BY user_id, created_at");
        let rows = builder
            .build_query_as::<PushSubscriptionDbModel>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn deactivate(
        &self,
        user_id: &str,
        endpoint_key: &str,
        reason: DeactivationReason,
        now_ms: i64,
    ) -> Result<bool> {
        let result = retry_on_sqlite_busy("deactivate_subscription", || async {
            Ok(sqlx::query(
                r#"
                UPDATE push_subscription
                SET is_active = 0, deactivated_at = ?, deactivation_reason = ?, updated_at = ?
                WHERE user_id = ? AND endpoint_key = ? AND is_active = 1
                "#,
            )
            .bind(now_ms)
            .bind(reason.to_string())
            .bind(now_ms)
            .bind(user_id)
            .bind(endpoint_key)
            .execute(&self.pool)
            .await?)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_by_id(
        &self,
        id: &str,
        reason: DeactivationReason,
        now_ms: i64,
    ) -> Result<bool> {
        let result = retry_on_sqlite_busy("deactivate_subscription_by_id", || async {
            Ok(sqlx::query(
                r#"
                UPDATE push_subscription
                SET is_active = 0, deactivated_at = ?, deactivation_reason = ?, updated_at = ?
                WHERE id = ? AND is_active = 1
                "#,
            )
            .bind(now_ms)
            .bind(reason.to_string())
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, ids: &[String], now_ms: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE push_subscription SET last_used = ");
        builder.push_bind(now_ms).push(" WHERE id IN ");
        push_in_list(&mut builder, ids);
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
