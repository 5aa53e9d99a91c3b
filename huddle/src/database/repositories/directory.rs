//! Read access to the organization directory (users, teams, programs, events).

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::notification::push_in_list;
use crate::Result;
use crate::database::models::{EventDbModel, UserDbModel};

#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn org_users(&self, organization_id: &str) -> Result<Vec<UserDbModel>>;
    /// Users among `ids` that belong to the organization.
    async fn users_by_ids(&self, organization_id: &str, ids: &[String]) -> Result<Vec<UserDbModel>>;
    async fn users_by_roles(&self, organization_id: &str, roles: &[String])
    -> Result<Vec<UserDbModel>>;
    async fn users_by_teams(&self, organization_id: &str, team_ids: &[String])
    -> Result<Vec<UserDbModel>>;
    /// Members of any team in the listed divisions.
    async fn users_by_divisions(
        &self,
        organization_id: &str,
        division_ids: &[String],
    ) -> Result<Vec<UserDbModel>>;
    /// Enrolled users plus members of teams attached to the listed programs.
    async fn users_by_programs(
        &self,
        organization_id: &str,
        program_ids: &[String],
    ) -> Result<Vec<UserDbModel>>;
    /// Non-cancelled events with `from_ms <= start_time <= to_ms`.
    async fn events_starting_between(&self, from_ms: i64, to_ms: i64) -> Result<Vec<EventDbModel>>;
}

/// SQLx implementation of DirectoryRepository.
pub struct SqlxDirectoryRepository {
    pool: SqlitePool,
}

impl SqlxDirectoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_users(&self, mut builder: QueryBuilder<'_, Sqlite>) -> Result<Vec<UserDbModel>> {
        let rows = builder
            .build_query_as::<UserDbModel>()
            .fetch_all(&self.pool)
            .await?;
        // Joins can yield a user more than once.
        let unique: BTreeMap<String, UserDbModel> =
            rows.into_iter().map(|u| (u.id.clone(), u)).collect();
        Ok(unique.into_values().collect())
    }
}

#[async_trait]
impl DirectoryRepository for SqlxDirectoryRepository {
    async fn org_users(&self, organization_id: &str) -> Result<Vec<UserDbModel>> {
        let users = sqlx::query_as::<_, UserDbModel>(
            "SELECT * FROM users WHERE organization_id = ? ORDER BY id",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn users_by_ids(&self, organization_id: &str, ids: &[String]) -> Result<Vec<UserDbModel>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM users WHERE organization_id = ");
        builder.push_bind(organization_id).push(" AND id IN ");
        push_in_list(&mut builder, ids);
        self.fetch_users(builder).await
    }

    async fn users_by_roles(
        &self,
        organization_id: &str,
        roles: &[String],
    ) -> Result<Vec<UserDbModel>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM users WHERE organization_id = ");
        builder.push_bind(organization_id).push(" AND role IN ");
        push_in_list(&mut builder, roles);
        self.fetch_users(builder).await
    }

    async fn users_by_teams(
        &self,
        organization_id: &str,
        team_ids: &[String],
    ) -> Result<Vec<UserDbModel>> {
        if team_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT u.* FROM users u
            JOIN team_members tm ON tm.user_id = u.id
            WHERE u.organization_id = "#,
        );
        builder.push_bind(organization_id).push(" AND tm.team_id IN ");
        push_in_list(&mut builder, team_ids);
        self.fetch_users(builder).await
    }

    async fn users_by_divisions(
        &self,
        organization_id: &str,
        division_ids: &[String],
    ) -> Result<Vec<UserDbModel>> {
        if division_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT u.* FROM users u
            JOIN team_members tm ON tm.user_id = u.id
            JOIN teams t ON t.id = tm.team_id
            WHERE u.organization_id = "#,
        );
        builder.push_bind(organization_id).push(" AND t.division_id IN ");
        push_in_list(&mut builder, division_ids);
        self.fetch_users(builder).await
    }

    async fn users_by_programs(
        &self,
        organization_id: &str,
        program_ids: &[String],
    ) -> Result<Vec<UserDbModel>> {
        if program_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM users WHERE organization_id = ");
        builder.push_bind(organization_id).push(
            " AND id IN (SELECT user_id FROM program_enrollments WHERE program_id IN ",
        );
        push_in_list(&mut builder, program_ids);
        builder.push(
            " UNION SELECT tm.user_id FROM team_members tm JOIN teams t ON t.id = tm.team_id WHERE t.program_id IN ",
        );
        push_in_list(&mut builder, program_ids);
        builder.push(")");
        self.fetch_users(builder).await
    }

    async fn events_starting_between(&self, from_ms: i64, to_ms: i64) -> Result<Vec<EventDbModel>> {
        let events = sqlx::query_as::<_, EventDbModel>(
            r#"
            SELECT * FROM events
            WHERE start_time >= ? AND start_time <= ? AND lower(status) != 'cancelled'
            ORDER BY start_time
            "#,
        )
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}
