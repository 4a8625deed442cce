use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorPage, PageRequest, UserCursor},
    application::repos::{
        RepoError, UpsertUserParams, UserSearchFilter, UsersRepo, UsersWriteRepo,
    },
    domain::entities::{UserRecord, UserSummary},
};

use super::{PostgresRepositories, map_sqlx_error, util::contains_pattern};

const USER_COLUMNS: &str = "u.id, u.external_id, u.username, u.name, u.bio, u.image, \
     u.onboarded, u.created_at, u.updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    external_id: String,
    username: String,
    name: String,
    bio: String,
    image: Option<String>,
    onboarded: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            external_id: row.external_id,
            username: row.username,
            name: row.name,
            bio: row.bio,
            image: row.image,
            onboarded: row.onboarded,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct SummaryRow {
    pub(super) id: Uuid,
    pub(super) username: String,
    pub(super) name: String,
    pub(super) image: Option<String>,
}

impl From<SummaryRow> for UserSummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            name: row.name,
            image: row.image,
        }
    }
}

impl PostgresRepositories {
    async fn find_user_where(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<UserRecord>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.{column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;
        Ok(row.map(UserRecord::from))
    }
}

#[async_trait]
impl UsersRepo for PostgresRepositories {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;
        Ok(row.map(UserRecord::from))
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<UserRecord>, RepoError> {
        self.find_user_where("external_id", external_id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, RepoError> {
        self.find_user_where("username", username).await
    }

    async fn find_by_usernames(
        &self,
        usernames: &[String],
    ) -> Result<Vec<UserSummary>, RepoError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT id, username, name, image
            FROM users
            WHERE username = ANY($1)
            "#,
        )
        .bind(usernames)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(rows.into_iter().map(UserSummary::from).collect())
    }

    async fn find_summaries(&self, ids: &[Uuid]) -> Result<Vec<UserSummary>, RepoError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT id, username, name, image
            FROM users
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(rows.into_iter().map(UserSummary::from).collect())
    }

    async fn search_users(
        &self,
        filter: &UserSearchFilter,
        page: PageRequest<UserCursor>,
    ) -> Result<CursorPage<UserRecord>, RepoError> {
        let limit = page.bounded_limit() as usize;

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT ");
        qb.push(USER_COLUMNS);
        qb.push(" FROM users u WHERE u.onboarded");

        if let Some(exclude) = filter.exclude {
            qb.push(" AND u.id <> ");
            qb.push_bind(exclude);
        }
        if let Some(search) = filter.search.as_ref() {
            let pattern = contains_pattern(search);
            qb.push(" AND (u.username ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(r" ESCAPE '\' OR u.name ILIKE ");
            qb.push_bind(pattern);
            qb.push(r" ESCAPE '\')");
        }
        if let Some(cursor) = page.cursor {
            qb.push(" AND (u.created_at, u.id) < (");
            qb.push_bind(cursor.created_at());
            qb.push(", ");
            qb.push_bind(cursor.id());
            qb.push(")");
        }

        qb.push(" ORDER BY u.created_at DESC, u.id DESC LIMIT ");
        qb.push_bind((limit + 1) as i64);

        let mut rows: Vec<UserRow> = qb
            .build_query_as::<UserRow>()
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        let has_more = rows.len() > limit;
        if has_more {
            rows.truncate(limit);
        }
        let next_cursor = if has_more {
            rows.last()
                .map(|row| UserCursor::new(row.created_at, row.id).encode())
        } else {
            None
        };

        Ok(CursorPage::new(
            rows.into_iter().map(UserRecord::from).collect(),
            next_cursor,
        ))
    }

    async fn suggest_users(
        &self,
        query: Option<&str>,
        limit: u32,
    ) -> Result<Vec<UserSummary>, RepoError> {
        let pattern = query.map(contains_pattern);
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT id, username, name, image
            FROM users
            WHERE onboarded
              AND ($1::text IS NULL
                   OR username ILIKE $1 ESCAPE '\'
                   OR name ILIKE $1 ESCAPE '\')
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(pattern)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(rows.into_iter().map(UserSummary::from).collect())
    }
}

#[async_trait]
impl UsersWriteRepo for PostgresRepositories {
    async fn upsert_user(&self, params: UpsertUserParams) -> Result<UserRecord, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, external_id, username, name, bio, image, onboarded)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            ON CONFLICT (external_id) DO UPDATE
            SET username = EXCLUDED.username,
                name = EXCLUDED.name,
                bio = EXCLUDED.bio,
                image = EXCLUDED.image,
                onboarded = TRUE,
                updated_at = now()
            RETURNING id, external_id, username, name, bio, image, onboarded, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&params.external_id)
        .bind(&params.username)
        .bind(&params.name)
        .bind(&params.bio)
        .bind(&params.image)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }
}
