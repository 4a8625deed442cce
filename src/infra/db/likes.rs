use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{LikesRepo, LikesWriteRepo, RepoError, UserLike},
    domain::entities::{LikeRecord, UserSummary},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct LikeRow {
    thread_id: Uuid,
    created_at: OffsetDateTime,
    user_id: Uuid,
    username: String,
    name: String,
    image: Option<String>,
}

impl From<LikeRow> for LikeRecord {
    fn from(row: LikeRow) -> Self {
        Self {
            thread_id: row.thread_id,
            user: UserSummary {
                id: row.user_id,
                username: row.username,
                name: row.name,
                image: row.image,
            },
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl LikesRepo for PostgresRepositories {
    async fn list_for_threads(&self, thread_ids: &[Uuid]) -> Result<Vec<LikeRecord>, RepoError> {
        let rows = sqlx::query_as::<_, LikeRow>(
            r#"
            SELECT l.thread_id, l.created_at, u.id AS user_id, u.username, u.name, u.image
            FROM thread_likes l
            INNER JOIN users u ON u.id = l.user_id
            WHERE l.thread_id = ANY($1)
            ORDER BY l.created_at ASC, u.id ASC
            "#,
        )
        .bind(thread_ids)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(rows.into_iter().map(LikeRecord::from).collect())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<UserLike>, RepoError> {
        let rows: Vec<(Uuid, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT thread_id, created_at
            FROM thread_likes
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(rows
            .into_iter()
            .map(|(thread_id, created_at)| UserLike {
                thread_id,
                created_at,
            })
            .collect())
    }
}

#[async_trait]
impl LikesWriteRepo for PostgresRepositories {
    async fn add_like(&self, thread_id: Uuid, user_id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO thread_likes (thread_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (thread_id, user_id) DO NOTHING
            "#,
        )
        .bind(thread_id)
        .bind(user_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_like(&self, thread_id: Uuid, user_id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM thread_likes WHERE thread_id = $1 AND user_id = $2")
            .bind(thread_id)
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }
}
