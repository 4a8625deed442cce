use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::pagination::{CursorPage, PageRequest, ThreadCursor},
    application::repos::{
        CreateThreadParams, RepoError, ThreadsRepo, ThreadsWriteRepo, UpdateThreadParams,
    },
    domain::entities::ThreadRecord,
    domain::types::ThreadScope,
};

use super::{PostgresRepositories, map_sqlx_error};

const THREAD_COLUMNS: &str =
    "t.id, t.author_id, t.parent_id, t.text, t.image_url, t.tags, t.created_at, t.updated_at";

#[derive(sqlx::FromRow)]
struct ThreadRow {
    id: Uuid,
    author_id: Uuid,
    parent_id: Option<Uuid>,
    text: String,
    image_url: Option<String>,
    tags: Vec<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ThreadRow> for ThreadRecord {
    fn from(row: ThreadRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            parent_id: row.parent_id,
            text: row.text,
            image_url: row.image_url,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn into_records(rows: Vec<ThreadRow>) -> Vec<ThreadRecord> {
    rows.into_iter().map(ThreadRecord::from).collect()
}

#[async_trait]
impl ThreadsRepo for PostgresRepositories {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ThreadRecord>, RepoError> {
        let sql = format!("SELECT {THREAD_COLUMNS} FROM threads t WHERE t.id = $1");
        let row = sqlx::query_as::<_, ThreadRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;
        Ok(row.map(ThreadRecord::from))
    }

    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<ThreadRecord>, RepoError> {
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM threads t WHERE t.id = ANY($1) ORDER BY t.created_at DESC"
        );
        let rows = sqlx::query_as::<_, ThreadRow>(&sql)
            .bind(ids)
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;
        Ok(into_records(rows))
    }

    async fn list_feed(
        &self,
        page: PageRequest<ThreadCursor>,
    ) -> Result<CursorPage<ThreadRecord>, RepoError> {
        let limit = page.bounded_limit() as usize;

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT ");
        qb.push(THREAD_COLUMNS);
        qb.push(" FROM threads t WHERE t.parent_id IS NULL");
        if let Some(cursor) = page.cursor {
            qb.push(" AND (t.created_at, t.id) < (");
            qb.push_bind(cursor.created_at());
            qb.push(", ");
            qb.push_bind(cursor.id());
            qb.push(")");
        }
        qb.push(" ORDER BY t.created_at DESC, t.id DESC LIMIT ");
        qb.push_bind((limit + 1) as i64);

        let mut rows: Vec<ThreadRow> = qb
            .build_query_as::<ThreadRow>()
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;

        let has_more = rows.len() > limit;
        if has_more {
            rows.truncate(limit);
        }
        let next_cursor = if has_more {
            rows.last()
                .map(|row| ThreadCursor::new(row.created_at, row.id).encode())
        } else {
            None
        };

        Ok(CursorPage::new(into_records(rows), next_cursor))
    }

    async fn list_children(&self, parent_ids: &[Uuid]) -> Result<Vec<ThreadRecord>, RepoError> {
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM threads t \
             WHERE t.parent_id = ANY($1) \
             ORDER BY t.created_at ASC, t.id ASC"
        );
        let rows = sqlx::query_as::<_, ThreadRow>(&sql)
            .bind(parent_ids)
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;
        Ok(into_records(rows))
    }

    async fn list_by_author(
        &self,
        author_id: Uuid,
        scope: ThreadScope,
    ) -> Result<Vec<ThreadRecord>, RepoError> {
        let scope_clause = match scope {
            ThreadScope::TopLevel => " AND t.parent_id IS NULL",
            ThreadScope::Replies => " AND t.parent_id IS NOT NULL",
            ThreadScope::All => "",
        };
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM threads t \
             WHERE t.author_id = $1{scope_clause} \
             ORDER BY t.created_at DESC, t.id DESC"
        );
        let rows = sqlx::query_as::<_, ThreadRow>(&sql)
            .bind(author_id)
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;
        Ok(into_records(rows))
    }

    async fn list_mentioning(&self, username: &str) -> Result<Vec<ThreadRecord>, RepoError> {
        // Usernames are word characters only, so they need no regex escaping.
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM threads t \
             WHERE t.text ~* ('@' || $1 || '\\y') \
             ORDER BY t.created_at DESC, t.id DESC"
        );
        let rows = sqlx::query_as::<_, ThreadRow>(&sql)
            .bind(username)
            .fetch_all(self.pool())
            .await
            .map_err(RepoError::from_persistence)?;
        Ok(into_records(rows))
    }

    async fn descendant_ids(&self, id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            WITH RECURSIVE tree AS (
                SELECT id FROM threads WHERE parent_id = $1
                UNION ALL
                SELECT t.id FROM threads t INNER JOIN tree ON t.parent_id = tree.id
            )
            SELECT id FROM tree
            "#,
        )
        .bind(id)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl ThreadsWriteRepo for PostgresRepositories {
    async fn create_thread(&self, params: CreateThreadParams) -> Result<ThreadRecord, RepoError> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            INSERT INTO threads (id, author_id, parent_id, text, image_url, tags)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, author_id, parent_id, text, image_url, tags, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.author_id)
        .bind(params.parent_id)
        .bind(&params.text)
        .bind(&params.image_url)
        .bind(&params.tags)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update_thread(&self, params: UpdateThreadParams) -> Result<ThreadRecord, RepoError> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            UPDATE threads
            SET text = $2, image_url = $3, tags = $4, updated_at = now()
            WHERE id = $1
            RETURNING id, author_id, parent_id, text, image_url, tags, created_at, updated_at
            "#,
        )
        .bind(params.id)
        .bind(&params.text)
        .bind(&params.image_url)
        .bind(&params.tags)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn clear_image(&self, id: Uuid) -> Result<ThreadRecord, RepoError> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            UPDATE threads
            SET image_url = NULL, updated_at = now()
            WHERE id = $1
            RETURNING id, author_id, parent_id, text, image_url, tags, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn add_tags(&self, id: Uuid, user_ids: &[Uuid]) -> Result<ThreadRecord, RepoError> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            UPDATE threads
            SET tags = tags || ARRAY(
                    SELECT DISTINCT u FROM unnest($2::uuid[]) AS u
                    WHERE u <> ALL(tags)
                ),
                updated_at = now()
            WHERE id = $1
            RETURNING id, author_id, parent_id, text, image_url, tags, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(user_ids)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn delete_threads(&self, ids: &[Uuid]) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM threads WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
