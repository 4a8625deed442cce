use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        CreateNotificationParams, NotificationsRepo, NotificationsWriteRepo, RepoError,
    },
    domain::entities::NotificationRecord,
    domain::types::NotificationKind,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient_id: Uuid,
    sender_id: Uuid,
    kind: NotificationKind,
    thread_id: Option<Uuid>,
    read: bool,
    created_at: OffsetDateTime,
}

impl From<NotificationRow> for NotificationRecord {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            recipient_id: row.recipient_id,
            sender_id: row.sender_id,
            kind: row.kind,
            thread_id: row.thread_id,
            read: row.read,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl NotificationsRepo for PostgresRepositories {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationRecord>, RepoError> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, recipient_id, sender_id, kind, thread_id, read, created_at
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(row.map(NotificationRecord::from))
    }

    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<NotificationRecord>, RepoError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, recipient_id, sender_id, kind, thread_id, read, created_at
            FROM notifications
            WHERE recipient_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(recipient_id)
        .fetch_all(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(rows.into_iter().map(NotificationRecord::from).collect())
    }

    async fn count_unread(&self, recipient_id: Uuid) -> Result<u64, RepoError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND NOT read",
        )
        .bind(recipient_id)
        .fetch_one(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Self::convert_count(count)
    }

    async fn find_recent_duplicate(
        &self,
        params: &CreateNotificationParams,
        since: OffsetDateTime,
    ) -> Result<Option<NotificationRecord>, RepoError> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, recipient_id, sender_id, kind, thread_id, read, created_at
            FROM notifications
            WHERE recipient_id = $1
              AND sender_id = $2
              AND kind = $3
              AND thread_id IS NOT DISTINCT FROM $4
              AND NOT read
              AND created_at >= $5
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(params.recipient_id)
        .bind(params.sender_id)
        .bind(params.kind)
        .bind(params.thread_id)
        .bind(since)
        .fetch_optional(self.pool())
        .await
        .map_err(RepoError::from_persistence)?;
        Ok(row.map(NotificationRecord::from))
    }
}

#[async_trait]
impl NotificationsWriteRepo for PostgresRepositories {
    async fn create_notification(
        &self,
        params: CreateNotificationParams,
    ) -> Result<NotificationRecord, RepoError> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            INSERT INTO notifications (id, recipient_id, sender_id, kind, thread_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, recipient_id, sender_id, kind, thread_id, read, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.recipient_id)
        .bind(params.sender_id)
        .bind(params.kind)
        .bind(params.thread_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn mark_read(&self, id: Uuid) -> Result<NotificationRecord, RepoError> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            UPDATE notifications
            SET read = TRUE
            WHERE id = $1
            RETURNING id, recipient_id, sender_id, kind, thread_id, read, created_at
            "#,
        )
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64, RepoError> {
        let result =
            sqlx::query("UPDATE notifications SET read = TRUE WHERE recipient_id = $1 AND NOT read")
                .bind(recipient_id)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_for_threads(&self, thread_ids: &[Uuid]) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM notifications WHERE thread_id = ANY($1)")
            .bind(thread_ids)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
