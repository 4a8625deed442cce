use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::repos::{
    CreateNotificationParams, NotificationsRepo, NotificationsWriteRepo, RepoError, ThreadsRepo,
};
use crate::application::users::UserService;
use crate::domain::entities::{NotificationRecord, UserSummary};
use crate::domain::threads::excerpt;

pub const METRIC_NOTIFICATIONS_CREATED: &str = "threadline_notifications_created_total";
pub const METRIC_NOTIFICATIONS_DEDUPLICATED: &str = "threadline_notifications_deduplicated_total";

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);
const EXCERPT_CHARS: usize = 120;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification not found")]
    NotFound,
    #[error("notification belongs to another user")]
    Forbidden,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Thread text shown next to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadExcerpt {
    pub id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: NotificationRecord,
    pub sender: Option<UserSummary>,
    pub thread: Option<ThreadExcerpt>,
}

#[derive(Clone)]
pub struct NotificationService {
    reader: Arc<dyn NotificationsRepo>,
    writer: Arc<dyn NotificationsWriteRepo>,
    threads: Arc<dyn ThreadsRepo>,
    users: Arc<UserService>,
    dedup_window: Duration,
}

impl NotificationService {
    pub fn new(
        reader: Arc<dyn NotificationsRepo>,
        writer: Arc<dyn NotificationsWriteRepo>,
        threads: Arc<dyn ThreadsRepo>,
        users: Arc<UserService>,
    ) -> Self {
        Self {
            reader,
            writer,
            threads,
            users,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Record a notification unless it targets its own sender or repeats a
    /// still-unread one from inside the dedup window.
    pub async fn create(
        &self,
        params: CreateNotificationParams,
    ) -> Result<Option<NotificationRecord>, NotificationError> {
        if params.recipient_id == params.sender_id {
            return Ok(None);
        }

        let since = OffsetDateTime::now_utc() - self.dedup_window;
        if let Some(existing) = self.reader.find_recent_duplicate(&params, since).await? {
            counter!(METRIC_NOTIFICATIONS_DEDUPLICATED, "kind" => params.kind.as_str())
                .increment(1);
            debug!(
                target = "threadline::application::notifications",
                notification_id = %existing.id,
                kind = params.kind.as_str(),
                "duplicate notification suppressed"
            );
            return Ok(Some(existing));
        }

        let kind = params.kind;
        let record = self.writer.create_notification(params).await?;
        counter!(METRIC_NOTIFICATIONS_CREATED, "kind" => kind.as_str()).increment(1);
        info!(
            target = "threadline::application::notifications",
            notification_id = %record.id,
            recipient_id = %record.recipient_id,
            kind = kind.as_str(),
            "notification created"
        );
        Ok(Some(record))
    }

    pub async fn list_for(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<NotificationView>, NotificationError> {
        let records = self.reader.list_for_recipient(user_id).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let sender_ids: Vec<Uuid> = records.iter().map(|record| record.sender_id).collect();
        let senders = self.users.summaries(&sender_ids).await?;

        let mut thread_ids: Vec<Uuid> = records.iter().filter_map(|r| r.thread_id).collect();
        thread_ids.sort_unstable();
        thread_ids.dedup();
        let threads = if thread_ids.is_empty() {
            Vec::new()
        } else {
            self.threads.find_many(&thread_ids).await?
        };

        Ok(records
            .into_iter()
            .map(|notification| {
                let sender = senders.get(&notification.sender_id).cloned();
                let thread = notification.thread_id.and_then(|id| {
                    threads
                        .iter()
                        .find(|thread| thread.id == id)
                        .map(|thread| ThreadExcerpt {
                            id: thread.id,
                            text: excerpt(&thread.text, EXCERPT_CHARS),
                        })
                });
                NotificationView {
                    notification,
                    sender,
                    thread,
                }
            })
            .collect())
    }

    pub async fn mark_read(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<NotificationRecord, NotificationError> {
        let record = self
            .reader
            .find_by_id(id)
            .await?
            .ok_or(NotificationError::NotFound)?;
        if record.recipient_id != user_id {
            return Err(NotificationError::Forbidden);
        }
        if record.read {
            return Ok(record);
        }
        match self.writer.mark_read(id).await {
            Ok(updated) => Ok(updated),
            Err(RepoError::NotFound) => Err(NotificationError::NotFound),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, NotificationError> {
        Ok(self.writer.mark_all_read(user_id).await?)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64, NotificationError> {
        Ok(self.reader.count_unread(user_id).await?)
    }

    /// Remove notifications pointing at threads that are going away.
    pub async fn purge_for_threads(&self, thread_ids: &[Uuid]) -> Result<u64, NotificationError> {
        if thread_ids.is_empty() {
            return Ok(0);
        }
        Ok(self.writer.delete_for_threads(thread_ids).await?)
    }
}
