//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::{
    CursorPage, PageRequest, PaginationError, ThreadCursor, UserCursor,
};
use crate::domain::entities::{
    LikeRecord, NotificationRecord, ThreadRecord, UserRecord, UserSummary,
};
use crate::domain::types::{NotificationKind, ThreadScope};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserSearchFilter {
    /// Caller, never part of the results.
    pub exclude: Option<Uuid>,
    /// Case-insensitive substring of name or username.
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpsertUserParams {
    pub external_id: String,
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateThreadParams {
    pub author_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub text: String,
    pub image_url: Option<String>,
    pub tags: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct UpdateThreadParams {
    pub id: Uuid,
    pub text: String,
    pub image_url: Option<String>,
    pub tags: Vec<Uuid>,
}

/// A like cast by a user, seen from the liker's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLike {
    pub thread_id: Uuid,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateNotificationParams {
    pub recipient_id: Uuid,
    pub sender_id: Uuid,
    pub kind: NotificationKind,
    pub thread_id: Option<Uuid>,
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError>;

    async fn find_by_external_id(&self, external_id: &str)
    -> Result<Option<UserRecord>, RepoError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, RepoError>;

    /// Summaries for lowercase usernames; unknown names are skipped.
    async fn find_by_usernames(&self, usernames: &[String])
    -> Result<Vec<UserSummary>, RepoError>;

    async fn find_summaries(&self, ids: &[Uuid]) -> Result<Vec<UserSummary>, RepoError>;

    async fn search_users(
        &self,
        filter: &UserSearchFilter,
        page: PageRequest<UserCursor>,
    ) -> Result<CursorPage<UserRecord>, RepoError>;

    /// Oldest-first slice used by mention autocomplete.
    async fn suggest_users(
        &self,
        query: Option<&str>,
        limit: u32,
    ) -> Result<Vec<UserSummary>, RepoError>;
}

#[async_trait]
pub trait UsersWriteRepo: Send + Sync {
    /// Insert or update the profile owned by `external_id`, marking it onboarded.
    async fn upsert_user(&self, params: UpsertUserParams) -> Result<UserRecord, RepoError>;
}

#[async_trait]
pub trait ThreadsRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ThreadRecord>, RepoError>;

    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<ThreadRecord>, RepoError>;

    /// Top-level threads, newest first.
    async fn list_feed(
        &self,
        page: PageRequest<ThreadCursor>,
    ) -> Result<CursorPage<ThreadRecord>, RepoError>;

    /// Direct replies to any of `parent_ids`, oldest first.
    async fn list_children(&self, parent_ids: &[Uuid]) -> Result<Vec<ThreadRecord>, RepoError>;

    /// An author's threads, newest first.
    async fn list_by_author(
        &self,
        author_id: Uuid,
        scope: ThreadScope,
    ) -> Result<Vec<ThreadRecord>, RepoError>;

    /// Threads whose text contains `@username` as a whole word, newest first.
    async fn list_mentioning(&self, username: &str) -> Result<Vec<ThreadRecord>, RepoError>;

    /// Every transitive reply below `id`, excluding `id` itself.
    async fn descendant_ids(&self, id: Uuid) -> Result<Vec<Uuid>, RepoError>;
}

#[async_trait]
pub trait ThreadsWriteRepo: Send + Sync {
    async fn create_thread(&self, params: CreateThreadParams) -> Result<ThreadRecord, RepoError>;

    async fn update_thread(&self, params: UpdateThreadParams) -> Result<ThreadRecord, RepoError>;

    async fn clear_image(&self, id: Uuid) -> Result<ThreadRecord, RepoError>;

    /// Add user ids to a thread's tags, ignoring ids already present.
    async fn add_tags(&self, id: Uuid, user_ids: &[Uuid]) -> Result<ThreadRecord, RepoError>;

    /// Delete the listed threads; returns how many rows went away.
    async fn delete_threads(&self, ids: &[Uuid]) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait LikesRepo: Send + Sync {
    /// Likes on any of `thread_ids`, oldest first, with the liker populated.
    async fn list_for_threads(&self, thread_ids: &[Uuid]) -> Result<Vec<LikeRecord>, RepoError>;

    /// Likes cast by `user_id`, newest first.
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<UserLike>, RepoError>;
}

#[async_trait]
pub trait LikesWriteRepo: Send + Sync {
    /// Returns `false` when the like already existed.
    async fn add_like(&self, thread_id: Uuid, user_id: Uuid) -> Result<bool, RepoError>;

    /// Returns `false` when there was no like to remove.
    async fn remove_like(&self, thread_id: Uuid, user_id: Uuid) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait NotificationsRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationRecord>, RepoError>;

    /// Newest first.
    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<NotificationRecord>, RepoError>;

    async fn count_unread(&self, recipient_id: Uuid) -> Result<u64, RepoError>;

    /// An unread notification with the same shape created at or after `since`.
    async fn find_recent_duplicate(
        &self,
        params: &CreateNotificationParams,
        since: OffsetDateTime,
    ) -> Result<Option<NotificationRecord>, RepoError>;
}

#[async_trait]
pub trait NotificationsWriteRepo: Send + Sync {
    async fn create_notification(
        &self,
        params: CreateNotificationParams,
    ) -> Result<NotificationRecord, RepoError>;

    async fn mark_read(&self, id: Uuid) -> Result<NotificationRecord, RepoError>;

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64, RepoError>;

    async fn delete_for_threads(&self, thread_ids: &[Uuid]) -> Result<u64, RepoError>;
}
