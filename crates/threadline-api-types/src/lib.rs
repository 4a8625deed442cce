//! Request and response types shared by the Threadline JSON API and its clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a stored notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "notification_kind", rename_all = "snake_case")
)]
pub enum NotificationKind {
    Mention,
    Like,
    Comment,
    Follow,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Mention => "mention",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
        }
    }
}

/// Kind of an entry in a user's activity view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    CreatedThread,
    LikedThread,
    ReceivedLike,
    CreatedComment,
    ReceivedComment,
    Mention,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::CreatedThread => "created_thread",
            ActivityKind::LikedThread => "liked_thread",
            ActivityKind::ReceivedLike => "received_like",
            ActivityKind::CreatedComment => "created_comment",
            ActivityKind::ReceivedComment => "received_comment",
            ActivityKind::Mention => "mention",
        }
    }
}

/// Realtime channel a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RealtimeChannel {
    ThreadLikes,
    ThreadComments,
}

impl RealtimeChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            RealtimeChannel::ThreadLikes => "thread-likes",
            RealtimeChannel::ThreadComments => "thread-comments",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "thread-likes" => Some(RealtimeChannel::ThreadLikes),
            "thread-comments" => Some(RealtimeChannel::ThreadComments),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RealtimeEventKind {
    LikeAdded,
    LikeRemoved,
    CommentAdded,
}

impl RealtimeEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RealtimeEventKind::LikeAdded => "like-added",
            RealtimeEventKind::LikeRemoved => "like-removed",
            RealtimeEventKind::CommentAdded => "comment-added",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "like-added" => Some(RealtimeEventKind::LikeAdded),
            "like-removed" => Some(RealtimeEventKind::LikeRemoved),
            "comment-added" => Some(RealtimeEventKind::CommentAdded),
            _ => None,
        }
    }
}

/// Body for creating a thread, replying, or editing a thread.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThreadWriteRequest {
    pub text: String,
    #[serde(default, alias = "imgPosts")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileRequest {
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagUsersRequest {
    pub user_ids: Vec<Uuid>,
}

/// Client-published realtime event. Every field is required; they are optional
/// here so the server can answer with a descriptive 400.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RealtimePublishRequest {
    #[serde(default, alias = "channelName")]
    pub channel: Option<String>,
    #[serde(default, alias = "eventName")]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnreadCountResponse {
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishedResponse {
    pub delivered: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub content_type: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}
