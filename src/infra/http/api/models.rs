use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::{UserRecord, UserSummary};

pub use threadline_api_types::{
    DeletedResponse, ProfileRequest, PublishedResponse, RealtimePublishRequest, TagUsersRequest,
    ThreadWriteRequest, UnreadCountResponse, UploadResponse,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FeedQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserSearchQuery {
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AutocompleteQuery {
    pub query: Option<String>,
}

/// `?userId=`; also accepts `user_id`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserIdQuery {
    #[serde(alias = "user_id", rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RealtimeQuery {
    pub channels: Option<String>,
    pub thread: Option<Uuid>,
}

/// Profile without the identity-provider subject.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: Option<String>,
    pub onboarded: bool,
}

impl From<&UserRecord> for ProfileResponse {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            bio: user.bio.clone(),
            image: user.image.clone(),
            onboarded: user.onboarded,
        }
    }
}

/// `GET /me`: who the token belongs to, with the profile once it exists.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub external_id: String,
    pub profile: Option<ProfileResponse>,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub items: Vec<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub thread_id: Uuid,
    pub liked: bool,
    pub like_count: usize,
    pub likes: Vec<UserSummary>,
}
