use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::application::pagination::{
    CursorPage, DEFAULT_PAGE_LIMIT, PageRequest, PaginationError, UserCursor,
};
use crate::application::repos::{
    RepoError, UpsertUserParams, UserSearchFilter, UsersRepo, UsersWriteRepo,
};
use crate::domain::entities::{UserRecord, UserSummary};
use crate::domain::error::DomainError;
use crate::domain::{threads, users};

const SUGGESTIONS_WITHOUT_QUERY: u32 = 10;
const SUGGESTIONS_WITH_QUERY: u32 = 5;

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("username is already taken")]
    UsernameTaken,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for UserError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::Duplicate { constraint } if constraint.contains("username") => {
                UserError::UsernameTaken
            }
            RepoError::Pagination(err) => UserError::Pagination(err),
            other => UserError::Repo(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateProfileCommand {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: Option<String>,
}

#[derive(Clone)]
pub struct UserService {
    reader: Arc<dyn UsersRepo>,
    writer: Arc<dyn UsersWriteRepo>,
}

impl UserService {
    pub fn new(reader: Arc<dyn UsersRepo>, writer: Arc<dyn UsersWriteRepo>) -> Self {
        Self { reader, writer }
    }

    /// Create or update the profile of the identity `external_id` and mark it onboarded.
    pub async fn update_profile(
        &self,
        external_id: &str,
        command: UpdateProfileCommand,
    ) -> Result<UserRecord, UserError> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(DomainError::validation("external_id", "must not be empty").into());
        }

        let params = UpsertUserParams {
            external_id: external_id.to_string(),
            username: users::normalize_username(&command.username)?,
            name: users::normalize_name(&command.name)?,
            bio: users::normalize_bio(&command.bio)?,
            image: threads::validate_image_url(command.image.as_deref())?,
        };

        let record = self.writer.upsert_user(params).await?;
        Ok(record)
    }

    pub async fn fetch_user(&self, external_id: &str) -> Result<Option<UserRecord>, UserError> {
        Ok(self.reader.find_by_external_id(external_id).await?)
    }

    pub async fn fetch_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, UserError> {
        Ok(self.reader.find_by_id(id).await?)
    }

    /// Look up a profile by username; malformed names simply do not exist.
    pub async fn fetch_by_username(&self, username: &str) -> Result<Option<UserRecord>, UserError> {
        let Ok(normalized) = users::normalize_username(username) else {
            return Ok(None);
        };
        Ok(self.reader.find_by_username(&normalized).await?)
    }

    pub async fn search_users(
        &self,
        exclude: Option<Uuid>,
        search: Option<&str>,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<CursorPage<UserRecord>, UserError> {
        let cursor = cursor.map(UserCursor::decode).transpose()?;
        let filter = UserSearchFilter {
            exclude,
            search: search
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        };
        let page = PageRequest::new(limit.unwrap_or(DEFAULT_PAGE_LIMIT), cursor);
        Ok(self.reader.search_users(&filter, page).await?)
    }

    /// Mention autocomplete: a short list without a query, fewer matches with one.
    pub async fn autocomplete(&self, query: Option<&str>) -> Result<Vec<UserSummary>, UserError> {
        let query = query
            .map(|value| value.trim().trim_start_matches('@'))
            .filter(|value| !value.is_empty());
        let limit = match query {
            Some(_) => SUGGESTIONS_WITH_QUERY,
            None => SUGGESTIONS_WITHOUT_QUERY,
        };
        Ok(self.reader.suggest_users(query, limit).await?)
    }

    /// Resolve mentioned usernames. Lookup failures degrade to "nobody matched".
    pub async fn find_by_usernames(&self, usernames: &[String]) -> Vec<UserSummary> {
        if usernames.is_empty() {
            return Vec::new();
        }
        let lowered: Vec<String> = usernames.iter().map(|name| name.to_lowercase()).collect();
        match self.reader.find_by_usernames(&lowered).await {
            Ok(mut found) => {
                found.sort_by_key(|user| lowered.iter().position(|name| *name == user.username));
                found
            }
            Err(err) => {
                warn!(
                    target = "threadline::application::users",
                    error = %err,
                    count = lowered.len(),
                    "mention lookup failed"
                );
                Vec::new()
            }
        }
    }

    pub async fn summaries(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();
        let found = self.reader.find_summaries(&unique).await?;
        Ok(found.into_iter().map(|user| (user.id, user)).collect())
    }
}
