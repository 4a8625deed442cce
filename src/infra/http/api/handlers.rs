use std::convert::Infallible;

use axum::extract::{Extension, Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::identity::Principal;
use crate::application::realtime::{RealtimeEvent, RealtimeFilter};
use crate::application::threads::ThreadInput;
use crate::application::users::UpdateProfileCommand;
use crate::domain::entities::UserRecord;
use crate::domain::types::{RealtimeChannel, RealtimeEventKind};
use crate::infra::http::HttpState;
use crate::infra::uploads::{self, UploadStorageError};

use super::error::ApiError;
use super::models::*;

type ApiResult<T> = Result<T, ApiError>;

fn member(principal: &Principal) -> ApiResult<&UserRecord> {
    Ok(principal.onboarded()?)
}

fn thread_input(payload: ThreadWriteRequest) -> ThreadInput {
    ThreadInput {
        text: payload.text,
        image_url: payload.image_url,
    }
}

async fn user_by_name(state: &HttpState, username: &str) -> ApiResult<UserRecord> {
    state
        .users
        .fetch_by_username(username)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// `?userId=` lookups: absent or malformed is a 400, unknown a 404.
async fn user_from_query(state: &HttpState, query: UserIdQuery) -> ApiResult<UserRecord> {
    let raw = query
        .user_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("userId is required", None))?;
    let id = Uuid::parse_str(&raw)
        .map_err(|err| ApiError::bad_request("userId must be a UUID", Some(err.to_string())))?;
    state
        .users
        .fetch_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

// threads

pub async fn list_feed(
    State(state): State<HttpState>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .threads
        .fetch_feed(query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(page))
}

pub async fn create_thread(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<ThreadWriteRequest>,
) -> ApiResult<impl IntoResponse> {
    let author = member(&principal)?;
    let thread = state
        .threads
        .create_thread(author, thread_input(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(thread)))
}

pub async fn get_thread(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let thread = state
        .threads
        .fetch_thread(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Thread not found"))?;
    Ok(Json(thread))
}

pub async fn update_thread(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ThreadWriteRequest>,
) -> ApiResult<impl IntoResponse> {
    let author = member(&principal)?;
    let thread = state
        .threads
        .update_thread(author, id, thread_input(payload))
        .await?;
    Ok(Json(thread))
}

pub async fn delete_thread(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let author = member(&principal)?;
    let deleted = state.threads.delete_thread(author, id).await?;
    Ok(Json(DeletedResponse { deleted }))
}

pub async fn add_comment(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ThreadWriteRequest>,
) -> ApiResult<impl IntoResponse> {
    let author = member(&principal)?;
    let comment = state
        .threads
        .add_comment(author, id, thread_input(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn toggle_like(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = member(&principal)?;
    let toggle = state.threads.toggle_like(user, id).await?;
    Ok(Json(LikeResponse {
        thread_id: toggle.thread_id,
        liked: toggle.liked,
        like_count: toggle.likes.len(),
        likes: toggle.likes,
    }))
}

pub async fn remove_image(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let author = member(&principal)?;
    let removal = state.threads.remove_image(author, id).await?;
    if let Some(stored_path) = removal.previous.as_deref().and_then(uploads::stored_path_of) {
        if let Err(err) = state.uploads.delete(stored_path).await {
            warn!(
                target = "threadline::http::api::uploads",
                path = %stored_path,
                error = %err,
                "failed to delete detached image"
            );
        }
    }
    Ok(Json(removal.thread))
}

pub async fn list_likers(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let items = state.threads.list_likers(id).await?;
    Ok(Json(UserListResponse { items }))
}

pub async fn tag_users(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TagUsersRequest>,
) -> ApiResult<impl IntoResponse> {
    let author = member(&principal)?;
    let updated = state
        .threads
        .tag_users(author, id, &payload.user_ids)
        .await?;
    Ok(Json(updated))
}

// users

pub async fn autocomplete_users(
    State(state): State<HttpState>,
    Query(query): Query<AutocompleteQuery>,
) -> ApiResult<impl IntoResponse> {
    let items = state.users.autocomplete(query.query.as_deref()).await?;
    Ok(Json(UserListResponse { items }))
}

pub async fn search_users(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<UserSearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let exclude = principal.user.as_ref().map(|user| user.id);
    let page = state
        .users
        .search_users(
            exclude,
            query.search.as_deref(),
            query.cursor.as_deref(),
            query.limit,
        )
        .await?;
    Ok(Json(page.map(|user| ProfileResponse::from(&user))))
}

pub async fn get_me(Extension(principal): Extension<Principal>) -> impl IntoResponse {
    Json(MeResponse {
        profile: principal.user.as_ref().map(ProfileResponse::from),
        external_id: principal.external_id,
    })
}

pub async fn put_me(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<ProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .users
        .update_profile(
            &principal.external_id,
            UpdateProfileCommand {
                username: payload.username,
                name: payload.name,
                bio: payload.bio,
                image: payload.image,
            },
        )
        .await?;
    info!(
        target = "threadline::http::api",
        user_id = %user.id,
        username = %user.username,
        "profile saved"
    );
    Ok(Json(ProfileResponse::from(&user)))
}

pub async fn get_user(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = user_by_name(&state, &username).await?;
    Ok(Json(ProfileResponse::from(&user)))
}

pub async fn user_threads(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = user_by_name(&state, &username).await?;
    Ok(Json(state.threads.list_user_threads(user.id).await?))
}

pub async fn user_replies(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = user_by_name(&state, &username).await?;
    Ok(Json(state.threads.list_user_replies(user.id).await?))
}

/// Replies other people left on the user's threads.
pub async fn received_replies(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = user_by_name(&state, &username).await?;
    Ok(Json(state.threads.replies_to_user(user.id).await?))
}

pub async fn tagged_threads(
    State(state): State<HttpState>,
    Query(query): Query<UserIdQuery>,
) -> ApiResult<impl IntoResponse> {
    let user = user_from_query(&state, query).await?;
    Ok(Json(state.threads.list_tagged_threads(&user).await?))
}

pub async fn user_activity(
    State(state): State<HttpState>,
    Query(query): Query<UserIdQuery>,
) -> ApiResult<impl IntoResponse> {
    let user = user_from_query(&state, query).await?;
    Ok(Json(state.activity.user_activity(user.id).await?))
}

// notifications

pub async fn list_notifications(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    let user = member(&principal)?;
    Ok(Json(state.notifications.list_for(user.id).await?))
}

pub async fn unread_count(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    let user = member(&principal)?;
    let count = state.notifications.unread_count(user.id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_notification_read(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = member(&principal)?;
    Ok(Json(state.notifications.mark_read(user.id, id).await?))
}

pub async fn mark_all_notifications_read(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    let user = member(&principal)?;
    let updated = state.notifications.mark_all_read(user.id).await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

// realtime

pub async fn realtime_stream(
    State(state): State<HttpState>,
    Query(query): Query<RealtimeQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = RealtimeFilter::parse(query.channels.as_deref(), query.thread);
    let channels = filter.channels.clone();
    let thread = filter.thread_id;
    let events = state.realtime.stream(filter);
    debug!(
        target = "threadline::http::api::realtime",
        channels = ?channels,
        thread = ?thread,
        subscribers = state.realtime.subscriber_count(),
        "realtime subscriber connected"
    );
    let events = events.map(|event| {
        let frame = Event::default().event(event.event.as_str());
        Ok(match frame.json_data(&event) {
            Ok(frame) => frame,
            Err(_) => Event::default().comment("unserializable event"),
        })
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn publish_comment_event(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<RealtimePublishRequest>,
) -> ApiResult<impl IntoResponse> {
    member(&principal)?;
    let channel = payload
        .channel
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("channel is required", None))?;
    let channel = RealtimeChannel::parse(channel)
        .ok_or_else(|| ApiError::bad_request("unknown channel", Some(channel.to_string())))?;
    let event = payload
        .event
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("event is required", None))?;
    let event = RealtimeEventKind::parse(event)
        .ok_or_else(|| ApiError::bad_request("unknown event", Some(event.to_string())))?;
    let data = payload
        .data
        .ok_or_else(|| ApiError::bad_request("data is required", None))?;

    let thread_id = ["threadId", "thread_id"]
        .iter()
        .find_map(|key| data.get(*key).and_then(|value| value.as_str()))
        .and_then(|raw| Uuid::parse_str(raw).ok());

    let delivered = state
        .realtime
        .publish(RealtimeEvent::new(channel, event, thread_id, data));
    Ok(Json(PublishedResponse { delivered }))
}

// uploads

pub async fn upload_image(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let user = member(&principal)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request("invalid multipart payload", Some(err.to_string())))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let body = field.map(|chunk| chunk.map_err(UploadStorageError::stream));

        let stored = state
            .uploads
            .store_image(&file_name, content_type.as_deref(), body)
            .await?;
        info!(
            target = "threadline::http::api::uploads",
            user_id = %user.id,
            path = %stored.stored_path,
            size_bytes = stored.size_bytes,
            "image stored"
        );
        let response = UploadResponse {
            url: stored.url,
            content_type: stored.content_type,
            checksum: stored.checksum,
            size_bytes: stored.size_bytes,
            width: stored.width,
            height: stored.height,
        };
        return Ok((StatusCode::CREATED, Json(response)).into_response());
    }

    Err(ApiError::bad_request("missing file", None))
}
