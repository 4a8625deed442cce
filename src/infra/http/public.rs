use std::io::ErrorKind;

use axum::{
    Form, Router,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, HOST, REFERER, X_CONTENT_TYPE_OPTIONS},
    },
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    application::{
        error::HttpError,
        stream::PatchStream,
        threads::{ThreadError, ThreadInput},
        users::{UpdateProfileCommand, UserError},
    },
    domain::entities::UserRecord,
    infra::{assets, uploads::UploadStorageError},
    presentation::views::{
        ActivityItemView, AuthorView, FeedTemplate, LayoutView, LikeButtonTemplate, LikeButtonView,
        LikesTemplate, NotificationItemView, OnboardingForm, OnboardingTemplate, ProfileTab,
        ProfileTemplate, ProfileView, ReplyCardView, SearchResultView, SearchTemplate,
        ThreadCardView, ThreadTemplate, render_error_response, render_template,
        render_template_response,
    },
};

use super::{
    DATASTAR_REQUEST_HEADER, HttpState,
    auth::{Member, SignedIn, Viewer},
    db_health_response,
};

pub fn routes() -> Router<HttpState> {
    Router::new()
        .route("/", get(index))
        .route("/threads", post(compose))
        .route("/threads/{id}", get(thread_detail))
        .route("/threads/{id}/likes", get(thread_likes))
        .route("/threads/{id}/comments", post(comment))
        .route("/threads/{id}/like", post(like))
        .route("/threads/{id}/edit", post(edit))
        .route("/threads/{id}/delete", post(delete))
        .route("/profile/{username}", get(profile))
        .route("/search", get(search))
        .route("/onboarding", get(onboarding).post(save_onboarding))
        .route("/notifications/{id}/read", post(read_notification))
        .route("/notifications/read-all", post(read_all_notifications))
        .route("/_health/db", get(public_health))
        .route("/uploads/{*path}", get(serve_upload))
        .route("/static/{*path}", get(assets::serve_static))
        .fallback(not_found)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CursorQuery {
    cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileQuery {
    tab: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchQuery {
    q: Option<String>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadForm {
    text: String,
    #[serde(default)]
    image_url: Option<String>,
}

impl From<ThreadForm> for ThreadInput {
    fn from(form: ThreadForm) -> Self {
        Self {
            text: form.text,
            image_url: form.image_url,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileForm {
    username: String,
    name: String,
    bio: String,
    image: String,
}

/// Chrome for a page, with the viewer's unread count when signed in.
async fn layout(
    state: &HttpState,
    title: impl Into<String>,
    viewer: Option<&UserRecord>,
) -> LayoutView {
    let view = LayoutView::new(title, viewer);
    let Some(user) = viewer else {
        return view;
    };
    match state.notifications.unread_count(user.id).await {
        Ok(count) => view.with_unread(count),
        Err(err) => {
            warn!(
                target = "threadline::http::public",
                error = %err,
                "unread count unavailable"
            );
            view
        }
    }
}

async fn page_not_found(state: &HttpState, viewer: Option<&UserRecord>, what: &str) -> Response {
    let layout = layout(state, "Not found", viewer).await;
    render_error_response(
        layout,
        StatusCode::NOT_FOUND,
        &format!("{what} not found"),
        "infra::http::public::not_found",
    )
}

/// Back to where the form was submitted from, or `fallback`. Only same-origin
/// referers are followed.
fn back_to(headers: &HeaderMap, fallback: &str) -> Redirect {
    let host = headers.get(HOST).and_then(|value| value.to_str().ok());
    let target = headers
        .get(REFERER)
        .and_then(|value| value.to_str().ok())
        .and_then(|referer| same_origin_path(referer, host))
        .unwrap_or_else(|| fallback.to_string());
    Redirect::to(&target)
}

fn same_origin_path(referer: &str, host: Option<&str>) -> Option<String> {
    if referer.starts_with('/') {
        if referer.starts_with("//") || referer.starts_with("/\\") {
            return None;
        }
        return Some(referer.to_string());
    }

    let parsed = url::Url::parse(referer).ok()?;
    let authority = match parsed.port() {
        Some(port) => format!("{}:{port}", parsed.host_str()?),
        None => parsed.host_str()?.to_string(),
    };
    if !host?.eq_ignore_ascii_case(&authority) {
        return None;
    }
    let mut path = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }
    Some(path)
}

async fn index(
    State(state): State<HttpState>,
    viewer: Viewer,
    Query(query): Query<CursorQuery>,
) -> Result<Response, HttpError> {
    let user = viewer.user();
    let page = state
        .threads
        .fetch_feed(query.cursor.as_deref(), Some(state.feed_page_size))
        .await?;
    let template = FeedTemplate {
        layout: layout(&state, "Home", user).await,
        cards: ThreadCardView::from_nodes(&page.items, user),
        next_href: page.next_cursor.map(|cursor| format!("/?cursor={cursor}")),
        can_post: user.is_some(),
    };
    Ok(render_template_response(template, StatusCode::OK))
}

async fn thread_detail(
    State(state): State<HttpState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> Result<Response, HttpError> {
    let user = viewer.user();
    let Some(node) = state.threads.fetch_thread(id).await? else {
        return Ok(page_not_found(&state, user, "Thread").await);
    };
    let template = ThreadTemplate {
        layout: layout(&state, "Thread", user).await,
        card: ThreadCardView::from_node(&node, user),
        can_reply: user.is_some(),
        reply_action: format!("/threads/{id}/comments"),
    };
    Ok(render_template_response(template, StatusCode::OK))
}

async fn thread_likes(
    State(state): State<HttpState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> Result<Response, HttpError> {
    let user = viewer.user();
    let likers = match state.threads.list_likers(id).await {
        Ok(likers) => likers,
        Err(ThreadError::NotFound) => {
            return Ok(page_not_found(&state, user, "Thread").await);
        }
        Err(err) => return Err(err.into()),
    };
    let template = LikesTemplate {
        layout: layout(&state, "Likes", user).await,
        thread_href: format!("/threads/{id}"),
        likers: likers.iter().map(AuthorView::from).collect(),
    };
    Ok(render_template_response(template, StatusCode::OK))
}

async fn compose(
    State(state): State<HttpState>,
    Member(user): Member,
    Form(form): Form<ThreadForm>,
) -> Result<Response, HttpError> {
    state.threads.create_thread(&user, form.into()).await?;
    Ok(Redirect::to("/").into_response())
}

async fn comment(
    State(state): State<HttpState>,
    Member(user): Member,
    Path(id): Path<Uuid>,
    Form(form): Form<ThreadForm>,
) -> Result<Response, HttpError> {
    state.threads.add_comment(&user, id, form.into()).await?;
    Ok(Redirect::to(&format!("/threads/{id}")).into_response())
}

/// Datastar requests get the re-rendered button patched in place; plain
/// form posts are redirected back.
async fn like(
    State(state): State<HttpState>,
    Member(user): Member,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let toggle = state.threads.toggle_like(&user, id).await?;
    if !headers.contains_key(DATASTAR_REQUEST_HEADER) {
        return Ok(back_to(&headers, &format!("/threads/{id}")).into_response());
    }
    let button = render_template(LikeButtonTemplate {
        like: LikeButtonView {
            thread_id: id.to_string(),
            liked: toggle.liked,
            count: toggle.likes.len(),
            enabled: true,
        },
    })?;
    Ok(PatchStream::new()
        .replace(&format!("#like-{id}"), button.0)
        .into_response())
}

async fn edit(
    State(state): State<HttpState>,
    Member(user): Member,
    Path(id): Path<Uuid>,
    Form(form): Form<ThreadForm>,
) -> Result<Response, HttpError> {
    state.threads.update_thread(&user, id, form.into()).await?;
    Ok(Redirect::to(&format!("/threads/{id}")).into_response())
}

async fn delete(
    State(state): State<HttpState>,
    Member(user): Member,
    Path(id): Path<Uuid>,
) -> Result<Response, HttpError> {
    state.threads.delete_thread(&user, id).await?;
    Ok(Redirect::to("/").into_response())
}

async fn profile(
    State(state): State<HttpState>,
    viewer: Viewer,
    Path(username): Path<String>,
    Query(query): Query<ProfileQuery>,
) -> Result<Response, HttpError> {
    let user = viewer.user();
    let Some(owner) = state.users.fetch_by_username(&username).await? else {
        return Ok(page_not_found(&state, user, "Profile").await);
    };
    let is_owner = user.is_some_and(|viewer| viewer.id == owner.id);
    let mut tab = ProfileTab::parse(query.tab.as_deref());
    if tab == ProfileTab::Notifications && !is_owner {
        tab = ProfileTab::Threads;
    }

    let mut template = ProfileTemplate {
        layout: LayoutView::new(format!("@{}", owner.username), user),
        profile: ProfileView::from(&owner),
        tabs: ProfileTab::tabs(tab, &owner.username, is_owner),
        cards: Vec::new(),
        replies: Vec::new(),
        activity: Vec::new(),
        notifications: Vec::new(),
        is_owner,
        empty: false,
    };

    match tab {
        ProfileTab::Threads => {
            let nodes = state.threads.list_user_threads(owner.id).await?;
            template.cards = ThreadCardView::from_nodes(&nodes, user);
        }
        ProfileTab::Replies => {
            let views = state.threads.list_user_replies(owner.id).await?;
            template.replies = views
                .iter()
                .map(|view| ReplyCardView::from_view(view, user))
                .collect();
        }
        ProfileTab::Tagged => {
            let nodes = state.threads.list_tagged_threads(&owner).await?;
            template.cards = ThreadCardView::from_nodes(&nodes, user);
        }
        ProfileTab::Activity => {
            let entries = state.activity.user_activity(owner.id).await?;
            template.activity = entries.iter().map(ActivityItemView::from).collect();
        }
        ProfileTab::Notifications => {
            let views = state.notifications.list_for(owner.id).await?;
            template.notifications = views.iter().map(NotificationItemView::from).collect();
        }
    }

    template.empty = template.cards.is_empty()
        && template.replies.is_empty()
        && template.activity.is_empty()
        && template.notifications.is_empty();
    template.layout = layout(&state, template.layout.title.clone(), user).await;
    Ok(render_template_response(template, StatusCode::OK))
}

async fn search(
    State(state): State<HttpState>,
    viewer: Viewer,
    Query(query): Query<SearchQuery>,
) -> Result<Response, HttpError> {
    let user = viewer.user();
    let term = query.q.unwrap_or_default();
    let page = state
        .users
        .search_users(
            user.map(|viewer| viewer.id),
            Some(term.as_str()),
            query.cursor.as_deref(),
            None,
        )
        .await?;
    let encoded: String = url::form_urlencoded::byte_serialize(term.as_bytes()).collect();
    let template = SearchTemplate {
        layout: layout(&state, "Search", user).await,
        results: page
            .items
            .iter()
            .map(|found| SearchResultView {
                author: AuthorView::from(&found.summary()),
                bio: found.bio.clone(),
            })
            .collect(),
        next_href: page
            .next_cursor
            .map(|cursor| format!("/search?q={encoded}&cursor={cursor}")),
        query: term,
    };
    Ok(render_template_response(template, StatusCode::OK))
}

async fn onboarding(
    State(state): State<HttpState>,
    SignedIn(principal): SignedIn,
) -> Response {
    let form = principal
        .user
        .as_ref()
        .map(OnboardingForm::from)
        .unwrap_or_default();
    let template = OnboardingTemplate {
        layout: layout(&state, "Profile", principal.user.as_ref()).await,
        form,
        error: None,
    };
    render_template_response(template, StatusCode::OK)
}

async fn save_onboarding(
    State(state): State<HttpState>,
    SignedIn(principal): SignedIn,
    Form(form): Form<ProfileForm>,
) -> Result<Response, HttpError> {
    let image = Some(form.image.trim().to_string()).filter(|value| !value.is_empty());
    let command = UpdateProfileCommand {
        username: form.username.clone(),
        name: form.name.clone(),
        bio: form.bio.clone(),
        image,
    };
    let message = match state
        .users
        .update_profile(&principal.external_id, command)
        .await
    {
        Ok(_) => return Ok(Redirect::to("/").into_response()),
        Err(UserError::UsernameTaken) => "That username is already taken.".to_string(),
        Err(UserError::Domain(err)) => err.to_string(),
        Err(err) => return Err(err.into()),
    };

    let template = OnboardingTemplate {
        layout: LayoutView::new("Profile", principal.user.as_ref()),
        form: OnboardingForm {
            username: form.username,
            name: form.name,
            bio: form.bio,
            image: form.image,
        },
        error: Some(message),
    };
    Ok(render_template_response(
        template,
        StatusCode::UNPROCESSABLE_ENTITY,
    ))
}

async fn read_notification(
    State(state): State<HttpState>,
    Member(user): Member,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    state.notifications.mark_read(user.id, id).await?;
    let fallback = format!("/profile/{}?tab=notifications", user.username);
    Ok(back_to(&headers, &fallback).into_response())
}

async fn read_all_notifications(
    State(state): State<HttpState>,
    Member(user): Member,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    state.notifications.mark_all_read(user.id).await?;
    let fallback = format!("/profile/{}?tab=notifications", user.username);
    Ok(back_to(&headers, &fallback).into_response())
}

async fn not_found(State(state): State<HttpState>, viewer: Viewer) -> Response {
    page_not_found(&state, viewer.user(), "Page").await
}

async fn public_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.db.health_check().await)
}

async fn serve_upload(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_upload";

    match state.uploads.read(&path).await {
        Ok((bytes, mime)) => upload_response(bytes, mime.as_ref()),
        Err(UploadStorageError::InvalidPath) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Upload not found",
            "The requested upload path is invalid",
        )
        .into_response(),
        Err(UploadStorageError::Io(err)) if err.kind() == ErrorKind::NotFound => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Upload not found",
            "The requested upload is not available",
        )
        .into_response(),
        Err(err) => {
            error!(
                target = "threadline::http::public::uploads",
                path = %path,
                error = %err,
                "failed to read stored upload"
            );
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read uploaded file",
                err.to_string(),
            )
            .into_response()
        }
    }
}

fn upload_response(bytes: Bytes, content_type: &str) -> Response {
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}
