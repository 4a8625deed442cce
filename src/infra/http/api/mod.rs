pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod rate_limit;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post},
};

use crate::infra::http::HttpState;

/// Multipart framing allowance on top of the configured file limit.
const MULTIPART_OVERHEAD_BYTES: u64 = 16 * 1024;

/// `/api/v1`: every route needs a session and counts against the caller's budget.
pub fn routes(state: HttpState) -> Router<HttpState> {
    let upload_limit = state
        .uploads
        .max_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);

    let v1 = Router::new()
        .route(
            "/threads",
            get(handlers::list_feed).post(handlers::create_thread),
        )
        .route(
            "/threads/{id}",
            get(handlers::get_thread)
                .patch(handlers::update_thread)
                .delete(handlers::delete_thread),
        )
        .route("/threads/{id}/comments", post(handlers::add_comment))
        .route("/threads/{id}/like", post(handlers::toggle_like))
        .route("/threads/{id}/image", delete(handlers::remove_image))
        .route("/threads/{id}/likes", get(handlers::list_likers))
        .route("/threads/{id}/tags", post(handlers::tag_users))
        .route("/users", get(handlers::search_users))
        .route("/users/search", get(handlers::autocomplete_users))
        .route("/users/{username}", get(handlers::get_user))
        .route("/users/{username}/threads", get(handlers::user_threads))
        .route("/users/{username}/replies", get(handlers::user_replies))
        .route(
            "/users/{username}/received-replies",
            get(handlers::received_replies),
        )
        .route("/me", get(handlers::get_me).put(handlers::put_me))
        .route("/tagged", get(handlers::tagged_threads))
        .route("/activity", get(handlers::user_activity))
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/unread-count",
            get(handlers::unread_count),
        )
        .route(
            "/notifications/read-all",
            post(handlers::mark_all_notifications_read),
        )
        .route(
            "/notifications/{id}/read",
            post(handlers::mark_notification_read),
        )
        .route("/realtime", get(handlers::realtime_stream))
        .route(
            "/realtime/comments",
            post(handlers::publish_comment_event),
        )
        .route(
            "/uploads",
            post(handlers::upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::api_rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::api_auth,
        ));

    Router::new().nest("/api/v1", v1)
}
