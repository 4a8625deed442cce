pub mod api;
mod auth;
mod middleware;
mod public;

pub use api::rate_limit::ApiRateLimiter;
pub use auth::{SESSION_COOKIE_DEFAULT, session_token};
pub use middleware::{RequestContext, log_responses, set_request_context};

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
};
use sqlx::Error as SqlxError;

use crate::{
    application::{
        activity::ActivityService, error::ErrorReport, identity::AuthService,
        notifications::NotificationService, realtime::RealtimeHub, threads::ThreadService,
        users::UserService,
    },
    infra::{db::PostgresRepositories, uploads::UploadStorage},
};

const DATASTAR_REQUEST_HEADER: &str = "datastar-request";

/// Everything a handler can reach.
#[derive(Clone)]
pub struct HttpState {
    pub threads: Arc<ThreadService>,
    pub users: Arc<UserService>,
    pub notifications: Arc<NotificationService>,
    pub activity: Arc<ActivityService>,
    pub auth: Arc<AuthService>,
    pub realtime: RealtimeHub,
    pub uploads: Arc<UploadStorage>,
    pub db: Arc<PostgresRepositories>,
    pub rate_limiter: Arc<ApiRateLimiter>,
    pub session_cookie: Arc<str>,
    pub feed_page_size: u32,
}

/// Public pages and the JSON API behind the shared logging and request-id layers.
pub fn build_router(state: HttpState) -> Router {
    public::routes()
        .merge(api::routes(state.clone()))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
