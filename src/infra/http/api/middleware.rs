use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::application::identity::Principal;
use crate::infra::http::{HttpState, middleware::CallerTag, session_token};

use super::error::ApiError;

/// Resolve the session token into a `Principal` extension; 401 without one.
pub async fn api_auth(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = session_token(request.headers(), &state.session_cookie);
    let principal = match state.auth.resolve(token.as_deref()).await {
        Ok(principal) => principal,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let caller = principal.external_id.clone();
    request.extensions_mut().insert(principal);

    let mut response = next.run(request).await;
    response.extensions_mut().insert(CallerTag(caller));
    response
}

/// Per-caller request budget. Runs inside `api_auth`.
pub async fn api_rate_limit(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(principal) = request.extensions().get::<Principal>() else {
        warn!(
            target = "threadline::http::api::ratelimit",
            "missing principal in rate limit middleware"
        );
        return ApiError::unauthorized().into_response();
    };

    if !state.rate_limiter.allow(&principal.external_id) {
        return ApiError::rate_limited(state.rate_limiter.retry_after_secs());
    }

    next.run(request).await
}
