//! Session token lookup and the page-side caller extractors.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::{
    application::{
        error::HttpError,
        identity::{AuthError, Principal},
    },
    domain::entities::UserRecord,
};

use super::HttpState;

pub const SESSION_COOKIE_DEFAULT: &str = "__session";

/// Bearer header first, then the session cookie.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// The verified caller, if any. Bad or expired tokens read as anonymous.
pub struct Viewer(pub Option<Principal>);

impl Viewer {
    pub fn user(&self) -> Option<&UserRecord> {
        self.0.as_ref().and_then(|principal| principal.onboarded().ok())
    }
}

impl FromRequestParts<HttpState> for Viewer {
    type Rejection = HttpError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers, &state.session_cookie);
        match state.auth.resolve(token.as_deref()).await {
            Ok(principal) => Ok(Self(Some(principal))),
            Err(AuthError::User(err)) => Err(err.into()),
            Err(err) => {
                if token.is_some() {
                    debug!(
                        target = "threadline::http::auth",
                        error = %err,
                        "treating request as anonymous"
                    );
                }
                Ok(Self(None))
            }
        }
    }
}

/// A verified caller who has not necessarily finished onboarding.
pub struct SignedIn(pub Principal);

impl FromRequestParts<HttpState> for SignedIn {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpState,
    ) -> Result<Self, Self::Rejection> {
        match Viewer::from_request_parts(parts, state).await {
            Ok(Viewer(Some(principal))) => Ok(Self(principal)),
            Ok(Viewer(None)) => Err(sign_in_required()),
            Err(err) => Err(err.into_response()),
        }
    }
}

/// An onboarded user. Callers without a profile are sent to onboarding.
pub struct Member(pub UserRecord);

impl FromRequestParts<HttpState> for Member {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpState,
    ) -> Result<Self, Self::Rejection> {
        let SignedIn(principal) = SignedIn::from_request_parts(parts, state).await?;
        match principal.onboarded() {
            Ok(user) => Ok(Self(user.clone())),
            Err(_) => Err(Redirect::to("/onboarding").into_response()),
        }
    }
}

fn sign_in_required() -> Response {
    HttpError::new(
        "infra::http::auth::sign_in_required",
        StatusCode::UNAUTHORIZED,
        "Sign in required",
        "no valid session token",
    )
    .into_response()
}
