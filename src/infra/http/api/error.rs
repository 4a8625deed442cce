use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::{
    activity::ActivityError, error::ErrorReport, identity::AuthError,
    notifications::NotificationError, threads::ThreadError, users::UserError,
};
use crate::domain::error::DomainError;
use crate::infra::uploads::UploadStorageError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const SESSION_EXPIRED: &str = "session_expired";
    pub const NOT_ONBOARDED: &str = "not_onboarded";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const USERNAME_TAKEN: &str = "username_taken";
    pub const INVALID_CURSOR: &str = "invalid_cursor";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const UNSUPPORTED_MEDIA: &str = "unsupported_media";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const REPO: &str = "repo_error";
    pub const UPLOAD: &str = "upload_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Session token required",
            None,
        )
    }

    pub fn not_onboarded() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            codes::NOT_ONBOARDED,
            "Complete onboarding first",
            Some("PUT /api/v1/me with a username and name".to_string()),
        )
    }

    pub fn forbidden(message: &'static str) -> Self {
        Self::new(StatusCode::FORBIDDEN, codes::FORBIDDEN, message, None)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn internal(code: &'static str, detail: impl ToString) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            code,
            "Internal server error",
            Some(detail.to_string()),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn rate_limited(retry_after: u64) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: codes::RATE_LIMITED.to_string(),
                message: "Rate limit exceeded".to_string(),
                hint: Some(format!("Retry after {retry_after} seconds")),
            },
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after={retry_after}"),
        )
        .attach(&mut response);
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = format!(
            "{}: {}",
            self.code,
            self.hint.as_deref().unwrap_or(self.message)
        );
        // Internal details go to the log, never to the client.
        let hint = if self.status.is_server_error() {
            None
        } else {
            self.hint
        };
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message("infra::http::api", self.status, detail).attach(&mut response);
        response
    }
}

fn domain_to_api(err: &DomainError) -> ApiError {
    match err {
        DomainError::Validation { .. } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid input",
            Some(err.to_string()),
        ),
    }
}

fn invalid_cursor(err: impl ToString) -> ApiError {
    ApiError::new(
        StatusCode::BAD_REQUEST,
        codes::INVALID_CURSOR,
        "Invalid cursor",
        Some(err.to_string()),
    )
}

impl From<ThreadError> for ApiError {
    fn from(err: ThreadError) -> Self {
        match err {
            ThreadError::Domain(inner) => domain_to_api(&inner),
            ThreadError::NotFound => ApiError::not_found("Thread not found"),
            ThreadError::Forbidden => ApiError::forbidden("Only the author can change this thread"),
            ThreadError::Pagination(inner) => invalid_cursor(inner),
            ThreadError::Repo(inner) => ApiError::internal(codes::REPO, inner),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Domain(inner) => domain_to_api(&inner),
            UserError::UsernameTaken => ApiError::new(
                StatusCode::CONFLICT,
                codes::USERNAME_TAKEN,
                "Username already taken",
                None,
            ),
            UserError::NotFound => ApiError::not_found("User not found"),
            UserError::Pagination(inner) => invalid_cursor(inner),
            UserError::Repo(inner) => ApiError::internal(codes::REPO, inner),
        }
    }
}

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::NotFound => ApiError::not_found("Notification not found"),
            NotificationError::Forbidden => {
                ApiError::forbidden("Notification belongs to another user")
            }
            NotificationError::Repo(inner) => ApiError::internal(codes::REPO, inner),
        }
    }
}

impl From<ActivityError> for ApiError {
    fn from(err: ActivityError) -> Self {
        ApiError::internal(codes::REPO, err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing | AuthError::Invalid => ApiError::unauthorized(),
            AuthError::Expired => ApiError::new(
                StatusCode::UNAUTHORIZED,
                codes::SESSION_EXPIRED,
                "Session expired",
                None,
            ),
            AuthError::NotOnboarded => ApiError::not_onboarded(),
            AuthError::User(inner) => inner.into(),
        }
    }
}

impl From<UploadStorageError> for ApiError {
    fn from(err: UploadStorageError) -> Self {
        match err {
            UploadStorageError::UnsupportedType(kind) => ApiError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                codes::UNSUPPORTED_MEDIA,
                "Only image uploads are accepted",
                Some(kind),
            ),
            UploadStorageError::PayloadTooLarge { limit } => ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                codes::PAYLOAD_TOO_LARGE,
                "Upload too large",
                Some(format!("limit is {limit} bytes")),
            ),
            UploadStorageError::EmptyPayload => ApiError::bad_request("Upload is empty", None),
            UploadStorageError::PayloadStream { source } => {
                ApiError::bad_request("Failed to read upload", Some(source.to_string()))
            }
            UploadStorageError::InvalidPath => ApiError::not_found("Upload not found"),
            UploadStorageError::Io(inner) => ApiError::internal(codes::UPLOAD, inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::RepoError;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn renders_error_envelope_with_hint() {
        let response = ApiError::from(UserError::UsernameTaken).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "username_taken");
        assert!(body["error"].get("hint").is_none());
    }

    #[tokio::test]
    async fn hides_internal_detail_from_clients() {
        let err = ThreadError::Repo(RepoError::from_persistence("connection reset"));
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .cloned()
            .expect("report attached");
        assert!(report.messages[0].contains("connection reset"));
        let body = body_json(response).await;
        assert!(body["error"].get("hint").is_none());
    }

    #[test]
    fn auth_errors_map_to_401_and_403() {
        assert_eq!(
            ApiError::from(AuthError::Missing).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::Expired).code(),
            codes::SESSION_EXPIRED
        );
        assert_eq!(
            ApiError::from(AuthError::NotOnboarded).status(),
            StatusCode::FORBIDDEN
        );
    }
}
