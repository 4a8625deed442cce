use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{
        activity::ActivityError, notifications::NotificationError, threads::ThreadError,
        users::UserError,
    },
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic attached to error responses and consumed by the response logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Plain-text error for the HTML surface.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

fn domain_status(error: &DomainError) -> (StatusCode, &'static str) {
    match error {
        DomainError::Validation { .. } => (StatusCode::BAD_REQUEST, "Invalid input"),
    }
}

impl From<ThreadError> for HttpError {
    fn from(error: ThreadError) -> Self {
        const SOURCE: &str = "application::error::thread_error_to_http";
        let (status, message) = match &error {
            ThreadError::Domain(inner) => domain_status(inner),
            ThreadError::NotFound => (StatusCode::NOT_FOUND, "Thread not found"),
            ThreadError::Forbidden => (StatusCode::FORBIDDEN, "Not the author of this thread"),
            ThreadError::Pagination(_) => (StatusCode::BAD_REQUEST, "Invalid cursor"),
            ThreadError::Repo(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        HttpError::from_error(SOURCE, status, message, &error)
    }
}

impl From<UserError> for HttpError {
    fn from(error: UserError) -> Self {
        const SOURCE: &str = "application::error::user_error_to_http";
        let (status, message) = match &error {
            UserError::Domain(inner) => domain_status(inner),
            UserError::UsernameTaken => (StatusCode::CONFLICT, "Username already taken"),
            UserError::NotFound => (StatusCode::NOT_FOUND, "User not found"),
            UserError::Pagination(_) => (StatusCode::BAD_REQUEST, "Invalid cursor"),
            UserError::Repo(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        HttpError::from_error(SOURCE, status, message, &error)
    }
}

impl From<NotificationError> for HttpError {
    fn from(error: NotificationError) -> Self {
        const SOURCE: &str = "application::error::notification_error_to_http";
        let (status, message) = match &error {
            NotificationError::NotFound => (StatusCode::NOT_FOUND, "Notification not found"),
            NotificationError::Forbidden => {
                (StatusCode::FORBIDDEN, "Notification belongs to another user")
            }
            NotificationError::Repo(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        HttpError::from_error(SOURCE, status, message, &error)
    }
}

impl From<ActivityError> for HttpError {
    fn from(error: ActivityError) -> Self {
        HttpError::from_error(
            "application::error::activity_error_to_http",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            &error,
        )
    }
}

/// Top-level error for the binary's commands.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(inner) => domain_status(inner).0,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Infra(InfraError::Database { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(inner) => domain_status(inner).1,
            AppError::Validation(_) => "Request could not be processed",
            AppError::Infra(InfraError::Database { .. }) => "Service temporarily unavailable",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Migration(_)) => "Database schema could not be prepared",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}
