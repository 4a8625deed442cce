#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use sqlx::PgPool;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;

use threadline::application::activity::ActivityService;
use threadline::application::identity::{AuthService, IdentityClaims, IdentityVerifier};
use threadline::application::notifications::NotificationService;
use threadline::application::realtime::RealtimeHub;
use threadline::application::repos::{
    LikesRepo, LikesWriteRepo, NotificationsRepo, NotificationsWriteRepo, ThreadsRepo,
    ThreadsWriteRepo, UsersRepo, UsersWriteRepo,
};
use threadline::application::threads::ThreadService;
use threadline::application::users::UserService;
use threadline::infra::db::PostgresRepositories;
use threadline::infra::http::{ApiRateLimiter, HttpState, SESSION_COOKIE_DEFAULT, build_router};
use threadline::infra::uploads::UploadStorage;

pub const SECRET: &str = "integration-secret";

pub struct TestApp {
    pub state: HttpState,
    pub router: Router,
    _uploads: TempDir,
}

pub fn build_state(pool: PgPool, max_requests: u32) -> TestApp {
    let repositories = Arc::new(PostgresRepositories::new(pool));
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let users_write_repo: Arc<dyn UsersWriteRepo> = repositories.clone();
    let threads_repo: Arc<dyn ThreadsRepo> = repositories.clone();
    let threads_write_repo: Arc<dyn ThreadsWriteRepo> = repositories.clone();
    let likes_repo: Arc<dyn LikesRepo> = repositories.clone();
    let likes_write_repo: Arc<dyn LikesWriteRepo> = repositories.clone();
    let notifications_repo: Arc<dyn NotificationsRepo> = repositories.clone();
    let notifications_write_repo: Arc<dyn NotificationsWriteRepo> = repositories.clone();

    let users = Arc::new(UserService::new(users_repo, users_write_repo));
    let notifications = Arc::new(NotificationService::new(
        notifications_repo.clone(),
        notifications_write_repo,
        threads_repo.clone(),
        users.clone(),
    ));
    let realtime = RealtimeHub::new(16);
    let threads = Arc::new(ThreadService::new(
        threads_repo.clone(),
        threads_write_repo,
        likes_repo.clone(),
        likes_write_repo,
        users.clone(),
        notifications.clone(),
        realtime.clone(),
    ));
    let activity = Arc::new(ActivityService::new(
        threads_repo,
        likes_repo,
        notifications_repo,
        users.clone(),
    ));
    let verifier = IdentityVerifier::hs256(SECRET).expect("verifier");
    let auth = Arc::new(AuthService::new(Arc::new(verifier), users.clone()));

    let uploads_dir = tempfile::tempdir().expect("upload dir");
    let uploads = UploadStorage::new(uploads_dir.path().to_path_buf(), 1024 * 1024)
        .expect("upload storage");

    let state = HttpState {
        threads,
        users,
        notifications,
        activity,
        auth,
        realtime,
        uploads: Arc::new(uploads),
        db: repositories,
        rate_limiter: Arc::new(ApiRateLimiter::new(Duration::from_secs(60), max_requests)),
        session_cookie: Arc::from(SESSION_COOKIE_DEFAULT),
        feed_page_size: 20,
    };
    let router = build_router(state.clone());

    TestApp {
        state,
        router,
        _uploads: uploads_dir,
    }
}

pub fn token_for(sub: &str) -> String {
    let claims = IdentityClaims {
        sub: sub.to_string(),
        exp: (OffsetDateTime::now_utc().unix_timestamp() + 3600) as u64,
        iat: None,
        iss: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode token")
}

impl TestApp {
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn page(&self, uri: &str, cookie: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = cookie {
            builder = builder.header(
                header::COOKIE,
                format!("{SESSION_COOKIE_DEFAULT}={token}"),
            );
        }
        let response = self
            .router
            .clone()
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Posts a single `file` field as multipart form data.
    pub async fn upload(
        &self,
        token: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> (StatusCode, Value) {
        const BOUNDARY: &str = "threadline-test-boundary";
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/uploads")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Fetches `uri` anonymously, keeping the headers.
    pub async fn raw(&self, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, headers, bytes.to_vec())
    }

    /// Creates the profile for `sub` and returns its session token.
    pub async fn onboard(&self, sub: &str, username: &str) -> String {
        let token = token_for(sub);
        let (status, body) = self
            .send(
                Method::PUT,
                "/api/v1/me",
                Some(&token),
                Some(serde_json::json!({
                    "username": username,
                    "name": username,
                    "bio": "",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "onboard {username}: {body}");
        token
    }
}
