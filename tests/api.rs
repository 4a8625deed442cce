mod common;

use axum::extract::{Extension, Json, Path, State};
use axum::http::{Method, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use common::{build_state, token_for};
use threadline::application::identity::Principal;
use threadline::domain::types::{RealtimeChannel, RealtimeEventKind};
use threadline::infra::http::api::handlers;
use threadline::infra::http::api::models::ThreadWriteRequest;

#[sqlx::test(migrations = "./migrations")]
async fn api_rejects_requests_without_session(pool: PgPool) {
    let app = build_state(pool, 100);

    let (status, body) = app.send(Method::GET, "/api/v1/threads", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = app
        .send(Method::GET, "/api/v1/threads", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "./migrations")]
async fn writes_require_a_finished_profile(pool: PgPool) {
    let app = build_state(pool, 100);
    let token = token_for("idp|newcomer");

    let (status, body) = app.send(Method::GET, "/api/v1/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["external_id"], "idp|newcomer");
    assert!(body["profile"].is_null());

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/threads",
            Some(&token),
            Some(json!({ "text": "hello" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "not_onboarded");
}

#[sqlx::test(migrations = "./migrations")]
async fn usernames_are_unique(pool: PgPool) {
    let app = build_state(pool, 100);
    app.onboard("idp|alice", "alice").await;

    let (status, body) = app
        .send(
            Method::PUT,
            "/api/v1/me",
            Some(&token_for("idp|impostor")),
            Some(json!({ "username": "Alice", "name": "Not Alice" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "username_taken");
}

#[sqlx::test(migrations = "./migrations")]
async fn mentions_notify_tagged_users(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;
    let bob = app.onboard("idp|bob", "bob").await;

    let (status, thread) = app
        .send(
            Method::POST,
            "/api/v1/threads",
            Some(&alice),
            Some(json!({ "text": "morning @bob and @nobody" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{thread}");
    assert_eq!(thread["tags"].as_array().map(Vec::len), Some(1));

    let (status, count) = app
        .send(
            Method::GET,
            "/api/v1/notifications/unread-count",
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(count["count"], 1);

    let (_, items) = app
        .send(Method::GET, "/api/v1/notifications", Some(&bob), None)
        .await;
    let items = items.as_array().cloned().unwrap_or_default();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["kind"], "mention");
    assert_eq!(items[0]["sender"]["username"], "alice");
    assert_eq!(items[0]["thread"]["id"], thread["id"]);

    let (status, updated) = app
        .send(
            Method::POST,
            "/api/v1/notifications/read-all",
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["updated"], 1);

    let (_, count) = app
        .send(
            Method::GET,
            "/api/v1/notifications/unread-count",
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(count["count"], 0);

    let (_, tagged) = app
        .send(
            Method::GET,
            &format!("/api/v1/tagged?userId={}", thread["tags"][0].as_str().unwrap()),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(tagged.as_array().map(Vec::len), Some(1));
}

#[sqlx::test(migrations = "./migrations")]
async fn like_toggle_publishes_and_deduplicates_notifications(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;
    let bob = app.onboard("idp|bob", "bob").await;

    let (_, thread) = app
        .send(
            Method::POST,
            "/api/v1/threads",
            Some(&alice),
            Some(json!({ "text": "like me" })),
        )
        .await;
    let thread_id = thread["id"].as_str().unwrap().to_string();
    let like_uri = format!("/api/v1/threads/{thread_id}/like");

    let mut events = app.state.realtime.subscribe();

    let (status, liked) = app.send(Method::POST, &like_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(liked["liked"], true);
    assert_eq!(liked["like_count"], 1);

    let event = events.recv().await.expect("like event");
    assert_eq!(event.channel, RealtimeChannel::ThreadLikes);
    assert_eq!(event.event, RealtimeEventKind::LikeAdded);
    assert_eq!(event.payload["likes"], 1);

    let (_, unliked) = app.send(Method::POST, &like_uri, Some(&bob), None).await;
    assert_eq!(unliked["liked"], false);
    assert_eq!(unliked["like_count"], 0);

    let (_, liked_again) = app.send(Method::POST, &like_uri, Some(&bob), None).await;
    assert_eq!(liked_again["liked"], true);

    let (_, items) = app
        .send(Method::GET, "/api/v1/notifications", Some(&alice), None)
        .await;
    let likes = items
        .as_array()
        .map(|items| items.iter().filter(|item| item["kind"] == "like").count());
    assert_eq!(likes, Some(1));

    let (_, likers) = app
        .send(
            Method::GET,
            &format!("/api/v1/threads/{thread_id}/likes"),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(likers["items"][0]["username"], "bob");
}

#[sqlx::test(migrations = "./migrations")]
async fn replies_nest_and_deleting_removes_the_tree(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;
    let bob = app.onboard("idp|bob", "bob").await;

    let (_, root) = app
        .send(
            Method::POST,
            "/api/v1/threads",
            Some(&alice),
            Some(json!({ "text": "root" })),
        )
        .await;
    let root_id = root["id"].as_str().unwrap().to_string();

    let (status, reply) = app
        .send(
            Method::POST,
            &format!("/api/v1/threads/{root_id}/comments"),
            Some(&bob),
            Some(json!({ "text": "reply" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let reply_id = reply["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/v1/threads/{reply_id}/comments"),
            Some(&alice),
            Some(json!({ "text": "nested" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, node) = app
        .send(
            Method::GET,
            &format!("/api/v1/threads/{root_id}"),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(node["replies"][0]["text"], "reply");
    assert_eq!(node["replies"][0]["replies"][0]["text"], "nested");

    let (status, body) = app
        .send(
            Method::DELETE,
            &format!("/api/v1/threads/{root_id}"),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (status, deleted) = app
        .send(
            Method::DELETE,
            &format!("/api/v1/threads/{root_id}"),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], 3);

    let (status, _) = app
        .send(
            Method::GET,
            &format!("/api/v1/threads/{reply_id}"),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, count) = app
        .send(
            Method::GET,
            "/api/v1/notifications/unread-count",
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(count["count"], 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn feed_pages_with_cursor(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;

    for index in 0..3 {
        let (status, _) = app
            .send(
                Method::POST,
                "/api/v1/threads",
                Some(&alice),
                Some(json!({ "text": format!("post {index}") })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, first) = app
        .send(Method::GET, "/api/v1/threads?limit=2", Some(&alice), None)
        .await;
    assert_eq!(first["items"].as_array().map(Vec::len), Some(2));
    assert_eq!(first["items"][0]["text"], "post 2");
    let cursor = first["next_cursor"].as_str().expect("next cursor").to_string();

    let (_, second) = app
        .send(
            Method::GET,
            &format!("/api/v1/threads?limit=2&cursor={cursor}"),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(second["items"].as_array().map(Vec::len), Some(1));
    assert!(second["next_cursor"].is_null());

    let (status, body) = app
        .send(
            Method::GET,
            "/api/v1/threads?cursor=garbage",
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_cursor");
}

#[sqlx::test(migrations = "./migrations")]
async fn activity_requires_a_valid_user_id(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;

    let (status, _) = app
        .send(Method::GET, "/api/v1/activity", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::GET,
            &format!("/api/v1/activity?userId={}", Uuid::new_v4()),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, me) = app.send(Method::GET, "/api/v1/me", Some(&alice), None).await;
    let user_id = me["profile"]["id"].as_str().unwrap().to_string();
    app.send(
        Method::POST,
        "/api/v1/threads",
        Some(&alice),
        Some(json!({ "text": "first" })),
    )
    .await;

    let (status, activity) = app
        .send(
            Method::GET,
            &format!("/api/v1/activity?userId={user_id}"),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activity[0]["kind"], "created_thread");
}

#[sqlx::test(migrations = "./migrations")]
async fn rate_limit_applies_per_caller(pool: PgPool) {
    let app = build_state(pool, 2);
    let alice = token_for("idp|alice");
    let bob = token_for("idp|bob");

    for _ in 0..2 {
        let (status, _) = app.send(Method::GET, "/api/v1/me", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = app.send(Method::GET, "/api/v1/me", Some(&alice), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");

    let (status, _) = app.send(Method::GET, "/api/v1/me", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[sqlx::test(migrations = "./migrations")]
async fn realtime_publish_validates_channel(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/realtime/comments",
            Some(&alice),
            Some(json!({ "channel": "gossip", "event": "comment-added", "data": {} })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/realtime/comments",
            Some(&alice),
            Some(json!({ "channel": "thread-comments" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn handlers_can_be_called_directly(pool: PgPool) {
    let app = build_state(pool, 100);
    app.onboard("idp|alice", "alice").await;
    let user = app
        .state
        .users
        .fetch_user("idp|alice")
        .await
        .expect("fetch user")
        .expect("alice exists");
    let principal = Principal {
        external_id: "idp|alice".to_string(),
        user: Some(user),
    };

    let response = handlers::create_thread(
        State(app.state.clone()),
        Extension(principal.clone()),
        Json(ThreadWriteRequest {
            text: "via handler".into(),
            image_url: None,
        }),
    )
    .await
    .expect("create thread via handler")
    .into_response();
    assert_eq!(response.status(), StatusCode::CREATED);

    let threads = app
        .state
        .threads
        .list_user_threads(principal.user.as_ref().unwrap().id)
        .await
        .expect("list threads");
    assert_eq!(threads.len(), 1);

    let missing = handlers::toggle_like(
        State(app.state.clone()),
        Extension(principal),
        Path(Uuid::new_v4()),
    )
    .await;
    assert!(matches!(missing, Err(err) if err.status() == StatusCode::NOT_FOUND));
}

#[sqlx::test(migrations = "./migrations")]
async fn only_the_author_can_tag_a_thread(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;
    let bob = app.onboard("idp|bob", "bob").await;
    let (_, me) = app.send(Method::GET, "/api/v1/me", Some(&bob), None).await;
    let bob_id = me["profile"]["id"].clone();

    let (_, thread) = app
        .send(
            Method::POST,
            "/api/v1/threads",
            Some(&alice),
            Some(json!({ "text": "no mentions here" })),
        )
        .await;
    let uri = format!("/api/v1/threads/{}/tags", thread["id"].as_str().unwrap());

    let (status, body) = app
        .send(
            Method::POST,
            &uri,
            Some(&bob),
            Some(json!({ "user_ids": [bob_id] })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, tagged) = app
        .send(
            Method::POST,
            &uri,
            Some(&alice),
            Some(json!({ "user_ids": [bob_id] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{tagged}");
    assert_eq!(tagged["tags"], json!([bob_id]));

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/v1/threads/{}/tags", Uuid::new_v4()),
            Some(&alice),
            Some(json!({ "user_ids": [bob_id] })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn received_replies_lists_comments_from_others(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;
    let bob = app.onboard("idp|bob", "bob").await;

    let (_, root) = app
        .send(
            Method::POST,
            "/api/v1/threads",
            Some(&alice),
            Some(json!({ "text": "thoughts?" })),
        )
        .await;
    let comments = format!("/api/v1/threads/{}/comments", root["id"].as_str().unwrap());
    app.send(
        Method::POST,
        &comments,
        Some(&alice),
        Some(json!({ "text": "bump" })),
    )
    .await;
    let (status, _) = app
        .send(
            Method::POST,
            &comments,
            Some(&bob),
            Some(json!({ "text": "agreed" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, received) = app
        .send(
            Method::GET,
            "/api/v1/users/alice/received-replies",
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let received = received.as_array().cloned().unwrap_or_default();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["text"], "agreed");
    assert_eq!(received[0]["author"]["username"], "bob");

    let (_, none) = app
        .send(
            Method::GET,
            "/api/v1/users/bob/received-replies",
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(none, json!([]));

    let (status, _) = app
        .send(
            Method::GET,
            "/api/v1/users/nobody/received-replies",
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// 1x1 transparent PNG.
const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[sqlx::test(migrations = "./migrations")]
async fn uploads_store_images_and_serve_them_inert(pool: PgPool) {
    let app = build_state(pool, 100);
    let alice = app.onboard("idp|alice", "alice").await;

    let (status, stored) = app.upload(&alice, "pixel.png", "image/png", PIXEL_PNG).await;
    assert_eq!(status, StatusCode::CREATED, "{stored}");
    assert_eq!(stored["content_type"], "image/png");
    assert_eq!(stored["width"], 1);
    let url = stored["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/uploads/") && url.ends_with("-pixel.png"));

    let (status, headers, bytes) = app.raw(&url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(bytes, PIXEL_PNG);

    let (status, thread) = app
        .send(
            Method::POST,
            "/api/v1/threads",
            Some(&alice),
            Some(json!({ "text": "look", "image_url": url })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{thread}");
    let (status, cleared) = app
        .send(
            Method::DELETE,
            &format!("/api/v1/threads/{}/image", thread["id"].as_str().unwrap()),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(cleared["image_url"].is_null());
    let (status, _, _) = app.raw(&url).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let script = b"<script>alert(document.cookie)</script>";
    let (status, stored) = app.upload(&alice, "evil.html", "image/png", script).await;
    assert_eq!(status, StatusCode::CREATED, "{stored}");
    let url = stored["url"].as_str().unwrap().to_string();
    assert!(url.ends_with("-evil.png"), "{url}");
    let (_, headers, _) = app.raw(&url).await;
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");

    let svg = b"<svg xmlns=\"http://www.w3.org/2000/svg\" onload=\"alert(1)\"/>";
    let (status, body) = app.upload(&alice, "x.svg", "image/svg+xml", svg).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"]["code"], "unsupported_media");

    let (status, _) = app.upload(&alice, "notes.txt", "text/plain", b"hi").await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let newcomer = token_for("idp|newcomer");
    let (status, _) = app.upload(&newcomer, "pixel.png", "image/png", PIXEL_PNG).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
async fn user_search_treats_wildcards_literally(pool: PgPool) {
    let app = build_state(pool, 100);
    app.onboard("idp|ab", "a_b").await;
    app.onboard("idp|axb", "axb").await;
    let carol = app.onboard("idp|carol", "carol").await;

    let (status, page) = app
        .send(Method::GET, "/api/v1/users?search=a_b", Some(&carol), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = page["items"]
        .as_array()
        .map(|items| items.iter().filter_map(|u| u["username"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["a_b"]);

    let (_, page) = app
        .send(Method::GET, "/api/v1/users?search=%25", Some(&carol), None)
        .await;
    assert_eq!(page["items"], json!([]));

    let (_, suggestions) = app
        .send(
            Method::GET,
            "/api/v1/users/search?query=a_",
            Some(&carol),
            None,
        )
        .await;
    assert_eq!(suggestions["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(suggestions["items"][0]["username"], "a_b");
}
