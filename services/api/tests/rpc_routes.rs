//! The HTTP surface driven through `tower::ServiceExt::oneshot`.

mod common;

use api_lib::config::{Config, StorageBackend};
use api_lib::web::{router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app() -> Router {
    let config = Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        storage: StorageBackend::Memory,
        log_level: tracing::Level::INFO,
        db_max_connections: 1,
        session_lifetime: chrono::Duration::hours(1),
        session_sweep_interval: Duration::from_secs(3600),
        cors_origin: "http://localhost:3000".to_string(),
        message_page_limit: 100,
    };
    router(Arc::new(AppState::new(common::broker(), Arc::new(config))))
}

async fn call(app: &Router, method: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(format!("/rpc/{method}"))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn register(app: &Router, username: &str) -> (String, String) {
    let (status, body) = call(
        app,
        "Register",
        None,
        json!({ "username": username, "password": common::PASSWORD, "deviceInfo": "test" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (
        body["data"]["sessionToken"].as_str().unwrap().to_string(),
        body["data"]["userId"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn health_answers_with_an_envelope() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn register_returns_a_session_token() {
    let app = app();
    let (status, body) = call(
        &app,
        "Register",
        None,
        json!({ "username": "alice", "password": common::PASSWORD }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["username"], "alice");
    assert!(body["data"]["sessionToken"].as_str().unwrap().len() >= 43);
}

#[tokio::test]
async fn protected_methods_need_a_bearer_token() {
    let app = app();
    let (status, body) = call(&app, "GetAccessibleRooms", None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert!(body.get("data").is_none());

    let (status, _) = call(&app, "GetAccessibleRooms", Some("not-a-token"), json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bodies_fail_inside_the_envelope() {
    let app = app();
    let (token, _) = register(&app, "alice").await;

    let (status, body) = call(&app, "SendMessage", Some(&token), json!({ "content": "hi" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().starts_with("Invalid request body"));
}

#[tokio::test]
async fn global_room_messages_round_trip_over_rpc() {
    let app = app();
    let (token, user_id) = register(&app, "alice").await;

    let (_, rooms) = call(&app, "GetAccessibleRooms", Some(&token), json!({})).await;
    let global = rooms["data"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(rooms["data"][0]["type"], "global");

    let (status, sent) = call(
        &app,
        "SendMessage",
        Some(&token),
        json!({ "roomId": global, "content": "M", "clientMessageId": "tmp-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["data"]["senderUserId"], user_id.as_str());
    let message_id = sent["data"]["id"].as_i64().unwrap();

    let (_, deleted) = call(&app, "DeleteMessage", Some(&token), json!({ "messageId": message_id })).await;
    assert_eq!(deleted["success"], true);

    let (_, page) = call(&app, "GetMessages", Some(&token), json!({ "roomId": global, "limit": 20 })).await;
    assert_eq!(page["data"], json!([]));

    let (status, again) = call(&app, "DeleteMessage", Some(&token), json!({ "messageId": message_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(again["success"], false);
}

#[tokio::test]
async fn forbidden_and_not_found_map_to_their_statuses() {
    let app = app();
    let (alice, _) = register(&app, "alice").await;
    let (eve, _) = register(&app, "eve").await;

    let (_, created) = call(
        &app,
        "CreateRoom",
        Some(&alice),
        json!({ "type": "Group", "name": "Team" }),
    )
    .await;
    let room_id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "GetMessages", Some(&eve), json!({ "roomId": room_id })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, _) = call(
        &app,
        "JoinRoom",
        Some(&eve),
        json!({ "roomId": uuid::Uuid::new_v4() }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_invalidates_the_token() {
    let app = app();
    let (token, _) = register(&app, "alice").await;

    let (status, body) = call(&app, "Logout", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (status, _) = call(&app, "GetActiveSessions", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
