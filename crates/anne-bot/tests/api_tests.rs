//! API integration tests.

use anne_bot::codec::{self, ImageData};
use anne_bot::pipeline::ANALYSIS_FAILED;
use anne_bot::stream::{self, Frame};
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use urlencoding::encode;

mod common;
use common::{CHAT_REPLY, body_json, body_text, test_app, test_harness};

fn chat_request(session_id: &str, user_id: Option<&str>, messages: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/chat")
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-session-id", session_id);
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id);
    }
    builder
        .body(Body::from(
            serde_json::to_string(&json!({ "messages": messages })).unwrap(),
        ))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::DELETE)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn history(app: &Router, session_id: &str, user_id: &str) -> Vec<Value> {
    let uri = format!(
        "/chat?sessionId={}&userId={}",
        encode(session_id),
        encode(user_id)
    );
    let response = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    json["messages"].as_array().cloned().unwrap_or_default()
}

fn start_frame_id(body: &str) -> String {
    body.lines()
        .find_map(|line| match Frame::parse(line) {
            Some(Frame::Start { message_id }) => Some(message_id),
            _ => None,
        })
        .expect("start frame")
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app().await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_history_for_guest_is_empty() {
    let app = test_app().await;

    let response = app
        .oneshot(get("/chat?sessionId=guest-session-1-abcdefg"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "messages": [] }));
}

#[tokio::test]
async fn test_history_without_params_is_empty() {
    let app = test_app().await;

    let response = app.oneshot(get("/chat")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "messages": [] }));
}

#[tokio::test]
async fn test_text_message_streams_and_persists() {
    let app = test_app().await;
    let session = "session-u1-1700000000000-abcdefg";

    let response = app
        .clone()
        .oneshot(chat_request(
            session,
            Some("u1"),
            json!([{ "id": "m1", "role": "user", "content": "こんにちは" }]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(stream::STREAM_HEADER).unwrap(),
        "v1"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        stream::CONTENT_TYPE
    );

    let body = body_text(response).await;
    assert_eq!(stream::collect_text(&body), CHAT_REPLY);
    assert!(body.lines().last().unwrap().starts_with("d:"));
    let reply_id = start_frame_id(&body);

    let stored = history(&app, session, "u1").await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0]["id"], "m1");
    assert_eq!(stored[0]["role"], "user");
    assert_eq!(stored[1]["role"], "assistant");
    assert_eq!(stored[1]["content"], CHAT_REPLY);
    assert_eq!(stored[1]["id"], reply_id.as_str());
}

#[tokio::test]
async fn test_resent_history_is_not_duplicated() {
    let app = test_app().await;
    let session = "session-u1-1700000000000-abcdefg";

    let first = app
        .clone()
        .oneshot(chat_request(
            session,
            Some("u1"),
            json!([{ "id": "m1", "role": "user", "content": "一回目" }]),
        ))
        .await
        .unwrap();
    let reply_id = start_frame_id(&body_text(first).await);

    let second = app
        .clone()
        .oneshot(chat_request(
            session,
            Some("u1"),
            json!([
                { "id": "m1", "role": "user", "content": "一回目" },
                { "id": reply_id, "role": "assistant", "content": CHAT_REPLY },
                { "id": "m2", "role": "user", "content": "二回目" }
            ]),
        ))
        .await
        .unwrap();
    body_text(second).await;

    let stored = history(&app, session, "u1").await;
    let ids: Vec<&str> = stored.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(ids[0], "m1");
    assert_eq!(ids[1], reply_id);
    assert_eq!(ids[2], "m2");
}

#[tokio::test]
async fn test_guest_message_is_not_persisted() {
    let app = test_app().await;
    let session = "guest-session-1700000000000-abcdefg";

    let response = app
        .clone()
        .oneshot(chat_request(
            session,
            None,
            json!([{ "role": "user", "content": "hello" }]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(stream::collect_text(&body_text(response).await), CHAT_REPLY);

    // Even a user id cannot reach a guest-shaped thread.
    assert!(history(&app, session, "u1").await.is_empty());
}

#[tokio::test]
async fn test_other_user_cannot_read_thread() {
    let app = test_app().await;
    let session = "session-u1-1700000000000-abcdefg";

    let response = app
        .clone()
        .oneshot(chat_request(
            session,
            Some("u1"),
            json!([{ "role": "user", "content": "secret" }]),
        ))
        .await
        .unwrap();
    body_text(response).await;

    assert_eq!(history(&app, session, "u1").await.len(), 2);
    assert!(history(&app, session, "u2").await.is_empty());
}

#[tokio::test]
async fn test_malformed_chat_body_is_internal_error() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/chat")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Internal Server Error");
    assert!(json["details"].is_string());
}

#[tokio::test]
async fn test_empty_message_batch_is_internal_error() {
    let app = test_app().await;

    let response = app
        .oneshot(chat_request("session-u1-1-abcdefg", Some("u1"), json!([])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "Internal Server Error");
}

#[tokio::test]
async fn test_model_failure_is_internal_error() {
    let harness = test_harness().await;
    harness.chat.push_failure("quota exceeded");

    let response = harness
        .router
        .oneshot(chat_request(
            "session-u1-1-abcdefg",
            Some("u1"),
            json!([{ "role": "user", "content": "hi" }]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Internal Server Error");
    assert!(json["details"].as_str().unwrap().contains("quota exceeded"));
}

#[tokio::test]
async fn test_image_message_goes_through_pipeline() {
    let harness = test_harness().await;
    harness.chat.push_reply("わあ、茶トラの子だにゃ！");
    let app = harness.router.clone();
    let session = "session-u1-1700000000000-abcdefg";

    let image = ImageData::from_bytes("image/jpeg", vec![0xff, 0xd8, 0xff, 0xe0]);
    let content = codec::encode("この子を見て", &image);

    let response = app
        .clone()
        .oneshot(chat_request(
            session,
            Some("u1"),
            json!([{ "id": "img1", "role": "user", "content": content }]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert_eq!(stream::collect_text(&body), "わあ、茶トラの子だにゃ！");

    // The vision model saw the image, the persona only the analysis.
    let vision_requests = harness.vision.requests();
    assert_eq!(vision_requests.len(), 1);
    let chat_requests = harness.chat.requests();
    assert_eq!(chat_requests.len(), 1);
    let persona_input = chat_requests[0]
        .messages
        .last()
        .map(|m| m.plain_text())
        .unwrap_or_default();
    assert!(persona_input.contains("画像分析結果"));
    assert!(persona_input.contains("茶トラ"));
    assert!(!persona_input.contains("base64"));

    let stored = history(&app, session, "u1").await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0]["id"], "img1");
    assert!(
        stored[0]["content"]
            .as_str()
            .unwrap()
            .contains(codec::IMAGE_MARKER)
    );
    assert_eq!(stored[1]["content"], "わあ、茶トラの子だにゃ！");
}

#[tokio::test]
async fn test_image_pipeline_failure_returns_sentinel() {
    let harness = test_harness().await;
    harness.chat.push_failure("model unavailable");

    let image = ImageData::from_bytes("image/png", vec![0x89, 0x50, 0x4e, 0x47]);
    let response = harness
        .router
        .oneshot(chat_request(
            "guest-session-1-abcdefg",
            None,
            json!([{ "role": "user", "content": codec::encode("", &image) }]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        stream::collect_text(&body_text(response).await),
        ANALYSIS_FAILED
    );
}

#[tokio::test]
async fn test_undecodable_image_payload_stays_in_pipeline() {
    let harness = test_harness().await;
    harness.chat.push_reply("うまくみえないにゃ");

    let response = harness
        .router
        .oneshot(chat_request(
            "guest-session-1-abcdefg",
            None,
            json!([{ "role": "user", "content": "今の気分は？\n\n画像データ: data:image/png;base64,A" }]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        stream::collect_text(&body_text(response).await),
        "うまくみえないにゃ"
    );

    // The payload is never shown to either model.
    assert!(harness.vision.requests().is_empty());
    let chat_requests = harness.chat.requests();
    assert_eq!(chat_requests.len(), 1);
    let persona_input = chat_requests[0].messages[0].plain_text();
    assert!(persona_input.contains(ANALYSIS_FAILED));
    assert!(!persona_input.contains("base64"));
}

#[tokio::test]
async fn test_reset_requires_session_id() {
    let app = test_app().await;

    let response = app.clone().oneshot(delete("/chat")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Session ID is required");

    let response = app
        .oneshot(delete("/chat?sessionId=session-u1-1-abcdefg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "success": true }));
}

#[tokio::test]
async fn test_list_threads_requires_user() {
    let app = test_app().await;

    let response = app.oneshot(get("/threads")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({ "threads": [] }));
}

#[tokio::test]
async fn test_thread_lifecycle() {
    let app = test_app().await;

    for thread_id in ["session-u1-1-aaaaaaa", "session-u1-2-bbbbbbb"] {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/threads",
                json!({ "userId": "u1", "threadId": thread_id }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "success": true }));
    }

    let response = app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            "/threads",
            json!({ "userId": "u1", "threadId": "session-u1-1-aaaaaaa", "title": "猫の話" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/threads?userId=u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let threads = json["threads"].as_array().unwrap();
    assert_eq!(threads.len(), 2);
    // The renamed thread was touched last.
    assert_eq!(threads[0]["thread_id"], "session-u1-1-aaaaaaa");
    assert_eq!(threads[0]["title"], "猫の話");
    assert_eq!(threads[1]["title"], "New Thread");

    let response = app
        .clone()
        .oneshot(delete(
            "/threads?userId=u1&threadId=session-u1-2-bbbbbbb",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/threads?userId=u1")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["threads"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_threads_are_scoped_per_user() {
    let app = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/threads",
            json!({ "userId": "u1", "threadId": "session-u1-1-aaaaaaa", "title": "mine" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/threads?userId=u2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "threads": [] }));
}

#[tokio::test]
async fn test_delete_thread_removes_memory() {
    let app = test_app().await;
    let session = "session-u1-1700000000000-abcdefg";

    let response = app
        .clone()
        .oneshot(chat_request(
            session,
            Some("u1"),
            json!([{ "role": "user", "content": "覚えてて" }]),
        ))
        .await
        .unwrap();
    body_text(response).await;
    assert_eq!(history(&app, session, "u1").await.len(), 2);

    let response = app
        .clone()
        .oneshot(delete(&format!("/threads?userId=u1&threadId={session}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(history(&app, session, "u1").await.is_empty());
}

#[tokio::test]
async fn test_delete_thread_missing_params() {
    let app = test_app().await;

    let response = app.oneshot(delete("/threads?userId=u1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Missing params");
}

#[tokio::test]
async fn test_guest_thread_rows_are_rejected() {
    let app = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/threads",
            json!({ "userId": "u1", "threadId": "guest-session-1-abcdefg" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/threads?userId=u1")).await.unwrap();
    assert_eq!(body_json(response).await, json!({ "threads": [] }));
}

#[tokio::test]
async fn test_rename_requires_title() {
    let app = test_app().await;

    let response = app
        .oneshot(json_request(
            Method::PATCH,
            "/threads",
            json!({ "userId": "u1", "threadId": "session-u1-1-aaaaaaa" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Missing params");
}
