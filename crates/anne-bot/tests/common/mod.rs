//! Test utilities and common setup.
#![allow(dead_code)]

use std::sync::Arc;

use anne_bot::agent::ScriptedModel;
use anne_bot::api::{self, AppState};
use anne_bot::db::Database;
use axum::Router;
use axum::body::Body;
use axum::http::Response;
use serde_json::Value;

/// Default reply of the scripted chat model.
pub const CHAT_REPLY: &str = "にゃーん、こんにちは！あんだよ。";

/// Default answer of the scripted vision model.
pub const VISION_REPLY: &str = r#"{"isCat": true, "analysis": "茶トラの子猫が丸くなって寝ています。"}"#;

/// Router plus handles on its scripted models.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub chat: Arc<ScriptedModel>,
    pub vision: Arc<ScriptedModel>,
}

pub async fn test_harness() -> TestApp {
    let db = Database::in_memory()
        .await
        .expect("Failed to create test database");

    let chat = Arc::new(ScriptedModel::new(CHAT_REPLY).with_name("test-chat"));
    let vision = Arc::new(ScriptedModel::new(VISION_REPLY).with_name("test-vision"));
    let state = AppState::new(db, chat.clone(), vision.clone());

    TestApp {
        router: api::create_router(state.clone()),
        state,
        chat,
        vision,
    }
}

/// Create a test application router.
pub async fn test_app() -> Router {
    test_harness().await.router
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let text = body_text(response).await;
    serde_json::from_str(&text).expect("Body is not JSON")
}
