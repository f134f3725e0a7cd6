//! Client session logic against a live server.

use std::sync::Arc;

use anne_bot::client::{
    AuthProvider, AuthStatus, AuthUser, ChatApi, HttpChatApi, LocalAuth, LocalStore, MemoryStore,
    SessionManager, SessionState,
};
use anne_bot::session::user_session_key;
use tokio::net::TcpListener;

mod common;
use common::{CHAT_REPLY, test_app};

async fn spawn_server() -> String {
    let app = test_app().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn device(base_url: &str) -> (Arc<dyn LocalStore>, SessionManager) {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    let api = Arc::new(HttpChatApi::new(base_url));
    let manager = SessionManager::new(api, store.clone());
    (store, manager)
}

fn user(id: &str) -> AuthStatus {
    AuthStatus::SignedIn(AuthUser {
        id: id.to_string(),
        email: None,
    })
}

#[tokio::test]
async fn test_health_over_http() {
    let base_url = spawn_server().await;
    let api = HttpChatApi::new(&base_url);

    let health = api.health().await.unwrap();
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn test_signed_in_conversation_follows_user_across_devices() {
    let base_url = spawn_server().await;

    let (store, laptop) = device(&base_url);
    laptop.on_auth_change(&user("u1")).await;
    assert_eq!(laptop.state(), SessionState::AuthActive);
    let thread = laptop.session_id().unwrap();
    assert_eq!(
        store.get(&user_session_key("u1")).as_deref(),
        Some(thread.as_str())
    );

    let mut streamed = String::new();
    let reply = laptop
        .send_with("子猫の名前を考えて", |delta| streamed.push_str(delta))
        .await
        .unwrap();
    assert_eq!(reply.content, CHAT_REPLY);
    assert_eq!(streamed, CHAT_REPLY);

    let listed = laptop.threads().current();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].thread_id, thread.as_str());
    assert_eq!(listed[0].title, "子猫の名前を考えて");
    assert_eq!(listed[0].message_count, 2);

    // A second device with empty local storage resumes the same thread.
    let (_store, phone) = device(&base_url);
    phone.on_auth_change(&user("u1")).await;
    assert_eq!(phone.session_id(), Some(thread));
    let messages = phone.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, reply.id);
}

#[tokio::test]
async fn test_guest_chat_leaves_no_trace() {
    let base_url = spawn_server().await;

    let (_store, manager) = device(&base_url);
    manager.on_auth_change(&AuthStatus::SignedOut).await;
    let session = manager.session_id().unwrap();
    assert!(session.is_guest());

    manager.send("こんにちは").await.unwrap();
    assert_eq!(manager.messages().len(), 2);

    let api = HttpChatApi::new(&base_url);
    assert!(api.history(session.as_str(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_new_thread_then_delete_old_one() {
    let base_url = spawn_server().await;

    let (_store, manager) = device(&base_url);
    manager.on_auth_change(&user("u1")).await;
    manager.send("最初のスレッド").await.unwrap();
    let first = manager.session_id().unwrap();

    let second = manager.new_thread().await.unwrap();
    assert_ne!(first, second);
    assert!(manager.messages().is_empty());
    assert_eq!(manager.threads().current().len(), 2);

    manager.delete_thread(first.as_str()).await.unwrap();
    let remaining = manager.threads().current();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].thread_id, second.as_str());
}

#[tokio::test]
async fn test_login_and_logout_switch_identity() {
    let base_url = spawn_server().await;

    let (store, manager) = device(&base_url);
    let auth = LocalAuth::new(store.clone());
    manager.on_auth_change(&auth.restore()).await;
    let guest = manager.session_id().unwrap();
    assert!(guest.is_guest());

    auth.sign_in(AuthUser {
        id: "u1".into(),
        email: None,
    })
    .await
    .unwrap();
    manager.on_auth_change(&auth.status()).await;
    let signed_in = manager.session_id().unwrap();
    assert!(signed_in.as_str().starts_with("session-u1-"));

    auth.sign_out().await.unwrap();
    manager.on_auth_change(&auth.status()).await;
    assert_eq!(manager.session_id(), Some(guest));
    assert!(manager.threads().current().is_empty());
}
