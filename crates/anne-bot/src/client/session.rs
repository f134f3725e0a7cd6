//! Client session state machine.
//!
//! Tracks which thread the user is looking at and what it contains:
//!
//! ```text
//! Uninitialized --signed out--> GuestActive
//! Uninitialized --signed in---> AuthLoadingHistory --history--> AuthActive
//! ```
//!
//! Each transition updates the session id, the message list and the loaded
//! flag under one lock. The lock is never held across an await; results of
//! async work are applied only if no newer transition happened meanwhile.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::api::ChatApi;
use super::auth::AuthStatus;
use super::local_store::LocalStore;
use super::reconciler::Reconciler;
use super::threads::ThreadBook;
use crate::codec::{self, ImageData};
use crate::memory::Message;
use crate::session::{Identity, SessionId};
use crate::stream::Frame;
use crate::threads::title_from_message;

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not ready yet")]
    NotReady,

    #[error("a reply is still streaming")]
    Busy,

    #[error("an image is staged; send or cancel it first")]
    ImageStaged,

    #[error("no image is staged")]
    NoStagedImage,

    #[error("message is empty")]
    EmptyMessage,

    #[error("threads are only available to signed-in users")]
    SignInRequired,

    #[error("reply failed: {0}")]
    Reply(String),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    GuestActive,
    AuthLoadingHistory,
    AuthActive,
}

/// Point-in-time view of the session, pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub messages: Vec<Message>,
    pub loaded: bool,
    pub busy: bool,
    pub image_staged: bool,
}

struct Inner {
    state: SessionState,
    identity: Option<Identity>,
    session_id: Option<SessionId>,
    view: Reconciler,
    staged_image: Option<ImageData>,
    busy: bool,
    /// Bumped on every sign-in and sign-out; stale async results compare
    /// against it.
    auth_generation: u64,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            session_id: self.session_id.clone(),
            messages: self.view.messages().to_vec(),
            loaded: self.view.is_loaded(),
            busy: self.busy,
            image_staged: self.staged_image.is_some(),
        }
    }

    fn user_id(&self) -> Option<String> {
        self.identity
            .as_ref()
            .and_then(|i| i.user_id())
            .map(str::to_string)
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state,
            SessionState::GuestActive | SessionState::AuthActive
        )
    }
}

/// What a submitted turn needs once the lock is released.
struct Turn {
    session_id: SessionId,
    user_id: Option<String>,
    generation: u64,
    first_turn: bool,
    content: String,
    messages: Vec<Message>,
}

/// Owns the active conversation of one client.
pub struct SessionManager {
    api: Arc<dyn ChatApi>,
    store: Arc<dyn LocalStore>,
    threads: Arc<ThreadBook>,
    inner: Mutex<Inner>,
    tx: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn ChatApi>, store: Arc<dyn LocalStore>) -> Self {
        let threads = Arc::new(ThreadBook::new(api.clone()));
        let inner = Inner {
            state: SessionState::Uninitialized,
            identity: None,
            session_id: None,
            view: Reconciler::new(),
            staged_image: None,
            busy: false,
            auth_generation: 0,
        };
        let (tx, _rx) = watch::channel(inner.snapshot());
        Self {
            api,
            store,
            threads,
            inner: Mutex::new(inner),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.tx.send_replace(inner.snapshot());
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.lock().session_id.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().view.messages().to_vec()
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().view.is_loaded()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    pub fn threads(&self) -> &Arc<ThreadBook> {
        &self.threads
    }

    fn persist_session_id(&self, identity: &Identity, id: &SessionId) {
        if let Err(e) = self.store.set(&identity.storage_key(), id.as_str()) {
            warn!(error = %e, "failed to persist session id");
        }
    }

    /// Stored session id for `identity`, minting and persisting one if absent.
    fn stored_or_minted(&self, identity: &Identity) -> SessionId {
        if let Some(stored) = self.store.get(&identity.storage_key()) {
            return SessionId::new(stored);
        }
        let minted = SessionId::mint(identity);
        self.persist_session_id(identity, &minted);
        minted
    }

    /// React to an authentication state change.
    pub async fn on_auth_change(&self, status: &AuthStatus) {
        match status {
            AuthStatus::Resolving => {
                debug!("auth still resolving, session suspended");
            }
            AuthStatus::SignedOut => self.activate_guest(),
            AuthStatus::SignedIn(user) => self.activate_user(&user.id).await,
        }
    }

    fn activate_guest(&self) {
        let mut inner = self.lock();
        // Any sign-in still in flight is stale now, even if the guest session
        // never went away.
        inner.auth_generation += 1;
        if inner.state == SessionState::GuestActive {
            return;
        }

        let identity = Identity::Guest;
        let session_id = self.stored_or_minted(&identity);
        info!(session_id = %session_id, "guest session active");

        inner.identity = Some(identity);
        inner.session_id = Some(session_id);
        inner.view.clear();
        inner.staged_image = None;
        inner.state = SessionState::GuestActive;
        self.publish(&inner);
        drop(inner);

        self.threads.clear();
    }

    async fn activate_user(&self, user_id: &str) {
        let identity = Identity::User(user_id.to_string());
        let auth = {
            let mut inner = self.lock();
            let same_user = inner.identity.as_ref() == Some(&identity);
            if same_user
                && matches!(
                    inner.state,
                    SessionState::AuthLoadingHistory | SessionState::AuthActive
                )
            {
                return;
            }
            inner.auth_generation += 1;
            inner.auth_generation
        };

        // A new device has no stored id; resume the latest thread instead of
        // starting an empty one.
        let session_id = match self.store.get(&identity.storage_key()) {
            Some(stored) => SessionId::new(stored),
            None => {
                let latest = match self.threads.latest(user_id).await {
                    Ok(latest) => latest,
                    Err(e) => {
                        warn!(user_id, error = %e, "failed to look up latest thread");
                        None
                    }
                };
                if self.lock().auth_generation != auth {
                    debug!(user_id, "auth changed during thread lookup, sign-in dropped");
                    return;
                }
                let id = latest
                    .map(SessionId::new)
                    .unwrap_or_else(|| SessionId::mint(&identity));
                self.persist_session_id(&identity, &id);
                id
            }
        };

        let ticket = {
            let mut inner = self.lock();
            if inner.auth_generation != auth {
                debug!(user_id, "auth changed during sign-in, sign-in dropped");
                return;
            }
            if inner.identity.as_ref() != Some(&identity) {
                inner.view.clear();
            }
            inner.identity = Some(identity.clone());
            inner.session_id = Some(session_id.clone());
            inner.staged_image = None;
            inner.state = SessionState::AuthLoadingHistory;
            let ticket = inner.view.begin_load();
            self.publish(&inner);
            ticket
        };

        info!(user_id, session_id = %session_id, "loading history");
        let history = self.fetch_history(&session_id, Some(user_id)).await;

        {
            let mut inner = self.lock();
            if inner.auth_generation != auth {
                debug!(user_id, "auth changed during history load, result dropped");
                return;
            }
            if inner.view.apply(ticket, history) {
                inner.state = SessionState::AuthActive;
                self.publish(&inner);
            }
        }

        self.refresh_threads(user_id).await;
    }

    async fn fetch_history(&self, session_id: &SessionId, user_id: Option<&str>) -> Vec<Message> {
        match self.api.history(session_id.as_str(), user_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to load history");
                Vec::new()
            }
        }
    }

    async fn refresh_threads(&self, user_id: &str) {
        if let Err(e) = self.threads.refresh(user_id).await {
            warn!(user_id, error = %e, "failed to refresh thread list");
        }
    }

    /// Start a new conversation and return its id.
    ///
    /// The message list is cleared before any network call. Signed-in users
    /// also get a placeholder thread row.
    pub async fn new_thread(&self) -> SessionResult<SessionId> {
        let (identity, session_id) = {
            let mut inner = self.lock();
            let Some(identity) = inner.identity.clone() else {
                return Err(SessionError::NotReady);
            };
            if inner.busy {
                return Err(SessionError::Busy);
            }

            let session_id = SessionId::mint(&identity);
            self.persist_session_id(&identity, &session_id);
            inner.session_id = Some(session_id.clone());
            inner.view.clear();
            inner.staged_image = None;
            if inner.state == SessionState::AuthLoadingHistory {
                inner.state = SessionState::AuthActive;
            }
            self.publish(&inner);
            (identity, session_id)
        };

        info!(session_id = %session_id, "new thread");
        if let Some(user_id) = identity.user_id() {
            if let Err(e) = self.threads.upsert(user_id, session_id.as_str(), None).await {
                warn!(user_id, error = %e, "failed to create thread row");
            }
        }

        Ok(session_id)
    }

    /// Switch to an existing thread and load its history.
    pub async fn select_thread(&self, thread_id: &str) -> SessionResult<()> {
        let (user_id, session_id, ticket) = {
            let mut inner = self.lock();
            let Some(user_id) = inner.user_id() else {
                return Err(if inner.identity.is_none() {
                    SessionError::NotReady
                } else {
                    SessionError::SignInRequired
                });
            };
            if inner.busy {
                return Err(SessionError::Busy);
            }

            let identity = Identity::User(user_id.clone());
            let session_id = SessionId::new(thread_id);
            self.persist_session_id(&identity, &session_id);
            inner.session_id = Some(session_id.clone());
            inner.staged_image = None;
            inner.state = SessionState::AuthLoadingHistory;
            let ticket = inner.view.begin_load();
            self.publish(&inner);
            (user_id, session_id, ticket)
        };

        let history = self.fetch_history(&session_id, Some(&user_id)).await;

        let mut inner = self.lock();
        if inner.view.apply(ticket, history) {
            inner.state = SessionState::AuthActive;
            self.publish(&inner);
        }
        Ok(())
    }

    /// Delete a thread; switching away first if it is the active one.
    pub async fn delete_thread(&self, thread_id: &str) -> SessionResult<()> {
        let (user_id, active) = {
            let inner = self.lock();
            let Some(user_id) = inner.user_id() else {
                return Err(SessionError::SignInRequired);
            };
            let active = inner.session_id.as_ref().map(SessionId::as_str) == Some(thread_id);
            (user_id, active)
        };

        if active {
            self.new_thread().await?;
        }
        self.threads.delete(&user_id, thread_id).await?;
        Ok(())
    }

    /// Stage an image for the next send.
    pub fn stage_image(&self, image: ImageData) -> SessionResult<()> {
        let mut inner = self.lock();
        if inner.busy {
            return Err(SessionError::Busy);
        }
        inner.staged_image = Some(image);
        self.publish(&inner);
        Ok(())
    }

    pub fn cancel_staged_image(&self) {
        let mut inner = self.lock();
        if inner.staged_image.take().is_some() {
            self.publish(&inner);
        }
    }

    /// Send a text message and wait for the full reply.
    pub async fn send(&self, text: &str) -> SessionResult<Message> {
        self.send_with(text, |_| {}).await
    }

    /// Send a text message, calling `on_delta` for each streamed chunk.
    pub async fn send_with<F>(&self, text: &str, on_delta: F) -> SessionResult<Message>
    where
        F: FnMut(&str) + Send,
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let turn = self.begin_turn(text.to_string(), false)?;
        self.complete_turn(turn, on_delta).await
    }

    /// Send the staged image with an optional prompt.
    pub async fn send_staged_image<F>(&self, prompt: &str, on_delta: F) -> SessionResult<Message>
    where
        F: FnMut(&str) + Send,
    {
        let image = {
            let inner = self.lock();
            inner
                .staged_image
                .clone()
                .ok_or(SessionError::NoStagedImage)?
        };
        let turn = self.begin_turn(codec::encode(prompt, &image), true)?;
        self.complete_turn(turn, on_delta).await
    }

    fn begin_turn(&self, content: String, with_image: bool) -> SessionResult<Turn> {
        let mut inner = self.lock();
        if !inner.is_active() {
            return Err(SessionError::NotReady);
        }
        if inner.busy {
            return Err(SessionError::Busy);
        }
        if inner.staged_image.is_some() && !with_image {
            return Err(SessionError::ImageStaged);
        }
        let Some(session_id) = inner.session_id.clone() else {
            return Err(SessionError::NotReady);
        };

        if with_image {
            inner.staged_image = None;
        }
        let first_turn = inner.view.is_first_turn();
        inner.view.push(Message::user(content.clone()));
        inner.busy = true;
        self.publish(&inner);

        Ok(Turn {
            session_id,
            user_id: inner.user_id(),
            generation: inner.view.generation(),
            first_turn,
            content,
            messages: inner.view.messages().to_vec(),
        })
    }

    async fn complete_turn<F>(&self, turn: Turn, on_delta: F) -> SessionResult<Message>
    where
        F: FnMut(&str) + Send,
    {
        let result = self.stream_reply(&turn, on_delta).await;

        {
            let mut inner = self.lock();
            inner.busy = false;
            self.publish(&inner);
        }

        let reply = result?;

        if let Some(user_id) = turn.user_id.as_deref() {
            if turn.first_turn {
                let title = title_from_message(&turn.content);
                if let Err(e) = self
                    .threads
                    .rename(user_id, turn.session_id.as_str(), &title)
                    .await
                {
                    warn!(user_id, error = %e, "failed to set thread title");
                }
            } else {
                self.refresh_threads(user_id).await;
            }
        }

        Ok(reply)
    }

    async fn stream_reply<F>(&self, turn: &Turn, mut on_delta: F) -> SessionResult<Message>
    where
        F: FnMut(&str) + Send,
    {
        let user_id = turn.user_id.as_deref();

        if turn.first_turn {
            if let Some(user_id) = user_id {
                // Placeholder row so the thread shows up while the reply streams.
                if let Err(e) = self
                    .threads
                    .upsert(user_id, turn.session_id.as_str(), None)
                    .await
                {
                    warn!(user_id, error = %e, "failed to create thread row");
                }
            }
        }

        let mut frames = self
            .api
            .send(turn.session_id.as_str(), user_id, &turn.messages)
            .await?;

        let mut reply = Message::assistant(String::new());
        while let Some(frame) = frames.next().await {
            match frame? {
                Frame::Start { message_id } => reply.id = message_id,
                Frame::Text(delta) => {
                    reply.content.push_str(&delta);
                    on_delta(&delta);
                    let mut inner = self.lock();
                    if inner.view.generation() == turn.generation {
                        inner.view.append_assistant_delta(&reply.id, &delta);
                        self.publish(&inner);
                    }
                }
                Frame::Error(message) => return Err(SessionError::Reply(message)),
                Frame::Finish { .. } => break,
            }
        }

        Ok(reply)
    }
}
