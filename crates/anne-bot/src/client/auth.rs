//! Authentication provider.
//!
//! The chat client only needs to know who is signed in and to be told when
//! that changes. [`LocalAuth`] keeps the signed-in user in the local store
//! under [`AUTH_STORAGE_KEY`].

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use super::local_store::LocalStore;
use crate::session::Identity;

/// Local storage key of the persisted auth state.
pub const AUTH_STORAGE_KEY: &str = "anne-bot-auth";

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Current authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// Not known yet; identity-dependent work must wait.
    Resolving,
    SignedOut,
    SignedIn(AuthUser),
}

impl AuthStatus {
    /// Identity once resolved.
    pub fn identity(&self) -> Option<Identity> {
        match self {
            AuthStatus::Resolving => None,
            AuthStatus::SignedOut => Some(Identity::Guest),
            AuthStatus::SignedIn(user) => Some(Identity::User(user.id.clone())),
        }
    }
}

/// Source of the current user.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn status(&self) -> AuthStatus;

    /// Receiver notified on every state change.
    fn subscribe(&self) -> watch::Receiver<AuthStatus>;

    async fn sign_in(&self, user: AuthUser) -> Result<()>;

    async fn sign_out(&self) -> Result<()>;
}

/// Auth state persisted in a [`LocalStore`].
pub struct LocalAuth {
    store: Arc<dyn LocalStore>,
    tx: watch::Sender<AuthStatus>,
}

impl LocalAuth {
    /// Create the provider in the `Resolving` state. Call
    /// [`LocalAuth::restore`] to load the persisted user.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        let (tx, _rx) = watch::channel(AuthStatus::Resolving);
        Self { store, tx }
    }

    /// Resolve the state from the store. Unreadable entries count as signed
    /// out.
    pub fn restore(&self) -> AuthStatus {
        let status = match self.store.get(AUTH_STORAGE_KEY) {
            Some(raw) => match serde_json::from_str::<AuthUser>(&raw) {
                Ok(user) => AuthStatus::SignedIn(user),
                Err(e) => {
                    warn!(error = %e, "discarding unreadable auth state");
                    AuthStatus::SignedOut
                }
            },
            None => AuthStatus::SignedOut,
        };
        self.tx.send_replace(status.clone());
        status
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    fn status(&self) -> AuthStatus {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.tx.subscribe()
    }

    async fn sign_in(&self, user: AuthUser) -> Result<()> {
        let raw = serde_json::to_string(&user).context("serializing auth state")?;
        self.store.set(AUTH_STORAGE_KEY, &raw)?;
        info!(user_id = %user.id, "signed in");
        self.tx.send_replace(AuthStatus::SignedIn(user));
        Ok(())
    }

    /// Forget the user. Stored session ids are kept so the user resumes the
    /// same thread on the next sign-in.
    async fn sign_out(&self) -> Result<()> {
        self.store.remove(AUTH_STORAGE_KEY)?;
        info!("signed out");
        self.tx.send_replace(AuthStatus::SignedOut);
        Ok(())
    }
}
