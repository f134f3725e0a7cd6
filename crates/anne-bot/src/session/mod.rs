//! Session identities.
//!
//! A session id names one conversation thread. Guests and signed-in users get
//! differently shaped ids so a guest thread can never be mistaken for a
//! persisted one:
//!
//! - guest: `guest-session-<epoch-ms>-<random>`
//! - user:  `session-<user-id>-<epoch-ms>-<random>`

use std::fmt;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Local storage key holding the guest's active session id.
pub const GUEST_SESSION_KEY: &str = "guest_sessionId";

/// Thread id the chat endpoint falls back to when none is supplied.
pub const DEFAULT_SESSION_ID: &str = "default-session";

/// Agent name used as the prefix of memory resource ids.
pub const AGENT_RESOURCE_PREFIX: &str = "catAgent";

const GUEST_PREFIX: &str = "guest-session-";
const USER_PREFIX: &str = "session-";
const SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Local storage key holding a signed-in user's active session id.
pub fn user_session_key(user_id: &str) -> String {
    format!("sessionId_{}", user_id)
}

/// Who is talking to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Guest,
    User(String),
}

impl Identity {
    /// Build an identity from an optional user id; blank ids count as guest.
    pub fn from_user_id(user_id: Option<&str>) -> Self {
        match user_id.map(str::trim) {
            Some(id) if !id.is_empty() => Identity::User(id.to_string()),
            _ => Identity::Guest,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Guest => None,
            Identity::User(id) => Some(id),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest)
    }

    /// Local storage key for this identity's active session id.
    pub fn storage_key(&self) -> String {
        match self {
            Identity::Guest => GUEST_SESSION_KEY.to_string(),
            Identity::User(id) => user_session_key(id),
        }
    }

    /// Memory owner for this identity. Guests have none.
    pub fn resource_id(&self) -> Option<ResourceId> {
        self.user_id().map(ResourceId::for_user)
    }
}

/// Opaque conversation thread identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing id, e.g. one read back from local storage.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn mint_guest() -> Self {
        Self(format!("{}{}-{}", GUEST_PREFIX, now_millis(), random_suffix()))
    }

    pub fn mint_for_user(user_id: &str) -> Self {
        Self(format!(
            "{}{}-{}-{}",
            USER_PREFIX,
            user_id,
            now_millis(),
            random_suffix()
        ))
    }

    /// Mint a fresh id shaped for the given identity.
    pub fn mint(identity: &Identity) -> Self {
        match identity {
            Identity::Guest => Self::mint_guest(),
            Identity::User(id) => Self::mint_for_user(id),
        }
    }

    pub fn is_guest(&self) -> bool {
        is_guest_thread(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// True for ids minted for guests.
pub fn is_guest_thread(thread_id: &str) -> bool {
    thread_id.starts_with(GUEST_PREFIX)
}

/// Owner of agent memory threads, `catAgent:<user-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn for_user(user_id: &str) -> Self {
        Self(format!("{}:{}", AGENT_RESOURCE_PREFIX, user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an agent call reads and writes memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryScope {
    pub thread_id: String,
    pub resource_id: ResourceId,
}

impl MemoryScope {
    pub fn new(thread_id: impl Into<String>, resource_id: ResourceId) -> Self {
        Self {
            thread_id: thread_id.into(),
            resource_id,
        }
    }

    /// Scope for a thread owned by `identity`; `None` for guests.
    pub fn for_identity(thread_id: &str, identity: &Identity) -> Option<Self> {
        identity
            .resource_id()
            .map(|resource_id| Self::new(thread_id, resource_id))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect()
}
