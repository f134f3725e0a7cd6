//! Client side of the chat: identity, local storage, the HTTP API client and
//! the session state machine that ties them together.

pub mod api;
pub mod auth;
pub mod local_store;
pub mod reconciler;
pub mod session;
pub mod threads;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ChatApi, FrameStream, HttpChatApi};
pub use auth::{AUTH_STORAGE_KEY, AuthProvider, AuthStatus, AuthUser, LocalAuth};
pub use local_store::{FileStore, LocalStore, MemoryStore};
pub use reconciler::{LoadTicket, Reconciler};
pub use session::{SessionError, SessionManager, SessionSnapshot, SessionState};
pub use threads::{ThreadBook, ThreadSummary};
