//! API request handlers.
//!
//! - `chat`: history, send and reset
//! - `threads`: thread metadata
//! - `misc`: health check

mod chat;
mod misc;
mod threads;

pub use chat::{
    ChatQuery, ChatRequest, HistoryResponse, SESSION_HEADER, SuccessResponse, USER_HEADER,
    get_history, reset_chat, send_message,
};
pub use misc::{HealthResponse, health};
pub use threads::{
    ThreadWriteRequest, ThreadsQuery, delete_thread, list_threads, rename_thread, upsert_thread,
};
