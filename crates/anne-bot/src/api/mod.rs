//! HTTP API module.
//!
//! Chat endpoints (history, send, reset) and thread metadata endpoints.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::{AGENT_NAME, AppState};
