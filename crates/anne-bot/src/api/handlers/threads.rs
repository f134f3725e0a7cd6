//! Thread metadata handlers.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::instrument;

use crate::threads::{ThreadListing, WriteStatus};

use super::chat::SuccessResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadsQuery {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
}

/// Body of `POST /threads` and `PATCH /threads`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadWriteRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub thread_id: String,
    pub title: Option<String>,
}

fn write_result(status: WriteStatus) -> ApiResult<Json<SuccessResponse>> {
    match status {
        WriteStatus::Done => Ok(SuccessResponse::ok()),
        WriteStatus::Rejected(reason) => Err(ApiError::bad_request(reason)),
        WriteStatus::Failed(reason) => Err(ApiError::store(reason)),
    }
}

/// Threads of a user, most recently updated first.
#[instrument(skip(state))]
pub async fn list_threads(
    State(state): State<AppState>,
    Query(query): Query<ThreadsQuery>,
) -> Response {
    let Some(user_id) = query.user_id.as_deref().filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(ThreadListing::default())).into_response();
    };

    let listing = state.threads.list(Some(user_id)).await;
    let status = if listing.error.is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(listing)).into_response()
}

/// Create a thread, or touch it if it exists.
#[instrument(skip(state))]
pub async fn upsert_thread(
    State(state): State<AppState>,
    Json(req): Json<ThreadWriteRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let title = req.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
    write_result(state.threads.upsert(&req.user_id, &req.thread_id, title).await)
}

/// Rename a thread.
#[instrument(skip(state))]
pub async fn rename_thread(
    State(state): State<AppState>,
    Json(req): Json<ThreadWriteRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let Some(title) = req.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(ApiError::bad_request("Missing params"));
    };
    write_result(
        state
            .threads
            .update_title(&req.user_id, &req.thread_id, title)
            .await,
    )
}

/// Delete a thread and, best effort, its memory.
#[instrument(skip(state))]
pub async fn delete_thread(
    State(state): State<AppState>,
    Query(query): Query<ThreadsQuery>,
) -> ApiResult<Json<SuccessResponse>> {
    let user_id = query.user_id.unwrap_or_default();
    let thread_id = query.thread_id.unwrap_or_default();
    write_result(state.threads.delete(&user_id, &thread_id).await)
}
