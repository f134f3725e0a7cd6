//! Health check.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint. Fails when the database is unreachable.
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    if !state.db.is_healthy().await {
        return Err(ApiError::service_unavailable("database is not reachable"));
    }
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
