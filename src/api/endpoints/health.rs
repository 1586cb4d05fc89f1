//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    pub active_sessions: usize,
}

/// `GET /api/health`: liveness check.
pub async fn check(
    State(ctx): State<ApiContext>,
) -> Result<Json<HealthResponse>, ApiError> {
    let active_sessions = ctx
        .sessions
        .lock()
        .map_err(|_| ApiError::Internal("session lock".into()))?
        .len();

    Ok(Json(HealthResponse {
        status: "ok",
        name: crate::config::APP_NAME,
        version: crate::config::APP_VERSION,
        active_sessions,
    }))
}
