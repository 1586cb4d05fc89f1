//! Stored object download.
//!
//! `GET /files/*key`: public URLs handed out by the object store.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

pub async fn download(
    State(ctx): State<ApiContext>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = ctx
        .core
        .backend
        .objects
        .get(&key)?
        .ok_or_else(|| ApiError::NotFound(format!("file {key}")))?;

    let mime = mime_guess::from_path(&key)
        .first_or_octet_stream()
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "private, max-age=3600".to_string()),
        ],
        bytes,
    )
        .into_response())
}
