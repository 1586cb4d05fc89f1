//! Administrator endpoints (admin role only).
//!
//! - `GET /api/admin/dashboard`: doctor, patient and message counts
//! - `GET /api/admin/users?q=`: user table with search
//! - `GET /api/admin/users/:id`: one user, with the attending doctor for patients
//! - `GET|POST /api/admin/users/:id/folders`: folders attached to a user
//! - `POST /api/admin/doctors`: provision a doctor account

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::accounts::{self, NewDoctor};
use crate::api::endpoints::SearchQuery;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::catalog;
use crate::directory::{self, DashboardCounts, UserProfile, UserRow};
use crate::models::{Folder, User};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachFolderRequest {
    pub catalog_id: String,
}

pub async fn dashboard(
    State(ctx): State<ApiContext>,
) -> Result<Json<DashboardCounts>, ApiError> {
    Ok(Json(directory::dashboard(ctx.core.backend.store.as_ref())?))
}

pub async fn users(
    State(ctx): State<ApiContext>,
    Query(search): Query<SearchQuery>,
) -> Result<Json<Vec<UserRow>>, ApiError> {
    let rows = directory::list_users(ctx.core.backend.store.as_ref())?;
    let rows = match search.term() {
        Some(term) => directory::search_users(&rows, term),
        None => rows,
    };
    Ok(Json(rows))
}

pub async fn user_profile(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(directory::user_profile(
        ctx.core.backend.store.as_ref(),
        &id,
    )?))
}

pub async fn user_folders(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Folder>>, ApiError> {
    Ok(Json(catalog::user_folders(ctx.core.backend.store.as_ref(), &id)?))
}

/// 409 when the catalog folder is already attached to the user.
pub async fn attach_folder(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(input): Json<AttachFolderRequest>,
) -> Result<(StatusCode, Json<Folder>), ApiError> {
    let folder =
        catalog::attach_catalog_folder(ctx.core.backend.store.as_ref(), &id, &input.catalog_id)?;
    Ok((StatusCode::CREATED, Json(folder)))
}

/// The new doctor receives a password setup email.
pub async fn add_doctor(
    State(ctx): State<ApiContext>,
    Json(input): Json<NewDoctor>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let backend = ctx.core.backend.clone();
    let doctor =
        tokio::task::spawn_blocking(move || accounts::provision_doctor(&backend, &input)).await??;
    Ok((StatusCode::CREATED, Json(doctor)))
}
