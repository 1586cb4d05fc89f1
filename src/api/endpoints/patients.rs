//! Doctor endpoints for the patient roster (doctor role only).
//!
//! - `GET /api/patients?q=`: own roster with search
//! - `POST /api/patients`: provision a patient from the national registry
//! - `GET /api/patients/registry/:iin`: registry preview before adding
//! - `GET /api/patients/:id`: profile with photo and folder status
//! - `DELETE /api/patients/:id`: remove a patient and their data
//! - `GET|PUT /api/patients/:id/folder`: assigned video folder

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::accounts::{self, NewPatient, RemovedPatient};
use crate::api::endpoints::SearchQuery;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionContext};
use crate::catalog::{self, Assignment};
use crate::directory::{self, PatientProfile, RosterEntry};
use crate::models::{FolderStatus, Patient, Video};
use crate::registry::RegistryRecord;

pub async fn roster(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Query(search): Query<SearchQuery>,
) -> Result<Json<Vec<RosterEntry>>, ApiError> {
    let entries = directory::roster(&ctx.core.backend, &session.uid)?;
    let entries = match search.term() {
        Some(term) => directory::search_roster(&entries, term),
        None => entries,
    };
    Ok(Json(entries))
}

/// Registry lookup and password hashing run on the blocking pool.
pub async fn add(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Json(input): Json<NewPatient>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let backend = ctx.core.backend.clone();
    let doctor = session.identity();
    let patient = tokio::task::spawn_blocking(move || {
        accounts::provision_patient(&backend, &doctor, &input)
    })
    .await??;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn registry_lookup(
    State(ctx): State<ApiContext>,
    Path(iin): Path<String>,
) -> Result<Json<RegistryRecord>, ApiError> {
    let backend = ctx.core.backend.clone();
    let record =
        tokio::task::spawn_blocking(move || accounts::lookup_patient(&backend, &iin)).await??;
    Ok(Json(record))
}

pub async fn profile(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<Json<PatientProfile>, ApiError> {
    Ok(Json(directory::patient_profile(
        &ctx.core.backend,
        &session.uid,
        &id,
    )?))
}

pub async fn remove(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<Json<RemovedPatient>, ApiError> {
    Ok(Json(accounts::remove_patient(
        &ctx.core.backend,
        &session.uid,
        &id,
    )?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientFolderResponse {
    pub folder: FolderStatus,
    pub videos: Vec<Video>,
}

pub async fn folder(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Result<Json<PatientFolderResponse>, ApiError> {
    let (folder, videos) =
        catalog::patient_folder(ctx.core.backend.store.as_ref(), &session.uid, &id)?;
    Ok(Json(PatientFolderResponse { folder, videos }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignFolderRequest {
    pub folder_id: String,
    /// Must be set to replace a different folder already assigned.
    #[serde(default)]
    pub overwrite: bool,
}

/// Returns 409 naming the current folder when an overwrite is not confirmed.
pub async fn assign_folder(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
    Json(req): Json<AssignFolderRequest>,
) -> Result<Json<Assignment>, ApiError> {
    let assignment = catalog::assign_folder(
        ctx.core.backend.store.as_ref(),
        &session.uid,
        &id,
        &req.folder_id,
        req.overwrite,
    )?;
    Ok(Json(assignment))
}
