//! Adherence analytics endpoints (doctor role only).
//!
//! - `GET /api/analytics/patients?q=`: patient picker
//! - `GET /api/analytics/:patient_id?date=`: compute, read-only
//! - `POST /api/analytics/:patient_id/persist?date=`: compute and save
//! - `GET /api/analytics/:patient_id/export?date=`: `.xlsx` download

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::analytics::{self, AdherenceReport};
use crate::api::endpoints::SearchQuery;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionContext};
use crate::models::Patient;

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    /// `YYYY-MM-DD`; today (UTC) when absent.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl DateQuery {
    fn day(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}

pub async fn patients(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Query(search): Query<SearchQuery>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    let patients = analytics::doctor_patients(ctx.core.backend.store.as_ref(), &session.uid)?;
    let patients = match search.term() {
        Some(term) => analytics::search_patients(&patients, term),
        None => patients,
    };
    Ok(Json(patients))
}

pub async fn report(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(patient_id): Path<String>,
    Query(date): Query<DateQuery>,
) -> Result<Json<AdherenceReport>, ApiError> {
    Ok(Json(analytics::patient_adherence(
        ctx.core.backend.store.as_ref(),
        &session.uid,
        &patient_id,
        date.day(),
    )?))
}

/// Writes the daily summary and analytics snapshot, returns the report.
pub async fn persist(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(patient_id): Path<String>,
    Query(date): Query<DateQuery>,
) -> Result<Json<AdherenceReport>, ApiError> {
    let store = ctx.core.backend.store.as_ref();
    let report = analytics::patient_adherence(store, &session.uid, &patient_id, date.day())?;
    analytics::persist_adherence(store, &report)?;
    Ok(Json(report))
}

pub async fn export(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(patient_id): Path<String>,
    Query(date): Query<DateQuery>,
) -> Result<Response, ApiError> {
    let report = analytics::patient_adherence(
        ctx.core.backend.store.as_ref(),
        &session.uid,
        &patient_id,
        date.day(),
    )?;
    let bytes = analytics::export_xlsx(&report.rows())?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"analytics.xlsx\"",
            ),
        ],
        bytes,
    )
        .into_response())
}
