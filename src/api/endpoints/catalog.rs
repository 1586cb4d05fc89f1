//! Video folder catalog endpoints (admins and doctors).
//!
//! - `GET|POST /api/folders`, `PATCH|DELETE /api/folders/:id`
//! - `GET|POST /api/folders/:id/videos`, `POST /api/folders/:id/videos/upload`
//! - `DELETE /api/folders/:id/videos/:video_id`

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::endpoints::{FormData, SearchQuery};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionContext};
use crate::catalog::{self, NewVideo};
use crate::models::{Folder, User, Video};
use crate::session;

#[derive(Deserialize)]
pub struct FolderRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub removed: usize,
}

/// Video plus the URL to put in an embedded player.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoView {
    #[serde(flatten)]
    pub video: Video,
    pub embed_url: String,
}

impl From<Video> for VideoView {
    fn from(video: Video) -> Self {
        Self {
            embed_url: catalog::embed_url(&video.url),
            video,
        }
    }
}

pub async fn list(
    State(ctx): State<ApiContext>,
    Query(search): Query<SearchQuery>,
) -> Result<Json<Vec<Folder>>, ApiError> {
    let folders = catalog::list_folders(ctx.core.backend.store.as_ref())?;
    let folders = match search.term() {
        Some(term) => catalog::search_folders(&folders, term),
        None => folders,
    };
    Ok(Json(folders))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<FolderRequest>,
) -> Result<(StatusCode, Json<Folder>), ApiError> {
    let store = ctx.core.backend.store.as_ref();
    let author = session::load_profile(store, &session.uid)?.unwrap_or_else(|| User {
        id: session.uid.clone(),
        email: session.email.clone(),
        ..Default::default()
    });
    let folder = catalog::create_folder(store, &author, &req.name)?;
    Ok((StatusCode::CREATED, Json(folder)))
}

pub async fn rename(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<FolderRequest>,
) -> Result<Json<Folder>, ApiError> {
    Ok(Json(catalog::rename_folder(
        ctx.core.backend.store.as_ref(),
        &id,
        &req.name,
    )?))
}

/// Deletes the folder's videos with it.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let removed = catalog::delete_folder(ctx.core.backend.store.as_ref(), &id)?;
    Ok(Json(DeletedResponse { removed }))
}

pub async fn videos(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<VideoView>>, ApiError> {
    let videos = catalog::list_videos(ctx.core.backend.store.as_ref(), &id)?;
    Ok(Json(videos.into_iter().map(VideoView::from).collect()))
}

pub async fn add_video(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(input): Json<NewVideo>,
) -> Result<(StatusCode, Json<VideoView>), ApiError> {
    let video = catalog::add_video(ctx.core.backend.store.as_ref(), &id, &input)?;
    Ok((StatusCode::CREATED, Json(video.into())))
}

/// Multipart: `title` and a `file`.
pub async fn upload_video(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<VideoView>), ApiError> {
    let mut form = FormData::read(multipart).await?;
    let file = form
        .take_file("file")
        .ok_or_else(|| ApiError::BadRequest("file is required".into()))?;
    let title = form.text("title").unwrap_or_default().to_string();
    let video = catalog::upload_video(&ctx.core.backend, &id, &title, &file)?;
    Ok((StatusCode::CREATED, Json(video.into())))
}

pub async fn delete_video(
    State(ctx): State<ApiContext>,
    Path((id, video_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    catalog::delete_video(ctx.core.backend.store.as_ref(), &id, &video_id)?;
    Ok(StatusCode::NO_CONTENT)
}
