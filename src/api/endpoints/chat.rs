//! Doctor chat endpoints (doctor role only).
//!
//! - `GET /api/chat/contacts`: patients on the roster
//! - `GET /api/chat/:patient_id/messages`: conversation, oldest first
//! - `POST /api/chat/:patient_id/messages`: text message
//! - `POST /api/chat/:patient_id/attachments`: multipart image or audio

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::endpoints::FormData;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionContext};
use crate::chat::{self, OutgoingMessage, Sender};
use crate::directory::RosterEntry;
use crate::models::ChatMessage;
use crate::session;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub conversation_key: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
pub struct TextMessageRequest {
    pub text: String,
}

pub async fn contacts(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<Vec<RosterEntry>>, ApiError> {
    Ok(Json(chat::chat_contacts(&ctx.core.backend, &session.uid)?))
}

pub async fn messages(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(patient_id): Path<String>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let store = ctx.core.backend.store.as_ref();
    let (_, key) = chat::patient_conversation(store, &session.uid, &session.email, &patient_id)?;
    let messages = chat::list_messages(store, &key)?;
    Ok(Json(ConversationResponse {
        conversation_key: key,
        messages,
    }))
}

fn sender(ctx: &ApiContext, session: &SessionContext) -> Result<Sender, ApiError> {
    let name = session::load_profile(ctx.core.backend.store.as_ref(), &session.uid)?
        .map(|profile| profile.display_name())
        .unwrap_or_else(|| session.email.clone());
    Ok(Sender {
        email: session.email.clone(),
        name,
    })
}

pub async fn send_text(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(patient_id): Path<String>,
    Json(req): Json<TextMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let backend = &ctx.core.backend;
    let (_, key) = chat::patient_conversation(
        backend.store.as_ref(),
        &session.uid,
        &session.email,
        &patient_id,
    )?;
    let from = sender(&ctx, &session)?;
    let message = chat::send_message(backend, &key, &from, OutgoingMessage::Text(req.text))?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Multipart: `kind` (`image` or `audio`), `file`, and `duration` in
/// seconds for audio.
pub async fn send_attachment(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Path(patient_id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let mut form = FormData::read(multipart).await?;
    let file = form
        .take_file("file")
        .ok_or_else(|| ApiError::BadRequest("file is required".into()))?;
    let outgoing = match form.text("kind").unwrap_or("image") {
        "image" => OutgoingMessage::Image(file),
        "audio" => {
            let duration = match form.text("duration") {
                Some(raw) => raw
                    .parse::<f64>()
                    .map_err(|_| ApiError::BadRequest(format!("Invalid duration: {raw}")))?,
                None => 0.0,
            };
            OutgoingMessage::Audio { file, duration }
        }
        other => return Err(ApiError::BadRequest(format!("Unsupported attachment kind: {other}"))),
    };

    let backend = &ctx.core.backend;
    let (_, key) = chat::patient_conversation(
        backend.store.as_ref(),
        &session.uid,
        &session.email,
        &patient_id,
    )?;
    let from = sender(&ctx, &session)?;
    let message = chat::send_message(backend, &key, &from, outgoing)?;
    Ok((StatusCode::CREATED, Json(message)))
}
