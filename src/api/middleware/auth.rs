//! Bearer token authentication and role guards.
//!
//! `require_auth` extracts `Authorization: Bearer <token>`, resolves it
//! against the session registry and injects `SessionContext` into request
//! extensions. The role guards run after it on admin-only and doctor-only
//! route groups.

use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionContext};
use crate::models::Role;

/// Bearer token from the `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub async fn require_auth(
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let token = bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;

    let session = {
        let sessions = ctx
            .sessions
            .lock()
            .map_err(|_| ApiError::Internal("session lock".into()))?;
        sessions.validate(&token).ok_or(ApiError::Unauthorized)?
    };

    req.extensions_mut().insert(session);

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));
    Ok(response)
}

fn check_role(req: &Request<axum::body::Body>, role: Role) -> Result<(), ApiError> {
    let session = req
        .extensions()
        .get::<SessionContext>()
        .ok_or(ApiError::Unauthorized)?;
    if session.role != role {
        tracing::info!(uid = %session.uid, have = %session.role, need = %role, "Role check failed");
        return Err(ApiError::Forbidden(format!("{role} access required")));
    }
    Ok(())
}

pub async fn require_admin(
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match check_role(&req, Role::Admin) {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}

pub async fn require_doctor(
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match check_role(&req, Role::Doctor) {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}
