//! Self-service account endpoints.
//!
//! Unprotected:
//! - `POST /api/auth/register`, `POST /api/auth/login`
//! - `POST /api/auth/forgot-password`, `POST /api/auth/verify-email`,
//!   `POST /api/auth/reset-password`, `GET /auth/action` (email links)
//!
//! Protected:
//! - `POST /api/auth/logout`, `POST /api/auth/ws-ticket`
//! - `GET /api/me`, `POST /api/me/first-signin`, `POST /api/me/contact`

use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::accounts::{self, ContactUpdate, FirstSignin};
use crate::api::endpoints::FormData;
use crate::api::error::ApiError;
use crate::api::middleware::auth::bearer_token;
use crate::api::types::{ApiContext, SessionContext};
use crate::auth::{AuthSession, AuthUser};
use crate::models::{Role, User};
use crate::session::{self, RouteDecision};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub repeat_password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user: AuthUser,
    pub message: &'static str,
}

/// `POST /api/auth/register`: create an account and send a verification
/// email. Does not sign in.
pub async fn register(
    State(ctx): State<ApiContext>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let backend = ctx.core.backend.clone();
    let user = tokio::task::spawn_blocking(move || {
        accounts::register(&backend, &req.email, &req.password, &req.repeat_password)
    })
    .await??;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            message: "Check your inbox to confirm your email",
        }),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: AuthUser,
    pub route: RouteDecision,
}

/// `POST /api/auth/login`: verified accounts with an admin or doctor
/// profile get a bearer token.
pub async fn login(
    State(ctx): State<ApiContext>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let backend = ctx.core.backend.clone();
    let (user, route, auth) = tokio::task::spawn_blocking(move || {
        let auth = Arc::new(AuthSession::new());
        let user = accounts::login(&backend, &auth, &req.email, &req.password)?;
        let route = session::resolve_route(backend.store.as_ref(), Some(&user));
        Ok::<_, ApiError>((user, route, auth))
    })
    .await??;

    let role = match route {
        RouteDecision::Admin => Role::Admin,
        RouteDecision::Doctor => Role::Doctor,
        RouteDecision::SignedOut | RouteDecision::AccessDenied => {
            auth.sign_out();
            return Err(ApiError::Forbidden(
                "No access. Contact your administrator.".into(),
            ));
        }
    };

    let token = ctx
        .sessions
        .lock()
        .map_err(|_| ApiError::Internal("session lock".into()))?
        .issue(SessionContext {
            uid: user.uid.clone(),
            email: user.email.clone(),
            role,
            auth,
        });

    tracing::info!(uid = %user.uid, %role, "Signed in");
    Ok(Json(LoginResponse { token, user, route }))
}

/// `POST /api/auth/logout`
pub async fn logout(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    let revoked = ctx
        .sessions
        .lock()
        .map_err(|_| ApiError::Internal("session lock".into()))?
        .revoke(&token);
    if let Some(session) = revoked {
        tracing::info!(uid = %session.uid, "Signed out");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// `POST /api/auth/forgot-password`
pub async fn forgot_password(
    State(ctx): State<ApiContext>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    accounts::forgot_password(&ctx.core.backend, &req.email)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct VerifyEmailRequest {
    pub code: String,
}

/// `POST /api/auth/verify-email`
pub async fn verify_email(
    State(ctx): State<ApiContext>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<Json<AuthUser>, ApiError> {
    Ok(Json(accounts::confirm_email(&ctx.core.backend, &req.code)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub code: String,
    pub new_password: String,
}

/// `POST /api/auth/reset-password`
pub async fn reset_password(
    State(ctx): State<ApiContext>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let backend = ctx.core.backend.clone();
    tokio::task::spawn_blocking(move || {
        accounts::confirm_password_reset(&backend, &req.code, &req.new_password)
    })
    .await??;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ActionQuery {
    pub mode: String,
    pub code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub mode: String,
    pub message: String,
}

/// `GET /auth/action?mode=..&code=..`: target of links in emails.
/// Email verification completes here; password reset needs the new
/// password posted to `/api/auth/reset-password`.
pub async fn email_action(
    State(ctx): State<ApiContext>,
    Query(query): Query<ActionQuery>,
) -> Result<Json<ActionResponse>, ApiError> {
    match query.mode.as_str() {
        "verifyEmail" => {
            let user = accounts::confirm_email(&ctx.core.backend, &query.code)?;
            Ok(Json(ActionResponse {
                mode: query.mode,
                message: format!("Email {} confirmed. You can sign in now.", user.email),
            }))
        }
        "resetPassword" => Ok(Json(ActionResponse {
            mode: query.mode,
            message: "POST the code and newPassword to /api/auth/reset-password".into(),
        })),
        other => Err(ApiError::BadRequest(format!("Unknown action mode: {other}"))),
    }
}

#[derive(Serialize)]
pub struct TicketResponse {
    pub ticket: String,
}

/// `POST /api/auth/ws-ticket`: one-time WebSocket upgrade ticket.
pub async fn ws_ticket(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<TicketResponse>, ApiError> {
    let ticket = ctx
        .ws_tickets
        .lock()
        .map_err(|_| ApiError::Internal("ticket lock".into()))?
        .issue(session);
    Ok(Json(TicketResponse { ticket }))
}

// ═══════════════════════════════════════════════════════════
// Own profile
// ═══════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: AuthUser,
    pub role: Role,
    pub profile: Option<User>,
}

/// `GET /api/me`
pub async fn me(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<MeResponse>, ApiError> {
    let profile = session::load_profile(ctx.core.backend.store.as_ref(), &session.uid)?;
    Ok(Json(MeResponse {
        user: session.identity(),
        role: session.role,
        profile,
    }))
}

/// `POST /api/me/first-signin`
pub async fn first_signin(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    Json(form): Json<FirstSignin>,
) -> Result<Json<User>, ApiError> {
    let user = accounts::complete_first_signin(
        ctx.core.backend.store.as_ref(),
        &session.identity(),
        &form,
    )?;
    Ok(Json(user))
}

/// `POST /api/me/contact`: multipart: `tel`, `address`, `photo` file.
pub async fn update_contact(
    State(ctx): State<ApiContext>,
    Extension(session): Extension<SessionContext>,
    multipart: Multipart,
) -> Result<Json<User>, ApiError> {
    let mut form = FormData::read(multipart).await?;
    let update = ContactUpdate {
        tel: form.text("tel").map(str::to_string),
        address: form.text("address").map(str::to_string),
        photo: form.take_file("photo"),
    };
    let user = accounts::update_contact_details(&ctx.core.backend, &session.uid, &update)?;
    Ok(Json(user))
}
