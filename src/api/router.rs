//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`; email links land on `/auth/action`,
//! stored files are served from `/files/*key`, live feeds from `/ws/connect`.
//!
//! Middleware stack (outermost → innermost):
//! 1. Rate limiter → 2. Auth validator → 3. Role guard → 4. Audit logger

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints::{self, MAX_UPLOAD_BYTES};
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::api::websocket;
use crate::core_state::CoreState;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    let ctx = ApiContext::new(core);
    build_router(ctx)
}

/// Build router from pre-constructed `ApiContext`.
///
/// Used by tests that need access to the shared `ApiContext`
/// (e.g. to issue WS tickets or sessions directly).
#[cfg(test)]
pub(crate) fn api_router_with_ctx(ctx: ApiContext) -> Router {
    build_router(ctx)
}

fn build_router(ctx: ApiContext) -> Router {
    // Admin-only group. Role guards are route layers so they only wrap
    // routes that matched.
    let admin = Router::new()
        .route("/admin/dashboard", get(endpoints::admin::dashboard))
        .route("/admin/users", get(endpoints::admin::users))
        .route("/admin/users/:id", get(endpoints::admin::user_profile))
        .route(
            "/admin/users/:id/folders",
            get(endpoints::admin::user_folders).post(endpoints::admin::attach_folder),
        )
        .route("/admin/doctors", post(endpoints::admin::add_doctor))
        .route_layer(axum::middleware::from_fn(middleware::auth::require_admin));

    // Doctor-only group.
    let doctor = Router::new()
        .route(
            "/patients",
            get(endpoints::patients::roster).post(endpoints::patients::add),
        )
        .route(
            "/patients/registry/:iin",
            get(endpoints::patients::registry_lookup),
        )
        .route(
            "/patients/:id",
            get(endpoints::patients::profile).delete(endpoints::patients::remove),
        )
        .route(
            "/patients/:id/folder",
            get(endpoints::patients::folder).put(endpoints::patients::assign_folder),
        )
        .route("/chat/contacts", get(endpoints::chat::contacts))
        .route(
            "/chat/:patient_id/messages",
            get(endpoints::chat::messages).post(endpoints::chat::send_text),
        )
        .route(
            "/chat/:patient_id/attachments",
            post(endpoints::chat::send_attachment),
        )
        .route("/analytics/patients", get(endpoints::analytics::patients))
        .route("/analytics/:patient_id", get(endpoints::analytics::report))
        .route(
            "/analytics/:patient_id/persist",
            post(endpoints::analytics::persist),
        )
        .route(
            "/analytics/:patient_id/export",
            get(endpoints::analytics::export),
        )
        .route_layer(axum::middleware::from_fn(middleware::auth::require_doctor));

    // Protected routes: any signed-in staff member, plus the role groups.
    //
    // Layers are applied from bottom (innermost) to top (outermost):
    //   Extension (outermost) → Rate limit → Auth → Audit (innermost) → Handler
    //
    // Extension must be outermost so all middleware can access ApiContext.
    // `.with_state()` converts Router<ApiContext> → Router<()> so the
    // from_fn layers (state = ()) are compatible.
    let protected = Router::new()
        .route("/auth/logout", post(endpoints::accounts::logout))
        .route("/auth/ws-ticket", post(endpoints::accounts::ws_ticket))
        .route("/me", get(endpoints::accounts::me))
        .route("/me/first-signin", post(endpoints::accounts::first_signin))
        .route("/me/contact", post(endpoints::accounts::update_contact))
        .route(
            "/folders",
            get(endpoints::catalog::list).post(endpoints::catalog::create),
        )
        .route(
            "/folders/:id",
            patch(endpoints::catalog::rename).delete(endpoints::catalog::delete),
        )
        .route(
            "/folders/:id/videos",
            get(endpoints::catalog::videos).post(endpoints::catalog::add_video),
        )
        .route(
            "/folders/:id/videos/upload",
            post(endpoints::catalog::upload_video),
        )
        .route(
            "/folders/:id/videos/:video_id",
            delete(endpoints::catalog::delete_video),
        )
        .merge(admin)
        .merge(doctor)
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // Unprotected routes (rate-limited only, no auth required)
    let unprotected = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/auth/register", post(endpoints::accounts::register))
        .route("/auth/login", post(endpoints::accounts::login))
        .route(
            "/auth/forgot-password",
            post(endpoints::accounts::forgot_password),
        )
        .route("/auth/verify-email", post(endpoints::accounts::verify_email))
        .route(
            "/auth/reset-password",
            post(endpoints::accounts::reset_password),
        )
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // Email links and stored files. URLs are unguessable; no bearer token.
    let links = Router::new()
        .route("/auth/action", get(endpoints::accounts::email_action))
        .route("/files/*key", get(endpoints::files::download))
        .with_state(ctx.clone())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // WebSocket upgrade route (ticket-based auth, rate-limited)
    let ws_routes = Router::new()
        .route("/ws/connect", get(websocket::ws_upgrade))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", protected)
        .nest("/api", unprotected)
        .merge(links)
        .merge(ws_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
}
