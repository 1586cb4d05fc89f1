//! Audit logging middleware.
//!
//! Records every API request with the acting user, method, path and
//! response status. Runs innermost (after auth has injected `SessionContext`).

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::{ApiContext, SessionContext};

pub async fn log_access(
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let ctx = req.extensions().get::<ApiContext>().cloned();
    let actor = req
        .extensions()
        .get::<SessionContext>()
        .map(|s| s.uid.clone());

    let response = next.run(req).await;
    let status = response.status().as_u16();

    tracing::info!(
        actor = actor.as_deref().unwrap_or("-"),
        %method,
        %path,
        status,
        "API request"
    );
    if let Some(ctx) = ctx {
        ctx.core
            .audit()
            .log(actor.as_deref(), &method, &path, status);
    }

    response
}
