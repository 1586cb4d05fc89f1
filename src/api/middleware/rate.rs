//! Per-caller rate limiting middleware.
//!
//! Sliding-window limits of 120 requests per minute and 2000 per hour.
//! Signed-in callers share one bucket per account, whichever token they
//! use. Everyone else is bucketed by peer address when the server exposes
//! it, else in one shared anonymous bucket. Unknown tokens count as
//! anonymous so rotating junk tokens gains nothing.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::middleware::auth::bearer_token;
use crate::api::types::ApiContext;

/// Bucket key for one request.
fn rate_key(ctx: &ApiContext, req: &Request<axum::body::Body>) -> Result<String, ApiError> {
    if let Some(token) = bearer_token(req.headers()) {
        let sessions = ctx
            .sessions
            .lock()
            .map_err(|_| ApiError::Internal("session lock".into()))?;
        if let Some(session) = sessions.validate(&token) {
            return Ok(format!("uid:{}", session.uid));
        }
    }
    Ok(match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_string(),
    })
}

/// Returns 429 once the caller's window is full.
pub async fn limit(
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let key = rate_key(&ctx, &req)?;

    // MutexGuard is !Send, drop before .await
    {
        let mut limiter = ctx
            .rate_limiter
            .lock()
            .map_err(|_| ApiError::Internal("rate limiter lock".into()))?;

        if let Err(retry_after) = limiter.check(&key) {
            tracing::warn!(key = %key, retry_after, "Rate limit hit");
            return Err(ApiError::RateLimited { retry_after });
        }
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use crate::api::router::api_router_with_ctx;
    use crate::api::test_support::{seed_staff, test_context};
    use crate::models::Role;

    fn request(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/me");
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn tokens_of_one_account_share_a_key() {
        let (ctx, _) = test_context();
        let (first, _) = seed_staff(&ctx, "d1", "doc@clinic.kz", Role::Doctor);
        let (second, _) = seed_staff(&ctx, "d1", "doc@clinic.kz", Role::Doctor);
        let (other, _) = seed_staff(&ctx, "d2", "doc2@clinic.kz", Role::Doctor);
        assert_ne!(first, second);

        let key = rate_key(&ctx, &request(Some(&first))).unwrap();
        assert_eq!(key, "uid:d1");
        assert_eq!(rate_key(&ctx, &request(Some(&second))).unwrap(), key);
        assert_eq!(rate_key(&ctx, &request(Some(&other))).unwrap(), "uid:d2");
    }

    #[test]
    fn unknown_callers_are_keyed_by_address() {
        let (ctx, _) = test_context();
        assert_eq!(rate_key(&ctx, &request(None)).unwrap(), "anonymous");
        assert_eq!(rate_key(&ctx, &request(Some("bogus"))).unwrap(), "anonymous");

        let mut req = request(Some("bogus"));
        let peer: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(rate_key(&ctx, &req).unwrap(), "ip:10.0.0.7");
    }

    #[tokio::test]
    async fn exhausted_account_is_limited_on_every_token() {
        let (ctx, _) = test_context();
        let (first, _) = seed_staff(&ctx, "d1", "doc@clinic.kz", Role::Doctor);
        let (second, _) = seed_staff(&ctx, "d1", "doc@clinic.kz", Role::Doctor);
        {
            let mut limiter = ctx.rate_limiter.lock().unwrap();
            while limiter.check("uid:d1").is_ok() {}
        }
        let app = api_router_with_ctx(ctx);

        for token in [&first, &second] {
            let response = app.clone().oneshot(request(Some(token))).await.unwrap();
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
    }
}
