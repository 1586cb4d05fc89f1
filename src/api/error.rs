//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::accounts::AccountError;
use crate::analytics::AnalyticsError;
use crate::auth::AuthError;
use crate::catalog::CatalogError;
use crate::chat::ChatError;
use crate::core_state::CoreError;
use crate::db::DatabaseError;
use crate::directory::DirectoryError;
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Upstream unavailable: {0}")]
    Upstream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication required".to_string(),
            ),
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid email or password".to_string(),
            ),
            ApiError::Forbidden(detail) => (StatusCode::FORBIDDEN, "FORBIDDEN", detail.clone()),
            ApiError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Rate limit exceeded. Retry after {retry_after}s"),
            ),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "CONFLICT", detail.clone()),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::Upstream(detail) => {
                tracing::warn!(detail, "Upstream service failed");
                (StatusCode::BAD_GATEWAY, "UPSTREAM", detail.clone())
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

// ═══════════════════════════════════════════════════════════
// Conversions from service errors
// ═══════════════════════════════════════════════════════════

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(_) | StorageError::Empty(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidEmail(_)
            | AuthError::WeakPassword(_)
            | AuthError::InvalidActionCode => ApiError::BadRequest(err.to_string()),
            AuthError::EmailInUse(_) => ApiError::Conflict(err.to_string()),
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::UserNotFound(_) => ApiError::NotFound(err.to_string()),
            AuthError::Mail(_) => ApiError::Internal(err.to_string()),
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidIin => ApiError::BadRequest(err.to_string()),
            RegistryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::PasswordMismatch
            | AccountError::MissingField(_)
            | AccountError::IinMismatch(_)
            | AccountError::NothingToUpdate => ApiError::BadRequest(err.to_string()),
            AccountError::EmailNotVerified | AccountError::NotYourPatient(_) => {
                ApiError::Forbidden(err.to_string())
            }
            AccountError::DuplicateEmail(_) | AccountError::DuplicateIin(_) => {
                ApiError::Conflict(err.to_string())
            }
            AccountError::NotFound(_) => ApiError::NotFound(err.to_string()),
            AccountError::Auth(e) => e.into(),
            AccountError::Registry(e) => e.into(),
            AccountError::Storage(e) => e.into(),
            AccountError::Database(e) => e.into(),
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            DirectoryError::NotYourPatient(_) => ApiError::Forbidden(err.to_string()),
            DirectoryError::Database(e) => e.into(),
            DirectoryError::Storage(e) => e.into(),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::MissingField(_) => ApiError::BadRequest(err.to_string()),
            CatalogError::FolderNotFound(_)
            | CatalogError::VideoNotFound(_)
            | CatalogError::PatientNotFound(_)
            | CatalogError::UserNotFound(_) => ApiError::NotFound(err.to_string()),
            CatalogError::NotYourPatient(_) => ApiError::Forbidden(err.to_string()),
            CatalogError::AssignmentConflict { .. } | CatalogError::AlreadyAttached(_) => {
                ApiError::Conflict(err.to_string())
            }
            CatalogError::Storage(e) => e.into(),
            CatalogError::Database(e) => e.into(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyText
            | ChatError::EmptyAttachment
            | ChatError::InvalidDuration(_)
            | ChatError::InvalidParticipant(_) => ApiError::BadRequest(err.to_string()),
            ChatError::NotYourPatient(_) => ApiError::Forbidden(err.to_string()),
            ChatError::Directory(e) => e.into(),
            ChatError::Storage(e) => e.into(),
            ChatError::Database(e) => e.into(),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::NotYourPatient(_) => ApiError::Forbidden(err.to_string()),
            AnalyticsError::Export(e) => ApiError::Internal(e.to_string()),
            AnalyticsError::Directory(e) => e.into(),
            AnalyticsError::Database(e) => e.into(),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("Malformed upload: {err}"))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {err}"))
    }
}
