//! Authentication provider.
//!
//! `AuthProvider` owns credentials and email verification; it knows
//! nothing about roles or profiles, which live in the document store.
//! `AuthSession` holds the signed-in identity of one client and
//! broadcasts changes to it.

pub mod local;
pub mod mailer;
pub mod password;

pub use local::LocalAuthProvider;
pub use mailer::{Email, EmailKind, LogMailer, Mailer, MemoryMailer};

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::db::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),
    #[error("An account already exists for {0}")]
    EmailInUse(String),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("No account found for {0}")]
    UserNotFound(String),
    #[error("Action code is invalid or expired")]
    InvalidActionCode,
    #[error("Mail delivery failed: {0}")]
    Mail(String),
    #[error("Auth storage error: {0}")]
    Database(#[from] DatabaseError),
}

/// Identity as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub email_verified: bool,
}

pub trait AuthProvider: Send + Sync {
    /// Create an account. Never signs anyone in.
    fn create_user(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    /// Check credentials. Unverified accounts are returned as-is; callers
    /// decide what an unverified sign-in means.
    fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    fn send_email_verification(&self, user: &AuthUser) -> Result<(), AuthError>;

    fn confirm_email(&self, code: &str) -> Result<AuthUser, AuthError>;

    fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    fn confirm_password_reset(&self, code: &str, new_password: &str) -> Result<(), AuthError>;

    fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>, AuthError>;

    fn get_user(&self, uid: &str) -> Result<Option<AuthUser>, AuthError>;

    fn delete_user(&self, uid: &str) -> Result<(), AuthError>;
}

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

/// Lowercase and trim; rejects strings that do not look like an address.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let normalized = email.trim().to_lowercase();
    if EMAIL_PATTERN.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(AuthError::InvalidEmail(email.trim().to_string()))
    }
}

// ═══════════════════════════════════════════
// Session
// ═══════════════════════════════════════════

/// Signed-in identity of one client.
///
/// Every change is observable through `subscribe`; the role resolver
/// listens here.
#[derive(Debug)]
pub struct AuthSession {
    state: watch::Sender<Option<AuthUser>>,
}

impl AuthSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }

    pub fn set(&self, user: AuthUser) {
        self.state.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        self.state.send_replace(None);
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}
