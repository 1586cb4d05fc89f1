//! Outgoing account emails.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    VerifyEmail,
    PasswordReset,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub to: String,
    pub kind: EmailKind,
    pub subject: String,
    pub body: String,
    /// One-time code embedded in the link.
    pub action_code: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: Email) -> Result<(), AuthError>;
}

/// Writes emails to the log. Default for local deployments without SMTP.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, email: Email) -> Result<(), AuthError> {
        tracing::info!(to = %email.to, kind = ?email.kind, subject = %email.subject, "Outgoing email");
        tracing::debug!(body = %email.body, "Email body");
        Ok(())
    }
}

/// Keeps every sent email in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Most recent email of `kind` sent to `to`.
    pub fn last_to(&self, to: &str, kind: EmailKind) -> Option<Email> {
        self.sent()
            .into_iter()
            .rev()
            .find(|email| email.to == to && email.kind == kind)
    }
}

impl Mailer for MemoryMailer {
    fn send(&self, email: Email) -> Result<(), AuthError> {
        self.outbox
            .lock()
            .map_err(|_| AuthError::Mail("outbox lock poisoned".into()))?
            .push(email);
        Ok(())
    }
}
