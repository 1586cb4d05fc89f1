//! Auth provider backed by the document store.
//!
//! Accounts live in `auth_accounts/{uid}`, one-time action codes in
//! `auth_action_codes/{code}`. Codes are consumed on first use.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::mailer::{Email, EmailKind, Mailer};
use super::password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
use super::{normalize_email, AuthError, AuthProvider, AuthUser};
use crate::config::collections;
use crate::db::{to_fields, CollectionPath, DatabaseError, DocumentStore, Query};

const VERIFY_EMAIL_TTL_HOURS: i64 = 72;
const PASSWORD_RESET_TTL_HOURS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    #[serde(default)]
    id: String,
    email: String,
    password_hash: String,
    email_verified: bool,
    created_at: DateTime<Utc>,
}

impl Account {
    fn to_user(&self) -> AuthUser {
        AuthUser {
            uid: self.id.clone(),
            email: self.email.clone(),
            email_verified: self.email_verified,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionCode {
    uid: String,
    email: String,
    kind: EmailKind,
    expires_at: DateTime<Utc>,
}

pub struct LocalAuthProvider {
    store: Arc<dyn DocumentStore>,
    mailer: Arc<dyn Mailer>,
    iterations: u32,
    public_url: String,
    /// Held across the email lookup and the account write.
    create_lock: Mutex<()>,
}

impl LocalAuthProvider {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        mailer: Arc<dyn Mailer>,
        iterations: u32,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            mailer,
            iterations,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            create_lock: Mutex::new(()),
        }
    }

    fn accounts() -> CollectionPath {
        CollectionPath::new(collections::AUTH_ACCOUNTS)
    }

    fn codes() -> CollectionPath {
        CollectionPath::new(collections::AUTH_ACTION_CODES)
    }

    fn account_by_email(&self, email: &str) -> Result<Option<Account>, AuthError> {
        let docs = self
            .store
            .query(&Query::collection(Self::accounts()).where_eq("email", email).limit(1))?;
        docs.first().map(|doc| doc.decode()).transpose().map_err(Into::into)
    }

    fn account_by_uid(&self, uid: &str) -> Result<Option<Account>, AuthError> {
        let doc = self.store.get(&Self::accounts().doc(uid))?;
        doc.map(|doc| doc.decode()).transpose().map_err(Into::into)
    }

    /// Store a fresh code and mail a link carrying it.
    fn issue_code(&self, account: &Account, kind: EmailKind) -> Result<(), AuthError> {
        let code = generate_action_code();
        let ttl = match kind {
            EmailKind::VerifyEmail => Duration::hours(VERIFY_EMAIL_TTL_HOURS),
            EmailKind::PasswordReset => Duration::hours(PASSWORD_RESET_TTL_HOURS),
        };
        let record = ActionCode {
            uid: account.id.clone(),
            email: account.email.clone(),
            kind,
            expires_at: self.store.server_time() + ttl,
        };
        self.store.set(&Self::codes().doc(&code), to_fields(&record)?)?;

        let (subject, mode) = match kind {
            EmailKind::VerifyEmail => ("Verify your email", "verifyEmail"),
            EmailKind::PasswordReset => ("Set your password", "resetPassword"),
        };
        let link = format!("{}/auth/action?mode={mode}&code={code}", self.public_url);
        self.mailer.send(Email {
            to: account.email.clone(),
            kind,
            subject: subject.to_string(),
            body: format!("Follow this link to continue: {link}"),
            action_code: code,
        })?;
        tracing::debug!(uid = %account.id, ?kind, "Action code issued");
        Ok(())
    }

    /// Look up and delete a code. Expired or mismatched codes are rejected.
    fn consume_code(&self, code: &str, kind: EmailKind) -> Result<ActionCode, AuthError> {
        let path = Self::codes().doc(code);
        if path.validate().is_err() {
            return Err(AuthError::InvalidActionCode);
        }
        let record: ActionCode = match self.store.get(&path)? {
            Some(doc) => doc.decode()?,
            None => return Err(AuthError::InvalidActionCode),
        };
        self.store.delete(&path)?;
        if record.kind != kind || record.expires_at < self.store.server_time() {
            return Err(AuthError::InvalidActionCode);
        }
        Ok(record)
    }
}

fn generate_action_code() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(MIN_PASSWORD_LENGTH));
    }
    Ok(())
}

impl AuthProvider for LocalAuthProvider {
    fn create_user(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = normalize_email(email)?;
        check_password(password)?;
        let password_hash = hash_password(password, self.iterations);

        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned)?;
        if self.account_by_email(&email)?.is_some() {
            return Err(AuthError::EmailInUse(email));
        }

        let uid = uuid::Uuid::new_v4().simple().to_string();
        let account = Account {
            id: uid.clone(),
            email,
            password_hash,
            email_verified: false,
            created_at: self.store.server_time(),
        };
        self.store.set(&Self::accounts().doc(&uid), to_fields(&account)?)?;
        tracing::info!(uid = %uid, "Auth account created");
        Ok(account.to_user())
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let account = self
            .account_by_email(&email)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, &account.password_hash) {
            tracing::warn!(uid = %account.id, "Sign-in with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(account.to_user())
    }

    fn send_email_verification(&self, user: &AuthUser) -> Result<(), AuthError> {
        let account = self
            .account_by_uid(&user.uid)?
            .ok_or_else(|| AuthError::UserNotFound(user.email.clone()))?;
        self.issue_code(&account, EmailKind::VerifyEmail)
    }

    fn confirm_email(&self, code: &str) -> Result<AuthUser, AuthError> {
        let record = self.consume_code(code, EmailKind::VerifyEmail)?;
        let mut account = self
            .account_by_uid(&record.uid)?
            .ok_or(AuthError::InvalidActionCode)?;
        self.store
            .update(&Self::accounts().doc(&record.uid), json!({"emailVerified": true}))?;
        account.email_verified = true;
        tracing::info!(uid = %record.uid, "Email verified");
        Ok(account.to_user())
    }

    fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email)?;
        let account = self
            .account_by_email(&email)?
            .ok_or_else(|| AuthError::UserNotFound(email.clone()))?;
        self.issue_code(&account, EmailKind::PasswordReset)
    }

    fn confirm_password_reset(&self, code: &str, new_password: &str) -> Result<(), AuthError> {
        check_password(new_password)?;
        let record = self.consume_code(code, EmailKind::PasswordReset)?;
        // A reset link proves control of the mailbox.
        self.store.update(
            &Self::accounts().doc(&record.uid),
            json!({
                "passwordHash": hash_password(new_password, self.iterations),
                "emailVerified": true,
            }),
        )?;
        tracing::info!(uid = %record.uid, "Password reset");
        Ok(())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>, AuthError> {
        let email = normalize_email(email)?;
        Ok(self.account_by_email(&email)?.map(|a| a.to_user()))
    }

    fn get_user(&self, uid: &str) -> Result<Option<AuthUser>, AuthError> {
        Ok(self.account_by_uid(uid)?.map(|a| a.to_user()))
    }

    fn delete_user(&self, uid: &str) -> Result<(), AuthError> {
        self.store.delete(&Self::accounts().doc(uid))?;
        tracing::info!(uid = %uid, "Auth account deleted");
        Ok(())
    }
}
