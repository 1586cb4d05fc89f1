//! Shared types for the HTTP API layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::auth::{AuthSession, AuthUser};
use crate::core_state::CoreState;
use crate::models::Role;

/// Bearer tokens expire this long after login.
const SESSION_TTL: Duration = Duration::from_secs(12 * 3600);

/// WebSocket upgrade tickets are valid this long.
const WS_TICKET_TTL: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
/// Wraps `CoreState` plus API-specific caches.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub sessions: Arc<Mutex<SessionRegistry>>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub ws_tickets: Arc<Mutex<WsTicketStore>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self {
            core,
            sessions: Arc::new(Mutex::new(SessionRegistry::new())),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new())),
            ws_tickets: Arc::new(Mutex::new(WsTicketStore::new())),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Session context: injected by auth middleware
// ═══════════════════════════════════════════════════════════

/// Signed-in staff member behind a bearer token.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub uid: String,
    pub email: String,
    pub role: Role,
    /// Identity feed for this login; signed out on logout.
    pub auth: Arc<AuthSession>,
}

impl SessionContext {
    pub fn identity(&self) -> AuthUser {
        AuthUser {
            uid: self.uid.clone(),
            email: self.email.clone(),
            email_verified: true,
        }
    }
}

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Generate a random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ═══════════════════════════════════════════════════════════
// Session registry: bearer tokens by hash
// ═══════════════════════════════════════════════════════════

struct SessionEntry {
    context: SessionContext,
    expires_at: Instant,
}

/// Active logins. Only token hashes are kept.
pub struct SessionRegistry {
    sessions: HashMap<[u8; 32], SessionEntry>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            ttl: SESSION_TTL,
        }
    }

    /// Register a login and return its bearer token.
    pub fn issue(&mut self, context: SessionContext) -> String {
        self.cleanup();
        let token = generate_token();
        self.sessions.insert(
            hash_token(&token),
            SessionEntry {
                context,
                expires_at: Instant::now() + self.ttl,
            },
        );
        token
    }

    pub fn validate(&self, token: &str) -> Option<SessionContext> {
        let entry = self.sessions.get(&hash_token(token))?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.context.clone())
    }

    /// End a login. Its identity feed reports signed out.
    pub fn revoke(&mut self, token: &str) -> Option<SessionContext> {
        let entry = self.sessions.remove(&hash_token(token))?;
        entry.context.auth.sign_out();
        Some(entry.context)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        self.sessions.retain(|_, entry| {
            let live = now < entry.expires_at;
            if !live {
                entry.context.auth.sign_out();
            }
            live
        });
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: per-client sliding window
// ═══════════════════════════════════════════════════════════

/// Per-client rate limiter with per-minute and per-hour limits.
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
            per_minute: 120,
            per_hour: 2000,
        }
    }

    /// Check if a client is within rate limits. Returns `Ok(())` or
    /// `Err(retry_after_secs)` if exceeded.
    pub fn check(&mut self, client: &str) -> Result<(), u64> {
        let now = Instant::now();
        let entries = self.windows.entry(client.to_string()).or_default();

        entries.retain(|ts| now.duration_since(*ts) < Duration::from_secs(3600));

        let last_minute = entries
            .iter()
            .filter(|ts| now.duration_since(**ts) < Duration::from_secs(60))
            .count() as u32;
        if last_minute >= self.per_minute {
            return Err(60);
        }

        if entries.len() as u32 >= self.per_hour {
            return Err(3600);
        }

        entries.push(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// WS ticket store: one-time WebSocket upgrade tokens
// ═══════════════════════════════════════════════════════════

/// One-time WebSocket upgrade ticket. Keeps the bearer token out of
/// WS query params.
struct WsTicket {
    session: SessionContext,
    expires_at: Instant,
}

pub struct WsTicketStore {
    tickets: HashMap<String, WsTicket>,
}

impl WsTicketStore {
    pub fn new() -> Self {
        Self {
            tickets: HashMap::new(),
        }
    }

    pub fn issue(&mut self, session: SessionContext) -> String {
        self.cleanup();
        let ticket = uuid::Uuid::new_v4().to_string();
        self.tickets.insert(
            ticket.clone(),
            WsTicket {
                session,
                expires_at: Instant::now() + WS_TICKET_TTL,
            },
        );
        ticket
    }

    /// Consume a ticket (one-time use).
    pub fn consume(&mut self, ticket: &str) -> Option<SessionContext> {
        let entry = self.tickets.remove(ticket)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.session)
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        self.tickets.retain(|_, t| now < t.expires_at);
    }
}

impl Default for WsTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(uid: &str) -> SessionContext {
        let auth = Arc::new(AuthSession::new());
        let ctx = SessionContext {
            uid: uid.into(),
            email: format!("{uid}@clinic.kz"),
            role: Role::Doctor,
            auth: auth.clone(),
        };
        auth.set(ctx.identity());
        ctx
    }

    #[test]
    fn generate_token_is_unique() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
        assert!(!t1.is_empty());
    }

    #[test]
    fn hash_token_is_deterministic() {
        assert_eq!(hash_token("test"), hash_token("test"));
        assert_ne!(hash_token("token-a"), hash_token("token-b"));
    }

    #[test]
    fn issued_token_validates_until_revoked() {
        let mut registry = SessionRegistry::new();
        let ctx = context("d1");
        let token = registry.issue(ctx.clone());

        assert_eq!(registry.validate(&token).unwrap().uid, "d1");
        assert!(registry.validate("not-a-token").is_none());

        assert!(registry.revoke(&token).is_some());
        assert!(registry.validate(&token).is_none());
        assert!(ctx.auth.current().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn expired_session_is_rejected() {
        let mut registry = SessionRegistry {
            sessions: HashMap::new(),
            ttl: Duration::ZERO,
        };
        let token = registry.issue(context("d1"));
        assert!(registry.validate(&token).is_none());
    }

    #[test]
    fn rate_limiter_rejects_over_per_minute() {
        let mut limiter = RateLimiter {
            windows: HashMap::new(),
            per_minute: 2,
            per_hour: 1000,
        };
        assert!(limiter.check("client-1").is_ok());
        assert!(limiter.check("client-1").is_ok());
        assert_eq!(limiter.check("client-1"), Err(60));
        assert!(limiter.check("client-2").is_ok());
    }

    #[test]
    fn ws_ticket_is_single_use() {
        let mut store = WsTicketStore::new();
        let ticket = store.issue(context("d1"));
        assert_eq!(store.consume(&ticket).unwrap().uid, "d1");
        assert!(store.consume(&ticket).is_none());
        assert!(store.consume("nonexistent").is_none());
    }

    #[test]
    fn ws_ticket_expires() {
        let mut store = WsTicketStore::new();
        store.tickets.insert(
            "expired-ticket".to_string(),
            WsTicket {
                session: context("d1"),
                expires_at: Instant::now() - Duration::from_secs(1),
            },
        );
        assert!(store.consume("expired-ticket").is_none());
    }
}
