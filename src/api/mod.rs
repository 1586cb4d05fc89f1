//! HTTP and WebSocket API.
//!
//! Staff (admins and doctors) use the clinic through this surface. Routes
//! are nested under `/api/`; protected groups run behind the middleware
//! stack Rate Limit → Auth → Role guard → Audit → Handler.
//!
//! `api_router()` returns a composable `Router`; `ApiServer` binds it and
//! owns the shutdown channel.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use router::api_router;
pub use server::{start_api_server, ApiServer};
pub use types::ApiContext;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use serde_json::json;

    use crate::api::types::{ApiContext, SessionContext};
    use crate::auth::{AuthSession, AuthUser, MemoryMailer};
    use crate::config::{collections, AppConfig};
    use crate::core_state::{Backend, CoreState};
    use crate::db::CollectionPath;
    use crate::models::Role;
    use crate::registry::{RegistryRecord, StaticPatientRegistry};

    /// In-memory context whose registry knows one patient, IIN `990101300123`.
    pub(crate) fn test_context() -> (ApiContext, Arc<MemoryMailer>) {
        let registry = Arc::new(StaticPatientRegistry::new([RegistryRecord {
            iin: "990101300123".into(),
            first_name: "Aibek".into(),
            last_name: "Seitkali".into(),
            middle_name: Some("Nurlanovich".into()),
            ..Default::default()
        }]));
        let (backend, mailer) = Backend::in_memory(registry);
        let config = AppConfig::from_lookup(|_| None).expect("default config");
        let core = Arc::new(CoreState::new(backend, config));
        (ApiContext::new(core), mailer)
    }

    /// Seed a staff profile and sign it in. Returns its bearer token.
    pub(crate) fn seed_staff(
        ctx: &ApiContext,
        uid: &str,
        email: &str,
        role: Role,
    ) -> (String, SessionContext) {
        ctx.core
            .backend
            .store
            .set(
                &CollectionPath::new(collections::USERS).doc(uid),
                json!({"email": email, "role": role.as_str(), "fullName": format!("Staff {uid}")}),
            )
            .unwrap();

        let auth = Arc::new(AuthSession::new());
        auth.set(AuthUser {
            uid: uid.into(),
            email: email.into(),
            email_verified: true,
        });
        let session = SessionContext {
            uid: uid.into(),
            email: email.into(),
            role,
            auth,
        };
        let token = ctx.sessions.lock().unwrap().issue(session.clone());
        (token, session)
    }
}
