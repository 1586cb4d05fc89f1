//! Role-based routing for signed-in identities.
//!
//! Every auth-state change produces `Loading` followed by exactly one
//! `Ready` decision. Only admins and doctors get a workspace; anything
//! else (missing profile, patient, unknown role, lookup failure) is
//! access denied.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::AuthUser;
use crate::config::collections;
use crate::db::{CollectionPath, DatabaseError, DocumentStore};
use crate::models::{Record, Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Admin,
    Doctor,
    SignedOut,
    AccessDenied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "route", rename_all = "snake_case")]
pub enum ViewState {
    Loading,
    Ready(RouteDecision),
}

pub fn load_profile(store: &dyn DocumentStore, uid: &str) -> Result<Option<User>, DatabaseError> {
    let path = CollectionPath::new(collections::USERS).doc(uid);
    store
        .get(&path)?
        .map(|doc| User::from_document(&doc))
        .transpose()
}

pub fn resolve_route(store: &dyn DocumentStore, identity: Option<&AuthUser>) -> RouteDecision {
    let Some(user) = identity else {
        return RouteDecision::SignedOut;
    };
    match load_profile(store, &user.uid) {
        Ok(Some(profile)) => match profile.role {
            Some(Role::Admin) => RouteDecision::Admin,
            Some(Role::Doctor) => RouteDecision::Doctor,
            _ => {
                tracing::info!(uid = %user.uid, role = ?profile.role, "No workspace for role");
                RouteDecision::AccessDenied
            }
        },
        Ok(None) => {
            tracing::warn!(uid = %user.uid, "Signed in without a profile document");
            RouteDecision::AccessDenied
        }
        Err(e) => {
            tracing::error!(uid = %user.uid, error = %e, "Profile lookup failed");
            RouteDecision::AccessDenied
        }
    }
}

/// Follow `identity` and publish view states until either side goes away.
/// The identity current at spawn time counts as the first event.
pub fn spawn_role_resolver(
    store: Arc<dyn DocumentStore>,
    mut identity: watch::Receiver<Option<AuthUser>>,
) -> (mpsc::Receiver<ViewState>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(async move {
        loop {
            let user = identity.borrow_and_update().clone();
            if tx.send(ViewState::Loading).await.is_err() {
                break;
            }
            let decision = resolve_route(store.as_ref(), user.as_ref());
            if tx.send(ViewState::Ready(decision)).await.is_err() {
                break;
            }
            if identity.changed().await.is_err() {
                break;
            }
        }
        tracing::debug!("Role resolver stopped");
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSession;
    use crate::db::MemoryStore;
    use serde_json::json;

    fn identity(uid: &str) -> AuthUser {
        AuthUser {
            uid: uid.into(),
            email: format!("{uid}@clinic.kz"),
            email_verified: true,
        }
    }

    fn store_with_profiles() -> Arc<dyn DocumentStore> {
        let store = MemoryStore::new();
        let users = CollectionPath::new(collections::USERS);
        store.set(&users.doc("admin"), json!({"role": "Admin"})).unwrap();
        store.set(&users.doc("doc"), json!({"type": "Doctor"})).unwrap();
        store.set(&users.doc("pat"), json!({"type": "Patient"})).unwrap();
        store.set(&users.doc("odd"), json!({"role": "Janitor"})).unwrap();
        Arc::new(store)
    }

    #[test]
    fn roles_map_to_routes() {
        let store = store_with_profiles();
        let route = |uid: &str| resolve_route(store.as_ref(), Some(&identity(uid)));
        assert_eq!(route("admin"), RouteDecision::Admin);
        assert_eq!(route("doc"), RouteDecision::Doctor);
        assert_eq!(route("pat"), RouteDecision::AccessDenied);
        assert_eq!(route("odd"), RouteDecision::AccessDenied);
        assert_eq!(route("ghost"), RouteDecision::AccessDenied);
        assert_eq!(resolve_route(store.as_ref(), None), RouteDecision::SignedOut);
    }

    #[test]
    fn malformed_profile_is_access_denied() {
        let store = MemoryStore::new();
        store
            .set(&CollectionPath::new(collections::USERS).doc("u"), json!({"email": 42}))
            .unwrap();
        assert_eq!(
            resolve_route(&store, Some(&identity("u"))),
            RouteDecision::AccessDenied
        );
    }

    #[tokio::test]
    async fn each_auth_change_yields_loading_then_one_decision() {
        let session = AuthSession::new();
        let (mut states, handle) = spawn_role_resolver(store_with_profiles(), session.subscribe());

        assert_eq!(states.recv().await, Some(ViewState::Loading));
        assert_eq!(states.recv().await, Some(ViewState::Ready(RouteDecision::SignedOut)));

        session.set(identity("doc"));
        assert_eq!(states.recv().await, Some(ViewState::Loading));
        assert_eq!(states.recv().await, Some(ViewState::Ready(RouteDecision::Doctor)));

        session.sign_out();
        assert_eq!(states.recv().await, Some(ViewState::Loading));
        assert_eq!(states.recv().await, Some(ViewState::Ready(RouteDecision::SignedOut)));

        drop(session);
        assert_eq!(states.recv().await, None);
        handle.await.unwrap();
    }

    #[test]
    fn view_state_wire_format() {
        let json = serde_json::to_value(ViewState::Ready(RouteDecision::AccessDenied)).unwrap();
        assert_eq!(json, json!({"state": "ready", "route": "access_denied"}));
        let json = serde_json::to_value(ViewState::Loading).unwrap();
        assert_eq!(json, json!({"state": "loading"}));
    }
}
