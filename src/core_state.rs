//! Shared application state.
//!
//! `Backend` bundles the external services every operation runs against
//! (document store, auth provider, object store, patient registry). It is
//! built once at startup from `AppConfig` and passed explicitly; tests
//! build it with in-memory fakes. `CoreState` adds process-wide state
//! owned by the HTTP layer.

use std::sync::{Arc, Mutex};

use crate::auth::{AuthProvider, LocalAuthProvider, LogMailer, Mailer, MemoryMailer};
use crate::config::{AppConfig, DataLocation};
use crate::db::{self, DocumentStore, MemoryStore, SqliteStore};
use crate::registry::{HttpPatientRegistry, PatientRegistry};
use crate::storage::{FsObjectStore, MemoryObjectStore, ObjectStore, StorageError};

/// Maximum audit buffer size; older entries are dropped beyond it.
const AUDIT_BUFFER_CAPACITY: usize = 1000;

/// Iteration count for in-memory backends.
const TEST_HASH_ITERATIONS: u32 = 1_000;

// ═══════════════════════════════════════════════════════════
// Backend
// ═══════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub objects: Arc<dyn ObjectStore>,
    pub registry: Arc<dyn PatientRegistry>,
}

impl Backend {
    /// Real services as configured: SQLite + filesystem under the data
    /// directory (or memory), log mailer, HTTP registry.
    pub fn from_config(config: &AppConfig) -> Result<Self, CoreError> {
        let (store, objects): (Arc<dyn DocumentStore>, Arc<dyn ObjectStore>) = match &config.data {
            DataLocation::Memory => {
                tracing::warn!("Running with in-memory storage; nothing will persist");
                (
                    Arc::new(MemoryStore::new()),
                    Arc::new(MemoryObjectStore::new(&config.public_url)),
                )
            }
            DataLocation::Directory(dir) => {
                std::fs::create_dir_all(dir).map_err(StorageError::from)?;
                let db_file = dir.join("rehabcare.db");
                tracing::info!(path = %db_file.display(), "Opening document store");
                (
                    Arc::new(SqliteStore::open(&db_file)?),
                    Arc::new(FsObjectStore::new(dir.join("files"), &config.public_url)?),
                )
            }
        };

        let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
        let auth = Arc::new(LocalAuthProvider::new(
            store.clone(),
            mailer,
            config.hash_iterations,
            &config.public_url,
        ));
        let registry = Arc::new(HttpPatientRegistry::new(
            &config.registry_url,
            config.registry_timeout,
        ));

        Ok(Self {
            store,
            auth,
            objects,
            registry,
        })
    }

    /// Everything in memory. The returned mailer captures outgoing email.
    pub fn in_memory(registry: Arc<dyn PatientRegistry>) -> (Self, Arc<MemoryMailer>) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mailer = Arc::new(MemoryMailer::new());
        let auth = Arc::new(LocalAuthProvider::new(
            store.clone(),
            mailer.clone(),
            TEST_HASH_ITERATIONS,
            "http://localhost",
        ));
        let backend = Self {
            store,
            auth,
            objects: Arc::new(MemoryObjectStore::new("http://localhost")),
            registry,
        };
        (backend, mailer)
    }
}

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub backend: Backend,
    pub config: AppConfig,
    audit: AuditLogger,
}

impl CoreState {
    pub fn new(backend: Backend, config: AppConfig) -> Self {
        Self {
            backend,
            config,
            audit: AuditLogger::new(),
        }
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }
}

// ═══════════════════════════════════════════════════════════
// Error types
// ═══════════════════════════════════════════════════════════

/// Errors from building shared state.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// ═══════════════════════════════════════════════════════════
// Audit logger
// ═══════════════════════════════════════════════════════════

/// A single audit log entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Acting user id, `None` for unauthenticated requests.
    pub actor: Option<String>,
    pub action: String,
    pub entity: String,
    pub status: u16,
}

/// Bounded in-memory audit trail of API access.
pub struct AuditLogger {
    buffer: Mutex<Vec<AuditEntry>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn log(&self, actor: Option<&str>, action: &str, entity: &str, status: u16) {
        if let Ok(mut buf) = self.buffer.lock() {
            if buf.len() >= AUDIT_BUFFER_CAPACITY {
                buf.remove(0);
            }
            buf.push(AuditEntry {
                timestamp: chrono::Utc::now(),
                actor: actor.map(str::to_string),
                action: action.to_string(),
                entity: entity.to_string(),
                status,
            });
        }
    }

    /// Get all buffered entries (oldest first).
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
