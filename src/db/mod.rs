pub mod memory;
pub mod path;
pub mod sqlite;
pub mod store;
pub mod subscription;

pub use memory::MemoryStore;
pub use path::{CollectionPath, DocPath};
pub use sqlite::SqliteStore;
pub use store::*;
pub use subscription::QuerySubscription;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Document encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("Document body must be a JSON object: {0}")]
    NotAnObject(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}
