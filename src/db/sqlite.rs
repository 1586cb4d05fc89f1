use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::path::DocPath;
use super::store::{
    resolve_write, ChangeEvent, ChangeKind, Document, DocumentStore, Query, Scope, WriteBatch,
    CHANGE_CHANNEL_CAPACITY,
};
use super::DatabaseError;

/// Persistent document store: one SQLite row per document.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    /// Open the store at the given path and run migrations
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::from_connection(open_database(path)?)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(open_memory_database()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![
        (1, include_str!("../../resources/migrations/001_documents.sql")),
        (2, include_str!("../../resources/migrations/002_document_seq_index.sql")),
    ];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| DatabaseError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get::<_, i64>(0),
    )
    .unwrap_or(0)
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

struct DocumentRow {
    path: String,
    data: String,
    seq: i64,
    created_at: String,
    updated_at: String,
}

const SELECT_COLUMNS: &str = "SELECT path, data, seq, created_at, updated_at FROM documents";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        path: row.get(0)?,
        data: row.get(1)?,
        seq: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn document_from_row(row: DocumentRow) -> Result<Document, DatabaseError> {
    let data: Map<String, Value> = serde_json::from_str(&row.data)?;
    Ok(Document {
        path: DocPath::parse(&row.path)?,
        data,
        create_time: parse_time(&row.created_at),
        update_time: parse_time(&row.updated_at),
        seq: row.seq as u64,
    })
}

fn load_document(tx: &Transaction<'_>, path: &DocPath) -> Result<Option<Document>, DatabaseError> {
    let row = tx
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE path = ?1"),
            params![path.to_string()],
            read_row,
        )
        .optional()?;
    row.map(document_from_row).transpose()
}

fn next_seq(tx: &Transaction<'_>) -> Result<u64, DatabaseError> {
    let seq: i64 = tx.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM documents", [], |row| {
        row.get(0)
    })?;
    Ok(seq as u64)
}

fn upsert(tx: &Transaction<'_>, doc: &Document) -> Result<(), DatabaseError> {
    let parent = doc.path.parent();
    tx.execute(
        "INSERT INTO documents (path, collection, group_id, doc_id, data, seq, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![
            doc.path.to_string(),
            parent.to_string(),
            parent.id(),
            doc.id(),
            serde_json::to_string(&doc.data)?,
            doc.seq as i64,
            doc.create_time.to_rfc3339(),
            doc.update_time.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl DocumentStore for SqliteStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>, DatabaseError> {
        path.validate()?;
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE path = ?1"),
                params![path.to_string()],
                read_row,
            )
            .optional()?;
        row.map(document_from_row).transpose()
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>, DatabaseError> {
        let (sql, key) = match &query.scope {
            Scope::Collection(collection) => {
                collection.validate()?;
                (format!("{SELECT_COLUMNS} WHERE collection = ?1"), collection.to_string())
            }
            Scope::Group(id) => (format!("{SELECT_COLUMNS} WHERE group_id = ?1"), id.clone()),
        };

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![key], read_row)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(document_from_row(row?)?);
        }
        Ok(query.apply(docs))
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), DatabaseError> {
        if batch.is_empty() {
            return Ok(());
        }
        let now = self.server_time();
        let mut conn = self.lock()?;
        // Dropping the transaction on an early return rolls everything back.
        let tx = conn.transaction()?;
        let mut events = Vec::new();

        for op in batch.into_ops() {
            let path = op.path().clone();
            let existing = load_document(&tx, &path)?;
            let seq = match existing {
                Some(_) => 0,
                None => next_seq(&tx)?,
            };
            match resolve_write(existing.as_ref(), &op, now, seq)? {
                Some(doc) => {
                    upsert(&tx, &doc)?;
                    events.push(ChangeEvent {
                        path,
                        kind: ChangeKind::Written,
                    });
                }
                None => {
                    tx.execute("DELETE FROM documents WHERE path = ?1", params![path.to_string()])?;
                    events.push(ChangeEvent {
                        path,
                        kind: ChangeKind::Deleted,
                    });
                }
            }
        }

        tx.commit()?;
        drop(conn);

        for event in events {
            let _ = self.changes.send(event);
        }
        Ok(())
    }

    fn descendants(&self, path: &DocPath) -> Result<Vec<DocPath>, DatabaseError> {
        path.validate()?;
        let prefix = format!("{path}/");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT path FROM documents WHERE substr(path, 1, length(?1)) = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(DocPath::parse(&row?)?);
        }
        Ok(paths)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

/// Count tables in the database (for verification)
pub fn count_tables(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::path::CollectionPath;
    use crate::db::store::Direction;
    use serde_json::json;

    #[test]
    fn database_initializes_all_tables() {
        let conn = open_memory_database().unwrap();
        let count = count_tables(&conn).unwrap();
        assert_eq!(count, 2, "Expected documents + schema_version, got {count}");
    }

    #[test]
    fn schema_version_is_current() {
        let conn = open_memory_database().unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn migration_idempotent() {
        let conn = open_memory_database().unwrap();
        // Run migrations again: should not error
        let result = run_migrations(&conn);
        assert!(result.is_ok());
    }

    #[test]
    fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rehabcare.db");
        let path = CollectionPath::new("User").doc("u1");
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.set(&path, json!({"email": "doc@example.com", "role": "Doctor"})).unwrap();
        }
        let store = SqliteStore::open(&db_path).unwrap();
        let doc = store.get(&path).unwrap().unwrap();
        assert_eq!(doc.get_str("role"), Some("Doctor"));
    }

    #[test]
    fn failed_batch_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch
            .set(CollectionPath::new("User").doc("u1"), json!({"role": "Patient"}))
            .update(CollectionPath::new("Patient").doc("u1"), json!({"folderId": "f"}));

        assert!(store.commit(batch).is_err());
        assert!(store.get(&CollectionPath::new("User").doc("u1")).unwrap().is_none());
    }

    #[test]
    fn merge_preserves_creation_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let folders = CollectionPath::new("video_folders");
        let first = store.add(&folders, json!({"name": "Shoulder"})).unwrap();
        store.add(&folders, json!({"name": "Spine"})).unwrap();
        store.merge(&first, json!({"name": "Shoulder (rev.)"})).unwrap();

        let docs = store.query(&Query::collection(folders)).unwrap();
        assert_eq!(docs[0].get_str("name"), Some("Shoulder (rev.)"));
        assert_eq!(docs[0].seq, 1);
    }

    #[test]
    fn descendants_do_not_match_sibling_prefixes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let users = CollectionPath::new("users");
        store
            .add(&users.doc("p1").collection("medicines"), json!({"name": "Aspirin"}))
            .unwrap();
        store
            .add(&users.doc("p10").collection("medicines"), json!({"name": "Ibuprofen"}))
            .unwrap();

        let found = store.descendants(&users.doc("p1")).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn group_query_and_ordering() {
        let store = SqliteStore::open_in_memory().unwrap();
        let messages = CollectionPath::new("chat").doc("a_b").collection("message");
        store
            .add(&messages, json!({"createdAt": "2025-05-01T10:00:01Z", "text": "second"}))
            .unwrap();
        store
            .add(&messages, json!({"createdAt": "2025-05-01T10:00:00Z", "text": "first"}))
            .unwrap();

        let ordered = store
            .query(&Query::group("message").order_by("createdAt", Direction::Ascending))
            .unwrap();
        assert_eq!(ordered[0].get_str("text"), Some("first"));
        assert_eq!(ordered.len(), 2);
    }
}
