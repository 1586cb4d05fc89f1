//! Document store abstraction.
//!
//! Services talk to the database only through `DocumentStore`. The trait
//! has two implementations: `MemoryStore` (tests, ephemeral runs) and
//! `SqliteStore` (persistent). Multi-document writes go through a
//! `WriteBatch`, which both stores apply atomically.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::path::{CollectionPath, DocPath};
use super::DatabaseError;

// ═══════════════════════════════════════════
// Documents
// ═══════════════════════════════════════════

/// A stored document with store-assigned metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub data: Map<String, Value>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    /// Monotonic creation sequence. Breaks ordering ties.
    pub seq: u64,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.data.get(field).and_then(Value::as_bool)
    }

    /// Deserialize the body into a model. The document id is exposed to
    /// the model as an `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DatabaseError> {
        let mut data = self.data.clone();
        data.insert("id".into(), Value::String(self.id().to_string()));
        Ok(serde_json::from_value(Value::Object(data))?)
    }
}

/// Serialize a model into a document body, dropping the `id` field
/// (ids live in the path, not in the body).
pub fn to_fields<T: Serialize>(value: &T) -> Result<Value, DatabaseError> {
    let mut body = serde_json::to_value(value)?;
    match body.as_object_mut() {
        Some(map) => {
            map.remove("id");
            Ok(body)
        }
        None => Err(DatabaseError::NotAnObject(body.to_string())),
    }
}

// ═══════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Which documents a query ranges over.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Direct children of one collection.
    Collection(CollectionPath),
    /// Every collection with this id, at any depth.
    Group(String),
}

/// Equality filters, one optional ordering field, optional limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub scope: Scope,
    filters: Vec<(String, Value)>,
    order: Option<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            scope: Scope::Collection(collection),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn group(collection_id: impl Into<String>) -> Self {
        Self {
            scope: Scope::Group(collection_id.into()),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a write to `path` can change this query's result.
    pub fn matches_path(&self, path: &DocPath) -> bool {
        let parent = path.parent();
        match &self.scope {
            Scope::Collection(collection) => &parent == collection,
            Scope::Group(id) => parent.id() == id,
        }
    }

    /// Filter, sort and truncate a candidate set already restricted to scope.
    pub(crate) fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        docs.retain(|doc| {
            self.filters
                .iter()
                .all(|(field, expected)| doc.data.get(field) == Some(expected))
        });

        match &self.order {
            Some((field, direction)) => docs.sort_by(|a, b| {
                let ord = compare_values(a.data.get(field), b.data.get(field))
                    .then(a.seq.cmp(&b.seq));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            }),
            None => docs.sort_by_key(|doc| doc.seq),
        }

        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

/// Total order over JSON field values: missing/null < bool < number < string.
/// Strings that both parse as RFC 3339 timestamps compare chronologically.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

// ═══════════════════════════════════════════
// Write batches
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Create or overwrite the whole document.
    Set { path: DocPath, data: Value },
    /// Create, or overwrite only the given top-level fields.
    Merge { path: DocPath, data: Value },
    /// Overwrite the given top-level fields. The document must exist.
    Update { path: DocPath, data: Value },
    Delete { path: DocPath },
}

impl WriteOp {
    pub fn path(&self) -> &DocPath {
        match self {
            WriteOp::Set { path, .. }
            | WriteOp::Merge { path, .. }
            | WriteOp::Update { path, .. }
            | WriteOp::Delete { path } => path,
        }
    }
}

/// Ordered set of writes committed all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocPath, data: Value) -> &mut Self {
        self.ops.push(WriteOp::Set { path, data });
        self
    }

    pub fn merge(&mut self, path: DocPath, data: Value) -> &mut Self {
        self.ops.push(WriteOp::Merge { path, data });
        self
    }

    pub fn update(&mut self, path: DocPath, data: Value) -> &mut Self {
        self.ops.push(WriteOp::Update { path, data });
        self
    }

    pub fn delete(&mut self, path: DocPath) -> &mut Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

fn into_object(path: &DocPath, data: &Value) -> Result<Map<String, Value>, DatabaseError> {
    data.as_object()
        .cloned()
        .ok_or_else(|| DatabaseError::NotAnObject(path.to_string()))
}

/// Compute the state of one document after applying `op`.
///
/// `seq` is the sequence to assign if the op creates the document.
/// Returns `None` when the document ends up deleted.
pub(crate) fn resolve_write(
    existing: Option<&Document>,
    op: &WriteOp,
    now: DateTime<Utc>,
    seq: u64,
) -> Result<Option<Document>, DatabaseError> {
    let path = op.path();
    path.validate()?;

    let fresh = |data: Map<String, Value>| Document {
        path: path.clone(),
        data,
        create_time: existing.map(|d| d.create_time).unwrap_or(now),
        update_time: now,
        seq: existing.map(|d| d.seq).unwrap_or(seq),
    };

    match op {
        WriteOp::Set { data, .. } => Ok(Some(fresh(into_object(path, data)?))),
        WriteOp::Merge { data, .. } => {
            let mut merged = existing.map(|d| d.data.clone()).unwrap_or_default();
            merged.extend(into_object(path, data)?);
            Ok(Some(fresh(merged)))
        }
        WriteOp::Update { data, .. } => {
            let current = existing.ok_or_else(|| DatabaseError::NotFound {
                entity_type: path.parent().to_string(),
                id: path.id().to_string(),
            })?;
            let mut merged = current.data.clone();
            merged.extend(into_object(path, data)?);
            Ok(Some(fresh(merged)))
        }
        WriteOp::Delete { .. } => Ok(None),
    }
}

// ═══════════════════════════════════════════
// Change notification
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Written,
    Deleted,
}

/// Published after every committed write, one event per touched document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub path: DocPath,
    pub kind: ChangeKind,
}

/// Capacity of the change channel. Slow subscribers that fall further
/// behind than this re-query instead of replaying.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

// ═══════════════════════════════════════════
// Store trait
// ═══════════════════════════════════════════

pub trait DocumentStore: Send + Sync {
    fn get(&self, path: &DocPath) -> Result<Option<Document>, DatabaseError>;

    fn query(&self, query: &Query) -> Result<Vec<Document>, DatabaseError>;

    /// Apply every op in order, or none of them.
    fn commit(&self, batch: WriteBatch) -> Result<(), DatabaseError>;

    /// Every document stored below `path`, at any depth.
    fn descendants(&self, path: &DocPath) -> Result<Vec<DocPath>, DatabaseError>;

    /// Subscribe to committed changes.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Timestamp used for server-assigned fields such as `createdAt`.
    fn server_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn set(&self, path: &DocPath, data: Value) -> Result<(), DatabaseError> {
        let mut batch = WriteBatch::new();
        batch.set(path.clone(), data);
        self.commit(batch)
    }

    fn merge(&self, path: &DocPath, data: Value) -> Result<(), DatabaseError> {
        let mut batch = WriteBatch::new();
        batch.merge(path.clone(), data);
        self.commit(batch)
    }

    fn update(&self, path: &DocPath, data: Value) -> Result<(), DatabaseError> {
        let mut batch = WriteBatch::new();
        batch.update(path.clone(), data);
        self.commit(batch)
    }

    fn delete(&self, path: &DocPath) -> Result<(), DatabaseError> {
        let mut batch = WriteBatch::new();
        batch.delete(path.clone());
        self.commit(batch)
    }

    /// Create a document with a generated id.
    fn add(&self, collection: &CollectionPath, data: Value) -> Result<DocPath, DatabaseError> {
        let path = collection.doc(uuid::Uuid::new_v4().simple().to_string());
        self.set(&path, data)?;
        Ok(path)
    }

    /// Delete a document together with everything nested under it.
    /// Returns the number of documents removed (including absent `path`).
    fn delete_recursive(&self, path: &DocPath) -> Result<usize, DatabaseError> {
        let mut batch = WriteBatch::new();
        for child in self.descendants(path)? {
            batch.delete(child);
        }
        batch.delete(path.clone());
        let count = batch.len();
        self.commit(batch)?;
        Ok(count)
    }

    fn count(&self, query: &Query) -> Result<usize, DatabaseError> {
        Ok(self.query(query)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, seq: u64, data: Value) -> Document {
        let now = Utc::now();
        Document {
            path: CollectionPath::new("c").doc(id),
            data: data.as_object().cloned().unwrap(),
            create_time: now,
            update_time: now,
            seq,
        }
    }

    #[test]
    fn timestamps_with_mixed_precision_sort_chronologically() {
        let a = json!("2025-03-01T10:00:00Z");
        let b = json!("2025-03-01T10:00:00.500Z");
        assert_eq!(compare_values(Some(&a), Some(&b)), Ordering::Less);
    }

    #[test]
    fn missing_fields_sort_first() {
        let v = json!(1);
        assert_eq!(compare_values(None, Some(&v)), Ordering::Less);
    }

    #[test]
    fn apply_filters_orders_and_limits() {
        let docs = vec![
            doc("a", 1, json!({"doctorUid": "d1", "firstName": "Zarina"})),
            doc("b", 2, json!({"doctorUid": "d2", "firstName": "Aibek"})),
            doc("c", 3, json!({"doctorUid": "d1", "firstName": "Asel"})),
        ];
        let query = Query::collection(CollectionPath::new("c"))
            .where_eq("doctorUid", "d1")
            .order_by("firstName", Direction::Ascending);
        let ids: Vec<_> = query.apply(docs.clone()).iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let limited = Query::collection(CollectionPath::new("c"))
            .order_by("firstName", Direction::Descending)
            .limit(1)
            .apply(docs);
        assert_eq!(limited[0].id(), "a");
    }

    #[test]
    fn equal_sort_keys_fall_back_to_sequence() {
        let docs = vec![
            doc("late", 9, json!({"createdAt": "2025-01-01T00:00:00Z"})),
            doc("early", 4, json!({"createdAt": "2025-01-01T00:00:00Z"})),
        ];
        let sorted = Query::collection(CollectionPath::new("c"))
            .order_by("createdAt", Direction::Ascending)
            .apply(docs);
        assert_eq!(sorted[0].id(), "early");
    }

    #[test]
    fn update_of_missing_document_is_not_found() {
        let op = WriteOp::Update {
            path: CollectionPath::new("Patient").doc("p1"),
            data: json!({"folderId": "f1"}),
        };
        let err = resolve_write(None, &op, Utc::now(), 1).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn merge_keeps_untouched_fields_and_creation_metadata() {
        let existing = doc("p1", 7, json!({"name": "A", "tel": "1"}));
        let op = WriteOp::Merge {
            path: existing.path.clone(),
            data: json!({"tel": "2"}),
        };
        let merged = resolve_write(Some(&existing), &op, Utc::now(), 99)
            .unwrap()
            .unwrap();
        assert_eq!(merged.get_str("name"), Some("A"));
        assert_eq!(merged.get_str("tel"), Some("2"));
        assert_eq!(merged.seq, 7);
        assert_eq!(merged.create_time, existing.create_time);
    }

    #[test]
    fn set_rejects_non_object_bodies() {
        let op = WriteOp::Set {
            path: CollectionPath::new("c").doc("x"),
            data: json!([1, 2]),
        };
        assert!(matches!(
            resolve_write(None, &op, Utc::now(), 1),
            Err(DatabaseError::NotAnObject(_))
        ));
    }
}
