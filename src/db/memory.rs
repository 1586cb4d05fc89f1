//! In-process document store.
//!
//! Used by tests and by `REHABCARE_DATA_DIR=:memory:` runs. Writes are
//! staged per batch and only published once every op has succeeded.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::path::DocPath;
use super::store::{
    resolve_write, ChangeEvent, ChangeKind, Document, DocumentStore, Query, Scope, WriteBatch,
    CHANGE_CHANNEL_CAPACITY,
};
use super::DatabaseError;

struct State {
    docs: BTreeMap<DocPath, Document>,
    next_seq: u64,
}

pub struct MemoryStore {
    state: Mutex<State>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State {
                docs: BTreeMap::new(),
                next_seq: 1,
            }),
            changes,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, DatabaseError> {
        self.state.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Number of stored documents, across all collections.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>, DatabaseError> {
        path.validate()?;
        Ok(self.lock()?.docs.get(path).cloned())
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>, DatabaseError> {
        if let Scope::Collection(collection) = &query.scope {
            collection.validate()?;
        }
        let state = self.lock()?;
        let candidates = state
            .docs
            .values()
            .filter(|doc| query.matches_path(&doc.path))
            .cloned()
            .collect();
        Ok(query.apply(candidates))
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), DatabaseError> {
        if batch.is_empty() {
            return Ok(());
        }
        let now = self.server_time();
        let mut state = self.lock()?;

        // Stage every op first; nothing is visible until all succeed.
        let mut staged: BTreeMap<DocPath, Option<Document>> = BTreeMap::new();
        let mut events = Vec::new();
        let mut next_seq = state.next_seq;

        for op in batch.into_ops() {
            let path = op.path().clone();
            let existing = match staged.get(&path) {
                Some(pending) => pending.clone(),
                None => state.docs.get(&path).cloned(),
            };
            let result = resolve_write(existing.as_ref(), &op, now, next_seq)?;
            if existing.is_none() && result.is_some() {
                next_seq += 1;
            }
            events.push(ChangeEvent {
                path: path.clone(),
                kind: if result.is_some() {
                    ChangeKind::Written
                } else {
                    ChangeKind::Deleted
                },
            });
            staged.insert(path, result);
        }

        for (path, doc) in staged {
            match doc {
                Some(doc) => {
                    state.docs.insert(path, doc);
                }
                None => {
                    state.docs.remove(&path);
                }
            }
        }
        state.next_seq = next_seq;
        drop(state);

        for event in events {
            // No receivers is fine.
            let _ = self.changes.send(event);
        }
        Ok(())
    }

    fn descendants(&self, path: &DocPath) -> Result<Vec<DocPath>, DatabaseError> {
        path.validate()?;
        let state = self.lock()?;
        Ok(state
            .docs
            .keys()
            .filter(|candidate| candidate.is_descendant_of(path))
            .cloned()
            .collect())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::path::CollectionPath;
    use crate::db::store::Direction;
    use serde_json::json;

    #[test]
    fn set_then_get_returns_body_and_metadata() {
        let store = MemoryStore::new();
        let path = CollectionPath::new("User").doc("u1");
        store.set(&path, json!({"email": "a@b.kz"})).unwrap();

        let doc = store.get(&path).unwrap().unwrap();
        assert_eq!(doc.get_str("email"), Some("a@b.kz"));
        assert_eq!(doc.id(), "u1");
        assert_eq!(doc.seq, 1);
    }

    #[test]
    fn failed_batch_leaves_no_partial_writes() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .set(CollectionPath::new("User").doc("u1"), json!({"role": "Patient"}))
            .update(CollectionPath::new("Patient").doc("missing"), json!({"x": 1}));

        let err = store.commit(batch).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn batch_ops_see_earlier_ops_on_the_same_path() {
        let store = MemoryStore::new();
        let path = CollectionPath::new("Patient").doc("p1");
        let mut batch = WriteBatch::new();
        batch
            .set(path.clone(), json!({"name": "A"}))
            .update(path.clone(), json!({"folderId": "f1"}));
        store.commit(batch).unwrap();

        let doc = store.get(&path).unwrap().unwrap();
        assert_eq!(doc.get_str("name"), Some("A"));
        assert_eq!(doc.get_str("folderId"), Some("f1"));
    }

    #[test]
    fn group_query_spans_parents() {
        let store = MemoryStore::new();
        let chat = CollectionPath::new("chat");
        store
            .add(&chat.doc("a_b").collection("message"), json!({"text": "1"}))
            .unwrap();
        store
            .add(&chat.doc("a_c").collection("message"), json!({"text": "2"}))
            .unwrap();
        store
            .add(&CollectionPath::new("message"), json!({"text": "top"}))
            .unwrap();

        assert_eq!(store.count(&Query::group("message")).unwrap(), 3);
        let scoped = Query::collection(chat.doc("a_b").collection("message"));
        assert_eq!(store.count(&scoped).unwrap(), 1);
    }

    #[test]
    fn delete_recursive_removes_nested_collections() {
        let store = MemoryStore::new();
        let folder = CollectionPath::new("video_folders").doc("f1");
        store.set(&folder, json!({"name": "Knee"})).unwrap();
        store
            .add(&folder.collection("Videos"), json!({"title": "v1"}))
            .unwrap();
        store
            .add(&folder.collection("Videos"), json!({"title": "v2"}))
            .unwrap();

        let removed = store.delete_recursive(&folder).unwrap();
        assert_eq!(removed, 3);
        assert!(store.is_empty());
    }

    #[test]
    fn commit_publishes_change_events() {
        let store = MemoryStore::new();
        let mut rx = store.changes();
        let path = CollectionPath::new("video_folders").doc("f1");
        store.set(&path, json!({"name": "Hip"})).unwrap();
        store.delete(&path).unwrap();

        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Written);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Deleted);
    }

    #[test]
    fn ordering_uses_field_then_sequence() {
        let store = MemoryStore::new();
        let folders = CollectionPath::new("video_folders");
        store.add(&folders, json!({"name": "b"})).unwrap();
        store.add(&folders, json!({"name": "a"})).unwrap();

        let docs = store
            .query(&Query::collection(folders).order_by("name", Direction::Ascending))
            .unwrap();
        assert_eq!(docs[0].get_str("name"), Some("a"));
    }
}
