use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{content_type_for, public_url, validate_key, ObjectStore, StorageError, StoredObject};

/// In-process object store for tests and `:memory:` runs.
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    base_url: String,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            base_url: base_url.into(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<StoredObject, StorageError> {
        validate_key(key)?;
        if bytes.is_empty() {
            return Err(StorageError::Empty(key.to_string()));
        }
        self.objects
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(key.to_string(), bytes.to_vec());
        Ok(StoredObject {
            key: key.to_string(),
            url: self.url(key),
            content_type: content_type_for(key, content_type),
            size: bytes.len(),
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let objects = self.objects.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(objects.get(key).cloned())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(key);
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        public_url(&self.base_url, key)
    }
}
