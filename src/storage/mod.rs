//! Binary object storage (photos, chat attachments, uploaded videos).
//!
//! Objects are addressed by slash-separated keys such as
//! `videos/{folderId}/{millis}_{name}`. Every stored object has a public
//! URL under `{public_url}/files/{key}`.

pub mod fs;
pub mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Object is empty: {0}")]
    Empty(String),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub size: usize,
}

/// A file received from a client, not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.map(str::to_string),
            bytes,
        }
    }

    /// Store under `key`.
    pub fn store(&self, objects: &dyn ObjectStore, key: &str) -> Result<StoredObject, StorageError> {
        objects.put(key, &self.bytes, self.content_type.as_deref())
    }
}

pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8], content_type: Option<&str>)
        -> Result<StoredObject, StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Public URL of `key`, whether or not it exists yet.
    fn url(&self, key: &str) -> String;
}

/// Reject keys that could escape the store root.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Reduce a client-supplied file name to `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn content_type_for(key: &str, declared: Option<&str>) -> String {
    match declared {
        Some(ct) if !ct.trim().is_empty() => ct.trim().to_string(),
        _ => mime_guess::from_path(key).first_or_octet_stream().to_string(),
    }
}

pub(crate) fn public_url(base: &str, key: &str) -> String {
    format!("{}/files/{key}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_keys_rejected() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("videos/f1/1700000000000_knee.mp4").is_ok());
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("my video (1).mp4"), "my_video__1_.mp4");
        assert_eq!(sanitize_file_name("../../evil.sh"), "evil.sh");
        assert_eq!(sanitize_file_name(".."), "file");
    }

    #[test]
    fn content_type_falls_back_to_extension() {
        assert_eq!(content_type_for("a/b.mp4", None), "video/mp4");
        assert_eq!(content_type_for("a/b.bin", Some("audio/webm")), "audio/webm");
        assert_eq!(content_type_for("a/b", None), "application/octet-stream");
    }
}
