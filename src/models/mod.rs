pub mod enums;
pub mod folder;
pub mod medicine;
pub mod message;
pub mod user;

pub use enums::*;
pub use folder::*;
pub use medicine::*;
pub use message::*;
pub use user::*;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::db::{DatabaseError, Document};

/// A model stored as a document body.
///
/// Older documents use different key names for a few fields
/// (`type` for `role`, `videoUrl` for `url`, ...). `LEGACY_KEYS` maps
/// each old key to its current name; the current key wins when both exist.
pub trait Record: DeserializeOwned {
    const LEGACY_KEYS: &'static [(&'static str, &'static str)] = &[];

    fn from_document(doc: &Document) -> Result<Self, DatabaseError> {
        let mut data = doc.data.clone();
        for (legacy, current) in Self::LEGACY_KEYS {
            if let Some(value) = data.remove(*legacy) {
                data.entry(current.to_string()).or_insert(value);
            }
        }
        data.insert("id".into(), Value::String(doc.id().to_string()));
        Ok(serde_json::from_value(Value::Object(data))?)
    }
}

/// Decode every document, failing on the first malformed one.
pub fn decode_all<T: Record>(docs: &[Document]) -> Result<Vec<T>, DatabaseError> {
    docs.iter().map(T::from_document).collect()
}
