//! Document and collection addressing.
//!
//! Paths alternate collection and document segments:
//! `video_folders` is a collection, `video_folders/abc` a document,
//! `video_folders/abc/Videos` a nested collection.

use std::fmt;

use super::DatabaseError;

/// Path to a collection (odd number of segments).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    segments: Vec<String>,
}

/// Path to a single document (even number of segments).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    segments: Vec<String>,
}

fn validate_segments(segments: &[String]) -> Result<(), DatabaseError> {
    for segment in segments {
        if segment.is_empty() || segment.contains('/') || segment == "." || segment == ".." {
            return Err(DatabaseError::InvalidPath(segments.join("/")));
        }
    }
    Ok(())
}

fn split(path: &str) -> Vec<String> {
    path.trim_matches('/').split('/').map(str::to_string).collect()
}

impl CollectionPath {
    /// Top-level collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Parse `a/b/c`. Fails when the segment count is even or a segment is empty.
    pub fn parse(path: &str) -> Result<Self, DatabaseError> {
        let segments = split(path);
        if segments.len() % 2 == 0 {
            return Err(DatabaseError::InvalidPath(path.to_string()));
        }
        validate_segments(&segments)?;
        Ok(Self { segments })
    }

    /// Document inside this collection.
    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        let mut segments = self.segments.clone();
        segments.push(id.into());
        DocPath { segments }
    }

    /// Last segment, used as the collection-group identifier.
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Owning document for nested collections.
    pub fn parent(&self) -> Option<DocPath> {
        if self.segments.len() < 3 {
            return None;
        }
        Some(DocPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        validate_segments(&self.segments)
    }
}

impl DocPath {
    /// Parse `a/b`. Fails when the segment count is odd or a segment is empty.
    pub fn parse(path: &str) -> Result<Self, DatabaseError> {
        let segments = split(path);
        if segments.len() % 2 != 0 {
            return Err(DatabaseError::InvalidPath(path.to_string()));
        }
        validate_segments(&segments)?;
        Ok(Self { segments })
    }

    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Collection containing this document.
    pub fn parent(&self) -> CollectionPath {
        CollectionPath {
            segments: self.segments[..self.segments.len().saturating_sub(1)].to_vec(),
        }
    }

    /// Nested collection under this document.
    pub fn collection(&self, name: impl Into<String>) -> CollectionPath {
        let mut segments = self.segments.clone();
        segments.push(name.into());
        CollectionPath { segments }
    }

    /// True when `self` lives somewhere below `ancestor` (not equal to it).
    pub fn is_descendant_of(&self, ancestor: &DocPath) -> bool {
        self.segments.len() > ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.segments.is_empty() {
            return Err(DatabaseError::InvalidPath(String::new()));
        }
        validate_segments(&self.segments)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
