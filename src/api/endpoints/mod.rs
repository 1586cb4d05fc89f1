//! API endpoint handlers.
//!
//! Each module covers one area of the clinic workspace. Handlers are thin:
//! they extract the request, call the service module and map errors.

pub mod accounts;
pub mod admin;
pub mod analytics;
pub mod catalog;
pub mod chat;
pub mod files;
pub mod health;
pub mod patients;

use std::collections::HashMap;

use axum::extract::Multipart;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::storage::Upload;

/// Largest accepted request body (video uploads).
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// `?q=` filter shared by list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

impl SearchQuery {
    pub fn term(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// A parsed `multipart/form-data` body: text fields plus files.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, Upload>,
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?;
                    form.files.insert(
                        name,
                        Upload::new(file_name, content_type.as_deref(), bytes.to_vec()),
                    );
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    /// Non-blank text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name)
    }
}
