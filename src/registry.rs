//! National patient registry lookup by IIN (12-digit individual
//! identification number).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const IIN_LENGTH: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IIN must be exactly {IIN_LENGTH} digits")]
    InvalidIin,
    #[error("No patient found for IIN {0}")]
    NotFound(String),
    #[error("Cannot reach patient registry at {0}")]
    Connection(String),
    #[error("Patient registry request failed: {0}")]
    Http(String),
    #[error("Patient registry returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("Unreadable registry response: {0}")]
    ResponseParsing(String),
}

/// Registry record as returned by the lookup service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    #[serde(default)]
    pub iin: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub rehab_stage: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub tel: Option<String>,
}

impl RegistryRecord {
    /// "Last First Middle", as shown on the confirmation form.
    pub fn full_name(&self) -> String {
        [
            self.last_name.as_str(),
            self.first_name.as_str(),
            self.middle_name.as_deref().unwrap_or_default(),
        ]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// Trimmed IIN if it is exactly 12 ASCII digits.
pub fn validate_iin(iin: &str) -> Result<String, RegistryError> {
    let iin = iin.trim();
    if iin.len() == IIN_LENGTH && iin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(iin.to_string())
    } else {
        Err(RegistryError::InvalidIin)
    }
}

/// Blocking lookup. Call from a blocking context.
pub trait PatientRegistry: Send + Sync {
    fn lookup(&self, iin: &str) -> Result<RegistryRecord, RegistryError>;
}

/// `GET {base}/api/patient/{iin}`.
pub struct HttpPatientRegistry {
    base_url: String,
    timeout: Duration,
}

impl HttpPatientRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

impl PatientRegistry for HttpPatientRegistry {
    fn lookup(&self, iin: &str) -> Result<RegistryRecord, RegistryError> {
        let iin = validate_iin(iin)?;
        let url = format!("{}/api/patient/{iin}", self.base_url);

        // Built per call: a blocking client must not be dropped on an async worker.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| RegistryError::Http(e.to_string()))?;

        let response = client.get(&url).send().map_err(|e| {
            if e.is_connect() {
                RegistryError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                RegistryError::Http(format!(
                    "Request timed out after {}s",
                    self.timeout.as_secs()
                ))
            } else {
                RegistryError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(iin));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RegistryError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let mut record: RegistryRecord = response
            .json()
            .map_err(|e| RegistryError::ResponseParsing(e.to_string()))?;
        if record.iin.is_empty() {
            record.iin = iin;
        }
        tracing::debug!(iin = %record.iin, "Registry record found");
        Ok(record)
    }
}

/// Fixed set of records. Used in tests and offline deployments.
#[derive(Debug, Default)]
pub struct StaticPatientRegistry {
    records: HashMap<String, RegistryRecord>,
}

impl StaticPatientRegistry {
    pub fn new(records: impl IntoIterator<Item = RegistryRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.iin.clone(), r)).collect(),
        }
    }
}

impl PatientRegistry for StaticPatientRegistry {
    fn lookup(&self, iin: &str) -> Result<RegistryRecord, RegistryError> {
        let iin = validate_iin(iin)?;
        self.records
            .get(&iin)
            .cloned()
            .ok_or(RegistryError::NotFound(iin))
    }
}
