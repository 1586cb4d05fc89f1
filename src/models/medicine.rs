use serde::{Deserialize, Serialize};

use super::Record;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Record for Medicine {}

/// A scheduled dose. `status` is absent until the patient answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intake {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: Option<bool>,
    /// ISO-8601 timestamp; the first ten characters are the calendar day.
    #[serde(default)]
    pub datetime: Option<String>,
}

impl Record for Intake {}

impl Intake {
    pub fn is_on(&self, day: &str) -> bool {
        self.datetime
            .as_deref()
            .is_some_and(|datetime| datetime.starts_with(day))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoProgress {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: Option<bool>,
}

impl Record for VideoProgress {}
