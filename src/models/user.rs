use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::enums::Role;
use super::Record;

/// Unknown role strings decode as `None` rather than failing the document.
fn lenient_role<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Role>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// Profile document under `User/{uid}`. Doctors are mirrored to `Doctor/{uid}`
/// with the same shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub first_signin_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for User {
    const LEGACY_KEYS: &'static [(&'static str, &'static str)] =
        &[("type", "role"), ("specialite", "specialization")];
}

impl User {
    /// fullName, then "firstName lastName", then email.
    pub fn display_name(&self) -> String {
        if let Some(full) = self.full_name.as_deref().map(str::trim) {
            if !full.is_empty() {
                return full.to_string();
            }
        }
        let joined = join_names(&[self.first_name.as_deref(), self.last_name.as_deref()]);
        if joined.is_empty() {
            self.email.clone()
        } else {
            joined
        }
    }
}

/// Patient document under `Patient/{uid}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub iin: String,
    #[serde(default)]
    pub doctor_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_email: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rehab_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tel: Option<String>,
    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub first_signin_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Patient {
    const LEGACY_KEYS: &'static [(&'static str, &'static str)] =
        &[("type", "role"), ("doctorId", "doctorEmail")];
}

impl Patient {
    pub fn full_name(&self) -> String {
        join_names(&[
            Some(self.last_name.as_str()),
            Some(self.first_name.as_str()),
            self.middle_name.as_deref(),
        ])
    }

    /// Empty or blank folder ids count as unassigned.
    pub fn assigned_folder(&self) -> Option<&str> {
        self.folder_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

fn join_names(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .flatten()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CollectionPath, Document};
    use serde_json::json;

    fn document(collection: &str, id: &str, body: serde_json::Value) -> Document {
        let now = Utc::now();
        Document {
            path: CollectionPath::new(collection).doc(id),
            data: body.as_object().cloned().unwrap(),
            create_time: now,
            update_time: now,
            seq: 1,
        }
    }

    #[test]
    fn legacy_type_and_specialite_keys_decode() {
        let doc = document(
            "User",
            "u1",
            json!({"email": "d@x.kz", "type": "Doctor", "specialite": "Neurology"}),
        );
        let user = User::from_document(&doc).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.role, Some(Role::Doctor));
        assert_eq!(user.specialization.as_deref(), Some("Neurology"));
    }

    #[test]
    fn current_key_wins_over_legacy() {
        let doc = document("User", "u1", json!({"role": "Admin", "type": "Doctor"}));
        let user = User::from_document(&doc).unwrap();
        assert_eq!(user.role, Some(Role::Admin));
    }

    #[test]
    fn unknown_role_decodes_as_none() {
        let doc = document("User", "u1", json!({"role": "Nurse"}));
        assert_eq!(User::from_document(&doc).unwrap().role, None);
    }

    #[test]
    fn display_name_fallbacks() {
        let mut user = User {
            email: "p@x.kz".into(),
            ..Default::default()
        };
        assert_eq!(user.display_name(), "p@x.kz");
        user.first_name = Some("Aru".into());
        user.last_name = Some("Sadykova".into());
        assert_eq!(user.display_name(), "Aru Sadykova");
        user.full_name = Some("Dr. Aru".into());
        assert_eq!(user.display_name(), "Dr. Aru");
    }

    #[test]
    fn patient_full_name_and_folder() {
        let doc = document(
            "Patient",
            "p1",
            json!({"firstName": "Aibek", "lastName": "Nurlanov", "folderId": "  ", "doctorId": "d@x.kz"}),
        );
        let patient = Patient::from_document(&doc).unwrap();
        assert_eq!(patient.full_name(), "Nurlanov Aibek");
        assert_eq!(patient.assigned_folder(), None);
        assert_eq!(patient.doctor_email.as_deref(), Some("d@x.kz"));
    }
}
