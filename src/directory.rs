//! Read-side views over people: the admin user table and dashboard,
//! user profiles, and a doctor's patient roster.

use serde::Serialize;

use crate::config::collections;
use crate::core_state::Backend;
use crate::db::{CollectionPath, DatabaseError, Direction, Document, DocumentStore, Query};
use crate::models::{FolderStatus, Patient, Record, Role, User};
use crate::storage::{ObjectStore, StorageError};

/// Shown when a patient has no uploaded photo.
pub const DEFAULT_PHOTO: &str = "/images/default_user.png";

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Patient {0} is not on your roster")]
    NotYourPatient(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn decode_lenient<T: Record>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match T::from_document(doc) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %doc.path, error = %e, "Skipping malformed document");
                None
            }
        })
        .collect()
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

// ═══════════════════════════════════════════
// Admin: users and dashboard
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Option<Role>,
    pub tel: Option<String>,
}

impl From<&User> for UserRow {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.display_name(),
            email: user.email.clone(),
            role: user.role,
            tel: user.tel.clone(),
        }
    }
}

pub fn list_users(store: &dyn DocumentStore) -> Result<Vec<UserRow>, DirectoryError> {
    let docs = store.query(&Query::collection(CollectionPath::new(collections::USERS)))?;
    let users: Vec<User> = decode_lenient(&docs);
    Ok(users.iter().map(UserRow::from).collect())
}

/// Case-insensitive substring match over name, email, role and phone.
/// A blank term matches everything.
pub fn search_users(rows: &[UserRow], term: &str) -> Vec<UserRow> {
    let needle = term.trim().to_lowercase();
    rows.iter()
        .filter(|row| {
            needle.is_empty()
                || contains_ci(Some(&row.name), &needle)
                || contains_ci(Some(&row.email), &needle)
                || contains_ci(row.role.map(|r| r.as_str()), &needle)
                || contains_ci(row.tel.as_deref(), &needle)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub doctors: usize,
    pub patients: usize,
    /// Chat messages across every conversation.
    pub messages: usize,
}

pub fn dashboard(store: &dyn DocumentStore) -> Result<DashboardCounts, DirectoryError> {
    let rows = list_users(store)?;
    let count_role = |role: Role| rows.iter().filter(|r| r.role == Some(role)).count();
    Ok(DashboardCounts {
        doctors: count_role(Role::Doctor),
        patients: count_role(Role::Patient),
        messages: store.count(&Query::group(collections::MESSAGES))?,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user: User,
    /// Attending doctor, for patients.
    pub doctor: Option<User>,
}

pub fn user_profile(store: &dyn DocumentStore, id: &str) -> Result<UserProfile, DirectoryError> {
    let users = CollectionPath::new(collections::USERS);
    let doc = store
        .get(&users.doc(id))?
        .ok_or_else(|| DirectoryError::NotFound(format!("user {id}")))?;
    let user = User::from_document(&doc)?;

    let doctor = if user.role == Some(Role::Patient) {
        match doc.get_str("doctorUid").filter(|uid| !uid.is_empty()) {
            Some(doctor_uid) => store
                .get(&users.doc(doctor_uid))?
                .map(|d| User::from_document(&d))
                .transpose()?,
            None => None,
        }
    } else {
        None
    };

    Ok(UserProfile { user, doctor })
}

// ═══════════════════════════════════════════
// Doctor: patient roster
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    /// "firstName lastName".
    pub full_name: String,
    pub iin: String,
    pub email: String,
    pub photo_url: String,
    pub diagnosis: Option<String>,
    pub rehab_stage: Option<String>,
    pub folder_id: Option<String>,
}

/// The doctor's patients ordered by first name.
pub fn roster_query(doctor_uid: &str) -> Query {
    Query::collection(CollectionPath::new(collections::PATIENTS))
        .where_eq("doctorUid", doctor_uid)
        .order_by("firstName", Direction::Ascending)
}

pub fn patient_photo_url(objects: &dyn ObjectStore, patient_id: &str) -> String {
    let key = format!("PatientProfile/{patient_id}.jpg");
    match objects.exists(&key) {
        Ok(true) => objects.url(&key),
        Ok(false) => DEFAULT_PHOTO.to_string(),
        Err(e) => {
            tracing::warn!(patient = %patient_id, error = %e, "Photo lookup failed");
            DEFAULT_PHOTO.to_string()
        }
    }
}

/// Turn roster query results into entries. Used for one-off reads and
/// for every snapshot of a live roster.
pub fn roster_entries(objects: &dyn ObjectStore, docs: &[Document]) -> Vec<RosterEntry> {
    let patients: Vec<Patient> = decode_lenient(docs);
    patients
        .into_iter()
        .map(|p| RosterEntry {
            full_name: [p.first_name.trim(), p.last_name.trim()]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" "),
            photo_url: patient_photo_url(objects, &p.id),
            folder_id: p.assigned_folder().map(str::to_string),
            id: p.id,
            iin: p.iin,
            email: p.email,
            diagnosis: p.diagnosis,
            rehab_stage: p.rehab_stage,
        })
        .collect()
}

pub fn roster(backend: &Backend, doctor_uid: &str) -> Result<Vec<RosterEntry>, DirectoryError> {
    let docs = backend.store.query(&roster_query(doctor_uid))?;
    Ok(roster_entries(backend.objects.as_ref(), &docs))
}

/// Case-insensitive match on full name, IIN or email.
pub fn search_roster(entries: &[RosterEntry], term: &str) -> Vec<RosterEntry> {
    let needle = term.trim().to_lowercase();
    entries
        .iter()
        .filter(|e| {
            needle.is_empty()
                || contains_ci(Some(&e.full_name), &needle)
                || contains_ci(Some(&e.iin), &needle)
                || contains_ci(Some(&e.email), &needle)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub patient: Patient,
    pub photo_url: String,
    pub folder: FolderStatus,
}

/// A patient as seen by their attending doctor.
pub fn patient_profile(
    backend: &Backend,
    doctor_uid: &str,
    patient_id: &str,
) -> Result<PatientProfile, DirectoryError> {
    let patient = load_patient(backend.store.as_ref(), patient_id)?;
    if patient.doctor_uid != doctor_uid {
        return Err(DirectoryError::NotYourPatient(patient_id.to_string()));
    }
    let folder = crate::catalog::folder_status(backend.store.as_ref(), &patient)?;
    Ok(PatientProfile {
        photo_url: patient_photo_url(backend.objects.as_ref(), patient_id),
        folder,
        patient,
    })
}

pub fn load_patient(store: &dyn DocumentStore, patient_id: &str) -> Result<Patient, DirectoryError> {
    let path = CollectionPath::new(collections::PATIENTS).doc(patient_id);
    let doc = store
        .get(&path)?
        .ok_or_else(|| DirectoryError::NotFound(format!("patient {patient_id}")))?;
    Ok(Patient::from_document(&doc)?)
}
