//! Account lifecycle: self-registration, sign-in, password recovery,
//! provisioning of doctors (by admins) and patients (by doctors), profile
//! completion and contact edits.
//!
//! Provisioning creates the auth account first, then writes every profile
//! document in one batch. If the batch fails the fresh account is deleted
//! again so no login exists without a profile.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::auth::{normalize_email, AuthError, AuthSession, AuthUser};
use crate::config::collections;
use crate::core_state::Backend;
use crate::db::{to_fields, CollectionPath, DatabaseError, DocumentStore, Query, WriteBatch};
use crate::models::{Patient, Record, Role, User};
use crate::registry::{validate_iin, RegistryError, RegistryRecord};
use crate::storage::{StorageError, Upload};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Confirm your email before signing in")]
    EmailNotVerified,
    #[error("A user with email {0} already exists")]
    DuplicateEmail(String),
    #[error("A patient with IIN {0} is already registered")]
    DuplicateIin(String),
    #[error("Registry record does not match IIN {0}")]
    IinMismatch(String),
    #[error("Nothing to update")]
    NothingToUpdate,
    #[error("Profile not found: {0}")]
    NotFound(String),
    #[error("Patient {0} is not on your roster")]
    NotYourPatient(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

fn users() -> CollectionPath {
    CollectionPath::new(collections::USERS)
}

fn doctors() -> CollectionPath {
    CollectionPath::new(collections::DOCTORS)
}

fn patients() -> CollectionPath {
    CollectionPath::new(collections::PATIENTS)
}

fn required(value: &str, field: &'static str) -> Result<String, AccountError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AccountError::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Throwaway password for provisioned accounts; the owner sets a real one
/// through the reset email.
fn temporary_password() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Map the provider's duplicate error onto ours.
fn create_account(backend: &Backend, email: &str) -> Result<AuthUser, AccountError> {
    match backend.auth.create_user(email, &temporary_password()) {
        Ok(user) => Ok(user),
        Err(AuthError::EmailInUse(email)) => Err(AccountError::DuplicateEmail(email)),
        Err(e) => Err(e.into()),
    }
}

/// Commit profile documents for a fresh account, or remove the account.
fn commit_or_rollback(
    backend: &Backend,
    account: &AuthUser,
    batch: WriteBatch,
) -> Result<(), AccountError> {
    if let Err(e) = backend.store.commit(batch) {
        tracing::error!(uid = %account.uid, error = %e, "Profile write failed, removing account");
        if let Err(cleanup) = backend.auth.delete_user(&account.uid) {
            tracing::error!(uid = %account.uid, error = %cleanup, "Account cleanup failed");
        }
        return Err(e.into());
    }
    Ok(())
}

// ═══════════════════════════════════════════
// Self-service
// ═══════════════════════════════════════════

/// Create an account and send the verification email. Does not sign in.
pub fn register(
    backend: &Backend,
    email: &str,
    password: &str,
    repeat_password: &str,
) -> Result<AuthUser, AccountError> {
    if password != repeat_password {
        return Err(AccountError::PasswordMismatch);
    }
    let user = backend.auth.create_user(email, password)?;
    backend.auth.send_email_verification(&user)?;
    tracing::info!(uid = %user.uid, "Registered, verification sent");
    Ok(user)
}

/// Check credentials and start `session`. Unverified accounts leave the
/// session signed out.
pub fn login(
    backend: &Backend,
    session: &AuthSession,
    email: &str,
    password: &str,
) -> Result<AuthUser, AccountError> {
    let user = backend.auth.sign_in(email, password)?;
    if !user.email_verified {
        session.sign_out();
        tracing::info!(uid = %user.uid, "Sign-in refused: email not verified");
        return Err(AccountError::EmailNotVerified);
    }
    session.set(user.clone());
    Ok(user)
}

pub fn forgot_password(backend: &Backend, email: &str) -> Result<(), AccountError> {
    backend.auth.send_password_reset(email)?;
    Ok(())
}

pub fn confirm_email(backend: &Backend, code: &str) -> Result<AuthUser, AccountError> {
    Ok(backend.auth.confirm_email(code)?)
}

pub fn confirm_password_reset(
    backend: &Backend,
    code: &str,
    new_password: &str,
) -> Result<(), AccountError> {
    backend.auth.confirm_password_reset(code, new_password)?;
    Ok(())
}

// ═══════════════════════════════════════════
// Provisioning
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDoctor {
    pub email: String,
    pub full_name: String,
    #[serde(alias = "specialite")]
    pub specialization: String,
}

/// Admin adds a doctor: User + Doctor documents under one new uid, then a
/// password-setup email.
pub fn provision_doctor(backend: &Backend, input: &NewDoctor) -> Result<User, AccountError> {
    let email = required(&input.email, "email")?;
    let full_name = required(&input.full_name, "fullName")?;
    let specialization = required(&input.specialization, "specialization")?;
    let email = normalize_email(&email)?;

    let existing = backend
        .store
        .count(&Query::collection(users()).where_eq("email", email.as_str()))?;
    if existing > 0 {
        return Err(AccountError::DuplicateEmail(email));
    }

    let account = create_account(backend, &email)?;
    let profile = User {
        id: account.uid.clone(),
        uid: Some(account.uid.clone()),
        email: email.clone(),
        full_name: Some(full_name),
        role: Some(Role::Doctor),
        specialization: Some(specialization),
        first_signin_completed: false,
        created_at: Some(backend.store.server_time()),
        ..Default::default()
    };
    let body = to_fields(&profile)?;

    let mut batch = WriteBatch::new();
    batch
        .set(users().doc(&account.uid), body.clone())
        .set(doctors().doc(&account.uid), body);
    commit_or_rollback(backend, &account, batch)?;

    backend.auth.send_password_reset(&email)?;
    tracing::info!(uid = %account.uid, "Doctor provisioned");
    Ok(profile)
}

/// Blocking registry lookup for the add-patient preview.
pub fn lookup_patient(backend: &Backend, iin: &str) -> Result<RegistryRecord, AccountError> {
    let iin = validate_iin(iin)?;
    Ok(backend.registry.lookup(&iin)?)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub iin: String,
    pub email: String,
}

/// Doctor adds a patient found in the registry. Blocking: performs the
/// registry lookup.
pub fn provision_patient(
    backend: &Backend,
    doctor: &AuthUser,
    input: &NewPatient,
) -> Result<Patient, AccountError> {
    let iin = validate_iin(&input.iin)?;
    let email = required(&input.email, "email")?;
    let email = normalize_email(&email)?;

    let record = backend.registry.lookup(&iin)?;
    if record.iin != iin {
        return Err(AccountError::IinMismatch(iin));
    }

    let store = backend.store.as_ref();
    if store.count(&Query::collection(patients()).where_eq("iin", iin.as_str()))? > 0 {
        return Err(AccountError::DuplicateIin(iin));
    }
    if store.count(&Query::collection(patients()).where_eq("email", email.as_str()))? > 0 {
        return Err(AccountError::DuplicateEmail(email));
    }

    let account = create_account(backend, &email)?;
    let patient = Patient {
        id: account.uid.clone(),
        uid: Some(account.uid.clone()),
        email: email.clone(),
        iin,
        doctor_uid: doctor.uid.clone(),
        doctor_email: Some(doctor.email.clone()),
        first_name: record.first_name,
        last_name: record.last_name,
        middle_name: record.middle_name,
        birth_date: record.birth_date,
        gender: record.gender,
        diagnosis: record.diagnosis,
        rehab_stage: record.rehab_stage,
        address: Some(record.address.unwrap_or_default()),
        tel: Some(record.tel.unwrap_or_default()),
        role: Some(Role::Patient),
        folder_id: None,
        first_signin_completed: false,
        created_at: Some(store.server_time()),
    };
    let body = to_fields(&patient)?;

    let mut batch = WriteBatch::new();
    batch
        .set(patients().doc(&account.uid), body.clone())
        .set(users().doc(&account.uid), body);
    commit_or_rollback(backend, &account, batch)?;

    backend.auth.send_password_reset(&email)?;
    tracing::info!(uid = %account.uid, doctor = %doctor.uid, "Patient provisioned");
    Ok(patient)
}

// ═══════════════════════════════════════════
// Profile edits
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstSignin {
    pub full_name: String,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub tel: Option<String>,
    #[serde(default, alias = "specialite")]
    pub specialization: Option<String>,
}

/// Merge the first sign-in form into `User/{uid}` and mark it complete.
pub fn complete_first_signin(
    store: &dyn DocumentStore,
    user: &AuthUser,
    form: &FirstSignin,
) -> Result<User, AccountError> {
    let full_name = required(&form.full_name, "fullName")?;
    let path = users().doc(&user.uid);
    let mut fields = json!({
        "uid": user.uid,
        "email": user.email,
        "fullName": full_name,
        "role": Role::Doctor,
        "firstSigninCompleted": true,
    });
    if let Some(map) = fields.as_object_mut() {
        for (key, value) in [
            ("birthday", &form.birthday),
            ("tel", &form.tel),
            ("specialization", &form.specialization),
        ] {
            if let Some(value) = optional(value.as_deref()) {
                map.insert(key.into(), Value::String(value));
            }
        }
    }
    store.merge(&path, fields)?;
    let doc = store
        .get(&path)?
        .ok_or_else(|| AccountError::NotFound(user.uid.clone()))?;
    Ok(User::from_document(&doc)?)
}

#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    pub tel: Option<String>,
    pub address: Option<String>,
    pub photo: Option<Upload>,
}

/// Update phone, address and photo. Blank fields are skipped; an update
/// with nothing left is an error.
pub fn update_contact_details(
    backend: &Backend,
    uid: &str,
    update: &ContactUpdate,
) -> Result<User, AccountError> {
    let path = users().doc(uid);
    if backend.store.get(&path)?.is_none() {
        return Err(AccountError::NotFound(uid.to_string()));
    }

    let mut fields = Map::new();
    if let Some(tel) = optional(update.tel.as_deref()) {
        fields.insert("tel".into(), Value::String(tel));
    }
    if let Some(address) = optional(update.address.as_deref()) {
        fields.insert("address".into(), Value::String(address));
    }
    if let Some(photo) = update.photo.as_ref().filter(|p| !p.bytes.is_empty()) {
        let stored = photo.store(backend.objects.as_ref(), &format!("user_photos/{uid}"))?;
        fields.insert("photoUrl".into(), Value::String(stored.url));
    }
    if fields.is_empty() {
        return Err(AccountError::NothingToUpdate);
    }

    backend.store.update(&path, Value::Object(fields))?;
    let doc = backend
        .store
        .get(&path)?
        .ok_or_else(|| AccountError::NotFound(uid.to_string()))?;
    Ok(User::from_document(&doc)?)
}

/// Summary of a patient removal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedPatient {
    pub patient_id: String,
    pub documents_removed: usize,
}

/// Delete a patient and everything keyed by their id. Only the attending
/// doctor may do this.
pub fn remove_patient(
    backend: &Backend,
    doctor_uid: &str,
    patient_id: &str,
) -> Result<RemovedPatient, AccountError> {
    let store = backend.store.as_ref();
    let patient_path = patients().doc(patient_id);
    let patient = match store.get(&patient_path)? {
        Some(doc) => Patient::from_document(&doc)?,
        None => return Err(AccountError::NotFound(patient_id.to_string())),
    };
    if patient.doctor_uid != doctor_uid {
        return Err(AccountError::NotYourPatient(patient_id.to_string()));
    }

    let data_root = CollectionPath::new(collections::PATIENT_DATA).doc(patient_id);
    let mut batch = WriteBatch::new();
    for path in store.descendants(&data_root)? {
        batch.delete(path);
    }
    batch
        .delete(data_root)
        .delete(patient_path)
        .delete(users().doc(patient_id))
        .delete(CollectionPath::new(collections::ANALYTICS).doc(patient_id));
    let documents_removed = batch.len();
    store.commit(batch)?;

    backend.auth.delete_user(patient_id)?;
    let photo = format!("PatientProfile/{patient_id}.jpg");
    if let Err(e) = backend.objects.delete(&photo) {
        tracing::warn!(patient = %patient_id, error = %e, "Photo cleanup failed");
    }

    tracing::info!(patient = %patient_id, doctor = %doctor_uid, documents_removed, "Patient removed");
    Ok(RemovedPatient {
        patient_id: patient_id.to_string(),
        documents_removed,
    })
}
