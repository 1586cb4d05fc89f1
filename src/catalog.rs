//! Video folder catalog: folders of instructional videos that doctors
//! assign to patients.
//!
//! User copies of catalog folders share the `video_folders` collection and
//! are told apart by `ownerId`.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::collections;
use crate::core_state::Backend;
use crate::db::{
    to_fields, CollectionPath, DatabaseError, Direction, DocPath, DocumentStore, Query, WriteBatch,
};
use crate::models::{decode_all, Folder, FolderStatus, Patient, Record, User, Video};
use crate::storage::{sanitize_file_name, StorageError, Upload};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Folder not found: {0}")]
    FolderNotFound(String),
    #[error("Video not found: {0}")]
    VideoNotFound(String),
    #[error("Patient not found: {0}")]
    PatientNotFound(String),
    #[error("Patient {0} is not on your roster")]
    NotYourPatient(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Folder \"{0}\" is already attached to this user")]
    AlreadyAttached(String),
    #[error("Patient already has folder \"{current_name}\" assigned; confirm to replace it")]
    AssignmentConflict {
        current_id: String,
        current_name: String,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

fn folders() -> CollectionPath {
    CollectionPath::new(collections::FOLDERS)
}

fn folder_path(id: &str) -> DocPath {
    folders().doc(id)
}

fn videos(folder_id: &str) -> CollectionPath {
    folder_path(folder_id).collection(collections::VIDEOS)
}

fn required(value: &str, field: &'static str) -> Result<String, CatalogError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(CatalogError::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

// ═══════════════════════════════════════════
// Folders
// ═══════════════════════════════════════════

pub fn get_folder(store: &dyn DocumentStore, id: &str) -> Result<Folder, CatalogError> {
    let path = folder_path(id);
    if path.validate().is_err() {
        return Err(CatalogError::FolderNotFound(id.to_string()));
    }
    match store.get(&path)? {
        Some(doc) => Ok(Folder::from_document(&doc)?),
        None => Err(CatalogError::FolderNotFound(id.to_string())),
    }
}

pub fn create_folder(
    store: &dyn DocumentStore,
    author: &User,
    name: &str,
) -> Result<Folder, CatalogError> {
    let mut folder = Folder {
        id: String::new(),
        name: required(name, "name")?,
        created_by: author.id.clone(),
        created_by_name: author.display_name(),
        created_at: Some(store.server_time()),
        ..Default::default()
    };
    let path = store.add(&folders(), to_fields(&folder)?)?;
    folder.id = path.id().to_string();
    tracing::info!(folder = %folder.id, "Folder created");
    Ok(folder)
}

pub fn rename_folder(
    store: &dyn DocumentStore,
    id: &str,
    name: &str,
) -> Result<Folder, CatalogError> {
    let name = required(name, "name")?;
    let mut folder = get_folder(store, id)?;
    store.update(&folder_path(id), json!({ "name": name }))?;
    folder.name = name;
    Ok(folder)
}

/// Delete a folder together with its videos in one batch. Returns the
/// number of documents removed.
pub fn delete_folder(store: &dyn DocumentStore, id: &str) -> Result<usize, CatalogError> {
    get_folder(store, id)?;
    let removed = store.delete_recursive(&folder_path(id))?;
    tracing::info!(folder = %id, removed, "Folder deleted");
    Ok(removed)
}

/// Shared catalog folders, newest first. User copies are left out.
pub fn list_folders(store: &dyn DocumentStore) -> Result<Vec<Folder>, CatalogError> {
    let docs = store.query(&Query::collection(folders()).order_by("createdAt", Direction::Descending))?;
    let listed: Vec<Folder> = decode_all(&docs)?;
    Ok(listed.into_iter().filter(|f| f.owner_id.is_none()).collect())
}

pub fn search_folders(folders: &[Folder], term: &str) -> Vec<Folder> {
    let needle = term.trim().to_lowercase();
    folders
        .iter()
        .filter(|f| f.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

// ═══════════════════════════════════════════
// User folders
// ═══════════════════════════════════════════

fn require_user(store: &dyn DocumentStore, id: &str) -> Result<(), CatalogError> {
    let path = CollectionPath::new(collections::USERS).doc(id);
    if path.validate().is_err() || store.get(&path)?.is_none() {
        return Err(CatalogError::UserNotFound(id.to_string()));
    }
    Ok(())
}

/// Folders attached to one user, newest first.
pub fn user_folders(store: &dyn DocumentStore, owner_id: &str) -> Result<Vec<Folder>, CatalogError> {
    require_user(store, owner_id)?;
    let docs = store.query(
        &Query::collection(folders())
            .where_eq("ownerId", owner_id)
            .order_by("createdAt", Direction::Descending),
    )?;
    Ok(decode_all(&docs)?)
}

/// Give a user their own copy of a catalog folder. A catalog folder can be
/// attached to the same user once.
pub fn attach_catalog_folder(
    store: &dyn DocumentStore,
    owner_id: &str,
    catalog_id: &str,
) -> Result<Folder, CatalogError> {
    let catalog_id = required(catalog_id, "catalogId")?;
    let source = get_folder(store, &catalog_id)?;
    if source.owner_id.is_some() {
        return Err(CatalogError::FolderNotFound(catalog_id));
    }
    let attached = user_folders(store, owner_id)?;
    if attached
        .iter()
        .any(|f| f.catalog_id.as_deref() == Some(catalog_id.as_str()))
    {
        return Err(CatalogError::AlreadyAttached(source.name));
    }

    let created_at = store.server_time();
    let path = store.add(
        &folders(),
        json!({
            "name": source.name,
            "catalogId": catalog_id,
            "ownerId": owner_id,
            "createdAt": created_at,
        }),
    )?;
    tracing::info!(owner = %owner_id, catalog = %catalog_id, folder = %path.id(), "Catalog folder attached");
    Ok(Folder {
        id: path.id().to_string(),
        name: source.name,
        owner_id: Some(owner_id.to_string()),
        catalog_id: Some(catalog_id),
        created_at: Some(created_at),
        ..Default::default()
    })
}

// ═══════════════════════════════════════════
// Videos
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVideo {
    pub title: String,
    #[serde(alias = "videoUrl")]
    pub url: String,
}

pub fn add_video(
    store: &dyn DocumentStore,
    folder_id: &str,
    input: &NewVideo,
) -> Result<Video, CatalogError> {
    let title = required(&input.title, "title")?;
    let url = required(&input.url, "url")?;
    get_folder(store, folder_id)?;

    let mut video = Video {
        id: String::new(),
        title,
        url,
        created_at: Some(store.server_time()),
    };
    let path = store.add(&videos(folder_id), to_fields(&video)?)?;
    video.id = path.id().to_string();
    tracing::debug!(folder = %folder_id, video = %video.id, "Video added");
    Ok(video)
}

/// Store an uploaded file under `videos/{folder}/{millis}_{name}` and add
/// it to the folder.
pub fn upload_video(
    backend: &Backend,
    folder_id: &str,
    title: &str,
    file: &Upload,
) -> Result<Video, CatalogError> {
    let title = required(title, "title")?;
    get_folder(backend.store.as_ref(), folder_id)?;

    let millis = backend.store.server_time().timestamp_millis();
    let key = format!(
        "videos/{folder_id}/{millis}_{}",
        sanitize_file_name(&file.file_name)
    );
    let stored = file.store(backend.objects.as_ref(), &key)?;
    add_video(
        backend.store.as_ref(),
        folder_id,
        &NewVideo {
            title,
            url: stored.url,
        },
    )
}

/// Newest first.
pub fn list_videos(store: &dyn DocumentStore, folder_id: &str) -> Result<Vec<Video>, CatalogError> {
    get_folder(store, folder_id)?;
    let docs = store.query(
        &Query::collection(videos(folder_id)).order_by("createdAt", Direction::Descending),
    )?;
    Ok(decode_all(&docs)?)
}

pub fn delete_video(
    store: &dyn DocumentStore,
    folder_id: &str,
    video_id: &str,
) -> Result<(), CatalogError> {
    let path = videos(folder_id).doc(video_id);
    if path.validate().is_err() || store.get(&path)?.is_none() {
        return Err(CatalogError::VideoNotFound(video_id.to_string()));
    }
    store.delete(&path)?;
    Ok(())
}

/// YouTube watch and short links become embeddable; other URLs pass
/// through unchanged.
pub fn embed_url(url: &str) -> String {
    if url.contains("watch?v=") {
        return url.replace("watch?v=", "embed/");
    }
    if let Some((_, id)) = url.split_once("youtu.be/") {
        return format!("https://www.youtube.com/embed/{id}");
    }
    url.to_string()
}

// ═══════════════════════════════════════════
// Assignment
// ═══════════════════════════════════════════

fn load_own_patient(
    store: &dyn DocumentStore,
    doctor_uid: &str,
    patient_id: &str,
) -> Result<Patient, CatalogError> {
    let path = CollectionPath::new(collections::PATIENTS).doc(patient_id);
    if path.validate().is_err() {
        return Err(CatalogError::PatientNotFound(patient_id.to_string()));
    }
    let patient = match store.get(&path)? {
        Some(doc) => Patient::from_document(&doc)?,
        None => return Err(CatalogError::PatientNotFound(patient_id.to_string())),
    };
    if patient.doctor_uid != doctor_uid {
        return Err(CatalogError::NotYourPatient(patient_id.to_string()));
    }
    Ok(patient)
}

pub fn folder_status(store: &dyn DocumentStore, patient: &Patient) -> Result<FolderStatus, DatabaseError> {
    let Some(id) = patient.assigned_folder() else {
        return Ok(FolderStatus::Unassigned);
    };
    let path = folder_path(id);
    if path.validate().is_err() {
        return Ok(FolderStatus::Missing { id: id.to_string() });
    }
    Ok(match store.get(&path)? {
        Some(doc) => FolderStatus::Assigned {
            id: id.to_string(),
            name: doc.get_str("name").unwrap_or_default().to_string(),
        },
        None => FolderStatus::Missing { id: id.to_string() },
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub patient_id: String,
    pub folder: Folder,
    /// Folder that was replaced, if any.
    pub replaced: Option<String>,
}

/// Point a patient at a folder. Replacing a different, existing folder
/// needs `overwrite`; without it the current folder is reported back.
pub fn assign_folder(
    store: &dyn DocumentStore,
    doctor_uid: &str,
    patient_id: &str,
    folder_id: &str,
    overwrite: bool,
) -> Result<Assignment, CatalogError> {
    let patient = load_own_patient(store, doctor_uid, patient_id)?;
    let folder = get_folder(store, folder_id)?;

    let replaced = match folder_status(store, &patient)? {
        FolderStatus::Assigned { id, name } if id != folder.id => {
            if !overwrite {
                return Err(CatalogError::AssignmentConflict {
                    current_id: id,
                    current_name: name,
                });
            }
            Some(id)
        }
        FolderStatus::Missing { id } => Some(id),
        _ => None,
    };

    let mut batch = WriteBatch::new();
    batch.update(
        CollectionPath::new(collections::PATIENTS).doc(patient_id),
        json!({ "folderId": folder.id }),
    );
    store.commit(batch)?;
    tracing::info!(patient = %patient_id, folder = %folder.id, ?replaced, "Folder assigned");

    Ok(Assignment {
        patient_id: patient_id.to_string(),
        folder,
        replaced,
    })
}

/// Folder assignment of one of the doctor's patients, plus its videos when
/// the folder exists.
pub fn patient_folder(
    store: &dyn DocumentStore,
    doctor_uid: &str,
    patient_id: &str,
) -> Result<(FolderStatus, Vec<Video>), CatalogError> {
    let patient = load_own_patient(store, doctor_uid, patient_id)?;
    let status = folder_status(store, &patient)?;
    let videos = match &status {
        FolderStatus::Assigned { id, .. } => list_videos(store, id)?,
        _ => Vec::new(),
    };
    Ok((status, videos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::registry::StaticPatientRegistry;
    use std::sync::Arc;

    fn doctor() -> User {
        User {
            id: "d1".into(),
            email: "doc@clinic.kz".into(),
            full_name: Some("Ivanov I.I.".into()),
            ..Default::default()
        }
    }

    fn seed_patient(store: &dyn DocumentStore, folder: Option<&str>) {
        let mut body = json!({"doctorUid": "d1", "firstName": "Aibek"});
        if let Some(folder) = folder {
            body["folderId"] = json!(folder);
        }
        store
            .set(&CollectionPath::new(collections::PATIENTS).doc("p1"), body)
            .unwrap();
    }

    #[test]
    fn embed_url_conversions() {
        assert_eq!(
            embed_url("https://www.youtube.com/watch?v=abc123"),
            "https://www.youtube.com/embed/abc123"
        );
        assert_eq!(
            embed_url("https://youtu.be/xyz789"),
            "https://www.youtube.com/embed/xyz789"
        );
        assert_eq!(embed_url("https://vimeo.com/42"), "https://vimeo.com/42");
    }

    #[test]
    fn folder_crud_and_listing_order() {
        let store = MemoryStore::new();
        let knee = create_folder(&store, &doctor(), "  Knee rehab ").unwrap();
        assert_eq!(knee.name, "Knee rehab");
        assert_eq!(knee.created_by_name, "Ivanov I.I.");
        let spine = create_folder(&store, &doctor(), "Spine").unwrap();

        let listed = list_folders(&store).unwrap();
        assert_eq!(listed[0].id, spine.id);
        assert_eq!(listed[1].id, knee.id);

        rename_folder(&store, &knee.id, "Knee (phase 2)").unwrap();
        let found = search_folders(&list_folders(&store).unwrap(), "PHASE");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, knee.id);

        assert!(matches!(
            create_folder(&store, &doctor(), "   "),
            Err(CatalogError::MissingField("name"))
        ));
        assert!(matches!(
            rename_folder(&store, "ghost", "x"),
            Err(CatalogError::FolderNotFound(_))
        ));
    }

    #[test]
    fn catalog_folder_attaches_to_a_user_once() {
        let store = MemoryStore::new();
        store
            .set(
                &CollectionPath::new(collections::USERS).doc("u1"),
                json!({"email": "pat@mail.kz", "role": "Patient"}),
            )
            .unwrap();
        let knee = create_folder(&store, &doctor(), "Knee").unwrap();
        assert!(user_folders(&store, "u1").unwrap().is_empty());

        let copy = attach_catalog_folder(&store, "u1", &knee.id).unwrap();
        assert_eq!(copy.name, "Knee");
        assert_eq!(copy.owner_id.as_deref(), Some("u1"));
        assert_eq!(copy.catalog_id.as_deref(), Some(knee.id.as_str()));

        let attached = user_folders(&store, "u1").unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].id, copy.id);

        match attach_catalog_folder(&store, "u1", &knee.id) {
            Err(CatalogError::AlreadyAttached(name)) => assert_eq!(name, "Knee"),
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(user_folders(&store, "u1").unwrap().len(), 1);

        // The shared catalog does not list user copies.
        let listed = list_folders(&store).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, knee.id);
    }

    #[test]
    fn attach_requires_user_and_catalog_folder() {
        let store = MemoryStore::new();
        store
            .set(&CollectionPath::new(collections::USERS).doc("u1"), json!({"email": "a@x.kz"}))
            .unwrap();
        let knee = create_folder(&store, &doctor(), "Knee").unwrap();

        assert!(matches!(
            attach_catalog_folder(&store, "ghost", &knee.id),
            Err(CatalogError::UserNotFound(_))
        ));
        assert!(matches!(
            attach_catalog_folder(&store, "u1", "missing"),
            Err(CatalogError::FolderNotFound(_))
        ));
        assert!(matches!(
            attach_catalog_folder(&store, "u1", " "),
            Err(CatalogError::MissingField("catalogId"))
        ));

        // A user copy is not itself a catalog folder.
        let copy = attach_catalog_folder(&store, "u1", &knee.id).unwrap();
        assert!(matches!(
            attach_catalog_folder(&store, "u1", &copy.id),
            Err(CatalogError::FolderNotFound(_))
        ));
    }

    #[test]
    fn delete_folder_leaves_no_orphan_videos() {
        let store = MemoryStore::new();
        let folder = create_folder(&store, &doctor(), "Shoulder").unwrap();
        for title in ["Warm-up", "Stretch"] {
            add_video(
                &store,
                &folder.id,
                &NewVideo {
                    title: title.into(),
                    url: "https://youtu.be/a".into(),
                },
            )
            .unwrap();
        }

        assert_eq!(delete_folder(&store, &folder.id).unwrap(), 3);
        assert!(store.is_empty());
        let orphans = store.count(&Query::group(collections::VIDEOS)).unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn videos_require_title_url_and_folder() {
        let store = MemoryStore::new();
        let folder = create_folder(&store, &doctor(), "Hip").unwrap();
        let missing_url = NewVideo {
            title: "A".into(),
            url: " ".into(),
        };
        assert!(matches!(
            add_video(&store, &folder.id, &missing_url),
            Err(CatalogError::MissingField("url"))
        ));
        let ok = NewVideo {
            title: "A".into(),
            url: "https://x/v.mp4".into(),
        };
        assert!(matches!(
            add_video(&store, "ghost", &ok),
            Err(CatalogError::FolderNotFound(_))
        ));

        let first = add_video(&store, &folder.id, &ok).unwrap();
        let second = add_video(&store, &folder.id, &ok).unwrap();
        let listed = list_videos(&store, &folder.id).unwrap();
        assert_eq!(listed[0].id, second.id);

        delete_video(&store, &folder.id, &first.id).unwrap();
        assert_eq!(list_videos(&store, &folder.id).unwrap().len(), 1);
        assert!(matches!(
            delete_video(&store, &folder.id, &first.id),
            Err(CatalogError::VideoNotFound(_))
        ));
    }

    #[test]
    fn legacy_video_url_key_is_read() {
        let store = MemoryStore::new();
        let folder = create_folder(&store, &doctor(), "Legacy").unwrap();
        store
            .add(&videos(&folder.id), json!({"title": "old", "videoUrl": "https://youtu.be/q"}))
            .unwrap();
        let listed = list_videos(&store, &folder.id).unwrap();
        assert_eq!(listed[0].url, "https://youtu.be/q");
    }

    #[test]
    fn upload_video_stores_file_then_adds() {
        let (backend, _) = Backend::in_memory(Arc::new(StaticPatientRegistry::default()));
        let folder = create_folder(backend.store.as_ref(), &doctor(), "Uploads").unwrap();
        let file = Upload::new("knee ex 1.mp4", Some("video/mp4"), vec![0, 1, 2]);

        let video = upload_video(&backend, &folder.id, "Knee 1", &file).unwrap();
        let prefix = format!("http://localhost/files/videos/{}/", folder.id);
        assert!(video.url.starts_with(&prefix));
        assert!(video.url.ends_with("_knee_ex_1.mp4"));
    }

    #[test]
    fn assignment_conflict_then_overwrite() {
        let store = MemoryStore::new();
        let knee = create_folder(&store, &doctor(), "Knee").unwrap();
        let hip = create_folder(&store, &doctor(), "Hip").unwrap();
        seed_patient(&store, None);

        let first = assign_folder(&store, "d1", "p1", &knee.id, false).unwrap();
        assert!(first.replaced.is_none());

        // Re-assigning the same folder is not a conflict.
        assign_folder(&store, "d1", "p1", &knee.id, false).unwrap();

        match assign_folder(&store, "d1", "p1", &hip.id, false) {
            Err(CatalogError::AssignmentConflict { current_name, .. }) => {
                assert_eq!(current_name, "Knee")
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let second = assign_folder(&store, "d1", "p1", &hip.id, true).unwrap();
        assert_eq!(second.replaced.as_deref(), Some(knee.id.as_str()));

        let patient = Patient::from_document(
            &store
                .get(&CollectionPath::new(collections::PATIENTS).doc("p1"))
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(patient.folder_id.as_deref(), Some(hip.id.as_str()));
    }

    #[test]
    fn assignment_checks_ownership_and_folder() {
        let store = MemoryStore::new();
        let knee = create_folder(&store, &doctor(), "Knee").unwrap();
        seed_patient(&store, None);
        assert!(matches!(
            assign_folder(&store, "d2", "p1", &knee.id, true),
            Err(CatalogError::NotYourPatient(_))
        ));
        assert!(matches!(
            assign_folder(&store, "d1", "p1", "ghost", true),
            Err(CatalogError::FolderNotFound(_))
        ));
        assert!(matches!(
            assign_folder(&store, "d1", "nobody", &knee.id, true),
            Err(CatalogError::PatientNotFound(_))
        ));
    }

    #[test]
    fn folder_status_variants() {
        let store = MemoryStore::new();
        let knee = create_folder(&store, &doctor(), "Knee").unwrap();

        seed_patient(&store, None);
        let (status, videos) = patient_folder(&store, "d1", "p1").unwrap();
        assert_eq!(status, FolderStatus::Unassigned);
        assert!(videos.is_empty());

        seed_patient(&store, Some(&knee.id));
        let (status, _) = patient_folder(&store, "d1", "p1").unwrap();
        assert_eq!(
            status,
            FolderStatus::Assigned {
                id: knee.id.clone(),
                name: "Knee".into()
            }
        );

        seed_patient(&store, Some("deleted-folder"));
        let (status, _) = patient_folder(&store, "d1", "p1").unwrap();
        assert_eq!(
            status,
            FolderStatus::Missing {
                id: "deleted-folder".into()
            }
        );
    }
}
