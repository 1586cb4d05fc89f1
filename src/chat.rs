//! Doctor/patient chat.
//!
//! Each conversation lives once under `chat/{key}/message`, where the key
//! is derived from both participants' emails and does not depend on who
//! opens the conversation.

use std::sync::Arc;

use serde::Serialize;

use crate::config::collections;
use crate::core_state::Backend;
use crate::db::{
    to_fields, CollectionPath, DatabaseError, Direction, Document, DocumentStore, Query,
    QuerySubscription,
};
use crate::directory::{self, DirectoryError, RosterEntry};
use crate::models::{decode_all, ChatMessage, MessageKind, Patient};
use crate::storage::{sanitize_file_name, StorageError, Upload};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message text is empty")]
    EmptyText,
    #[error("Attachment is empty")]
    EmptyAttachment,
    #[error("Invalid audio duration: {0}")]
    InvalidDuration(f64),
    #[error("Invalid conversation participant: {0}")]
    InvalidParticipant(String),
    #[error("Patient {0} is not on your roster")]
    NotYourPatient(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Conversation key for two participants: trimmed, lowercased emails in
/// lexicographic order joined with `_`.
pub fn conversation_key(a: &str, b: &str) -> String {
    let mut pair = [a.trim().to_lowercase(), b.trim().to_lowercase()];
    pair.sort();
    pair.join("_")
}

fn messages(key: &str) -> Result<CollectionPath, ChatError> {
    let path = CollectionPath::new(collections::CHATS)
        .doc(key)
        .collection(collections::MESSAGES);
    path.validate()
        .map_err(|_| ChatError::InvalidParticipant(key.to_string()))?;
    Ok(path)
}

// ═══════════════════════════════════════════
// Sending
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    Text(String),
    Image(Upload),
    /// Recorded voice note with its length in seconds.
    Audio { file: Upload, duration: f64 },
}

impl OutgoingMessage {
    fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Image(_) => MessageKind::Image,
            Self::Audio { .. } => MessageKind::Audio,
        }
    }
}

/// Store one message. Attachments are uploaded first and referenced by URL.
pub fn send_message(
    backend: &Backend,
    key: &str,
    sender: &Sender,
    outgoing: OutgoingMessage,
) -> Result<ChatMessage, ChatError> {
    let collection = messages(key)?;
    let kind = outgoing.kind();

    let (text, file_url, duration) = match outgoing {
        OutgoingMessage::Text(text) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(ChatError::EmptyText);
            }
            (text, None, 0.0)
        }
        OutgoingMessage::Image(file) => (String::new(), Some(upload(backend, key, &file)?), 0.0),
        OutgoingMessage::Audio { file, duration } => {
            if !duration.is_finite() {
                return Err(ChatError::InvalidDuration(duration));
            }
            (
                String::new(),
                Some(upload(backend, key, &file)?),
                duration.max(0.0),
            )
        }
    };

    let mut message = ChatMessage {
        id: String::new(),
        text,
        sender: sender.email.clone(),
        sender_name: sender.name.clone(),
        kind,
        file_url,
        duration,
        created_at: Some(backend.store.server_time()),
    };
    let path = backend.store.add(&collection, to_fields(&message)?)?;
    message.id = path.id().to_string();
    tracing::debug!(conversation = %key, kind = %kind, "Message sent");
    Ok(message)
}

fn upload(backend: &Backend, key: &str, file: &Upload) -> Result<String, ChatError> {
    if file.bytes.is_empty() {
        return Err(ChatError::EmptyAttachment);
    }
    let object_key = format!(
        "chat/{key}/{}_{}",
        uuid::Uuid::new_v4().simple(),
        sanitize_file_name(&file.file_name)
    );
    Ok(file.store(backend.objects.as_ref(), &object_key)?.url)
}

// ═══════════════════════════════════════════
// Reading
// ═══════════════════════════════════════════

/// Store order for a conversation. Rows written under `dateCreated` carry
/// no `createdAt`, so callers re-sort with [`decode_messages`].
pub fn messages_query(key: &str) -> Result<Query, ChatError> {
    Ok(Query::collection(messages(key)?).order_by("createdAt", Direction::Ascending))
}

/// Decode a message snapshot oldest first by effective timestamp
/// (`createdAt`, else `dateCreated`). Ties keep store order.
pub fn decode_messages(docs: &[Document]) -> Result<Vec<ChatMessage>, DatabaseError> {
    let mut listed: Vec<ChatMessage> = decode_all(docs)?;
    listed.sort_by_key(|m| m.created_at);
    Ok(listed)
}

pub fn list_messages(store: &dyn DocumentStore, key: &str) -> Result<Vec<ChatMessage>, ChatError> {
    let docs = store.query(&messages_query(key)?)?;
    Ok(decode_messages(&docs)?)
}

/// Live view of a conversation; each snapshot is the full ordered list.
pub fn subscribe_messages(
    store: Arc<dyn DocumentStore>,
    key: &str,
) -> Result<QuerySubscription, ChatError> {
    Ok(QuerySubscription::new(store, messages_query(key)?))
}

// ═══════════════════════════════════════════
// Contacts
// ═══════════════════════════════════════════

/// Patients a doctor can chat with.
pub fn chat_contacts(backend: &Backend, doctor_uid: &str) -> Result<Vec<RosterEntry>, ChatError> {
    Ok(directory::roster(backend, doctor_uid)?)
}

/// Conversation key between a doctor and one of their patients.
pub fn patient_conversation(
    store: &dyn DocumentStore,
    doctor_uid: &str,
    doctor_email: &str,
    patient_id: &str,
) -> Result<(Patient, String), ChatError> {
    let patient = directory::load_patient(store, patient_id)?;
    if patient.doctor_uid != doctor_uid {
        return Err(ChatError::NotYourPatient(patient_id.to_string()));
    }
    if patient.email.trim().is_empty() {
        return Err(ChatError::InvalidParticipant(patient_id.to_string()));
    }
    let key = conversation_key(doctor_email, &patient.email);
    Ok((patient, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::registry::StaticPatientRegistry;
    use serde_json::json;

    fn backend() -> Backend {
        Backend::in_memory(Arc::new(StaticPatientRegistry::default())).0
    }

    fn doctor() -> Sender {
        Sender {
            email: "doc@clinic.kz".into(),
            name: "Dr. Ivanov".into(),
        }
    }

    #[test]
    fn key_is_order_independent() {
        let ab = conversation_key("Doc@Clinic.kz ", "patient@mail.kz");
        let ba = conversation_key("patient@mail.kz", "doc@clinic.kz");
        assert_eq!(ab, ba);
        assert_eq!(ab, "doc@clinic.kz_patient@mail.kz");
    }

    #[test]
    fn empty_text_is_rejected() {
        let backend = backend();
        let key = conversation_key("a@x.kz", "b@x.kz");
        let err = send_message(&backend, &key, &doctor(), OutgoingMessage::Text("  ".into()));
        assert!(matches!(err, Err(ChatError::EmptyText)));
        assert!(list_messages(backend.store.as_ref(), &key).unwrap().is_empty());
    }

    #[test]
    fn attachments_are_uploaded_under_the_conversation() {
        let backend = backend();
        let key = conversation_key("a@x.kz", "b@x.kz");
        let audio = Upload::new("note.webm", Some("audio/webm"), vec![1, 2, 3]);

        let sent = send_message(
            &backend,
            &key,
            &doctor(),
            OutgoingMessage::Audio {
                file: audio,
                duration: 4.5,
            },
        )
        .unwrap();
        assert_eq!(sent.kind, MessageKind::Audio);
        assert_eq!(sent.duration, 4.5);
        let url = sent.file_url.unwrap();
        assert!(url.starts_with(&format!("http://localhost/files/chat/{key}/")));
        assert!(url.ends_with("_note.webm"));

        let empty = Upload::new("blank.png", None, Vec::new());
        assert!(matches!(
            send_message(&backend, &key, &doctor(), OutgoingMessage::Image(empty)),
            Err(ChatError::EmptyAttachment)
        ));
    }

    #[test]
    fn messages_ordered_by_timestamp_regardless_of_write_order() {
        let store = MemoryStore::new();
        let key = conversation_key("a@x.kz", "b@x.kz");
        let collection = messages(&key).unwrap();
        for (text, at) in [
            ("third", "2024-03-01T10:00:02Z"),
            ("first", "2024-03-01T10:00:00Z"),
            ("second", "2024-03-01T10:00:01.500Z"),
        ] {
            store
                .add(&collection, json!({"text": text, "sender": "a@x.kz", "createdAt": at}))
                .unwrap();
        }
        store
            .add(&collection, json!({"text": "zeroth", "dateCreated": "2024-03-01T09:00:00Z"}))
            .unwrap();

        let listed = list_messages(&store, &key).unwrap();
        let texts: Vec<&str> = listed.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["zeroth", "first", "second", "third"]);
        for pair in listed.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        assert_eq!(listed, list_messages(&store, &key).unwrap());
    }

    #[test]
    fn legacy_timestamp_sorts_by_its_own_time() {
        let store = MemoryStore::new();
        let key = conversation_key("a@x.kz", "b@x.kz");
        let collection = messages(&key).unwrap();
        store
            .add(&collection, json!({"text": "new", "createdAt": "2024-03-01T10:00:00Z"}))
            .unwrap();
        store
            .add(
                &collection,
                json!({"text": "legacy-later", "dateCreated": "2024-03-01T11:00:00Z"}),
            )
            .unwrap();

        let listed = list_messages(&store, &key).unwrap();
        let texts: Vec<&str> = listed.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["new", "legacy-later"]);
        for pair in listed.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[test]
    fn non_finite_audio_duration_is_rejected() {
        let backend = backend();
        let key = conversation_key("a@x.kz", "b@x.kz");
        send_message(&backend, &key, &doctor(), OutgoingMessage::Text("hello".into())).unwrap();
        for raw in ["inf", "NaN", "-inf"] {
            let duration: f64 = raw.parse().unwrap();
            let audio = Upload::new("note.webm", Some("audio/webm"), vec![1, 2, 3]);
            let err = send_message(
                &backend,
                &key,
                &doctor(),
                OutgoingMessage::Audio { file: audio, duration },
            );
            assert!(matches!(err, Err(ChatError::InvalidDuration(_))), "{raw}");
        }
        let listed = list_messages(backend.store.as_ref(), &key).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn null_duration_keeps_conversation_readable() {
        let store = MemoryStore::new();
        let key = conversation_key("a@x.kz", "b@x.kz");
        let collection = messages(&key).unwrap();
        store
            .add(&collection, json!({"text": "hi", "createdAt": "2024-03-01T10:00:00Z"}))
            .unwrap();
        store
            .add(
                &collection,
                json!({"type": "audio", "fileUrl": "http://x/a.webm", "duration": null,
                       "createdAt": "2024-03-01T10:01:00Z"}),
            )
            .unwrap();

        let listed = list_messages(&store, &key).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].kind, MessageKind::Audio);
        assert_eq!(listed[1].duration, 0.0);
    }

    #[test]
    fn send_then_list_round_trip() {
        let backend = backend();
        let key = conversation_key("doc@clinic.kz", "p@mail.kz");
        for text in ["Hello", "How is the knee?"] {
            send_message(&backend, &key, &doctor(), OutgoingMessage::Text(text.into())).unwrap();
        }
        let listed = list_messages(backend.store.as_ref(), &key).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].text, "Hello");
        assert_eq!(listed[1].sender_name, "Dr. Ivanov");
        assert_eq!(listed[1].kind, MessageKind::Text);
    }

    #[tokio::test]
    async fn subscription_sees_new_messages() {
        let backend = backend();
        let key = conversation_key("doc@clinic.kz", "p@mail.kz");
        let mut sub = subscribe_messages(backend.store.clone(), &key).unwrap();
        assert!(sub.next_snapshot().await.unwrap().unwrap().is_empty());

        send_message(&backend, &key, &doctor(), OutgoingMessage::Text("ping".into())).unwrap();
        let docs = sub.next_snapshot().await.unwrap().unwrap();
        let listed = decode_messages(&docs).unwrap();
        assert_eq!(listed[0].text, "ping");
    }

    #[test]
    fn patient_conversation_requires_roster_membership() {
        let store = MemoryStore::new();
        store
            .set(
                &CollectionPath::new(collections::PATIENTS).doc("p1"),
                json!({"doctorUid": "d1", "email": "P@mail.kz"}),
            )
            .unwrap();
        let (_, key) = patient_conversation(&store, "d1", "doc@clinic.kz", "p1").unwrap();
        assert_eq!(key, "doc@clinic.kz_p@mail.kz");
        assert!(matches!(
            patient_conversation(&store, "d2", "other@clinic.kz", "p1"),
            Err(ChatError::NotYourPatient(_))
        ));
    }
}
