//! Medication adherence and video progress per patient.
//!
//! `compute_adherence` only reads. Saving the daily summary and the
//! analytics snapshot is a separate, explicit `persist_adherence` call.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::collections;
use crate::db::{CollectionPath, DatabaseError, DocPath, DocumentStore, Query, WriteBatch};
use crate::directory::{self, DirectoryError};
use crate::models::{decode_all, Intake, Medicine, Patient, VideoProgress};

pub const SHEET_NAME: &str = "Medicine Analytics";
const SHEET_HEADER: [&str; 5] = ["name", "takenToday", "accepted", "missed", "total"];

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Patient {0} is not on your roster")]
    NotYourPatient(String),
    #[error("Spreadsheet export failed: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ═══════════════════════════════════════════
// Report types
// ═══════════════════════════════════════════

/// One row of the adherence table, as stored and exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineRow {
    pub name: String,
    pub taken_today: u32,
    pub accepted: u32,
    pub missed: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineAdherence {
    pub medicine_id: String,
    pub name: String,
    pub taken_today: u32,
    pub missed_today: u32,
    /// Intakes with status `true`.
    pub accepted: u32,
    /// Intakes with status `false`.
    pub missed: u32,
    /// All intakes, answered or not.
    pub total: u32,
}

impl MedicineAdherence {
    fn tally(medicine: &Medicine, intakes: &[Intake], day: &str) -> Self {
        let mut tally = Self {
            medicine_id: medicine.id.clone(),
            name: medicine.name.clone(),
            total: intakes.len() as u32,
            ..Default::default()
        };
        for intake in intakes {
            let today = intake.is_on(day);
            match intake.status {
                Some(true) => {
                    tally.accepted += 1;
                    if today {
                        tally.taken_today += 1;
                    }
                }
                Some(false) => {
                    tally.missed += 1;
                    if today {
                        tally.missed_today += 1;
                    }
                }
                None => {}
            }
        }
        tally
    }

    pub fn row(&self) -> MedicineRow {
        MedicineRow {
            name: self.name.clone(),
            taken_today: self.taken_today,
            accepted: self.accepted,
            missed: self.missed,
            total: self.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceReport {
    pub patient_id: String,
    pub date: NaiveDate,
    pub medicines: Vec<MedicineAdherence>,
    pub accepted: u32,
    pub missed: u32,
    pub total: u32,
    pub taken_today: u32,
    /// Answered intakes scheduled today.
    pub today_total: u32,
    pub videos_viewed: u32,
    pub videos_total: u32,
}

impl AdherenceReport {
    pub fn rows(&self) -> Vec<MedicineRow> {
        self.medicines.iter().map(MedicineAdherence::row).collect()
    }
}

// ═══════════════════════════════════════════
// Compute / persist
// ═══════════════════════════════════════════

fn patient_data(patient_id: &str) -> DocPath {
    CollectionPath::new(collections::PATIENT_DATA).doc(patient_id)
}

pub fn compute_adherence(
    store: &dyn DocumentStore,
    patient_id: &str,
    today: NaiveDate,
) -> Result<AdherenceReport, AnalyticsError> {
    let root = patient_data(patient_id);
    let day = today.format("%Y-%m-%d").to_string();

    let medicine_docs = store.query(&Query::collection(root.collection(collections::MEDICINES)))?;
    let mut medicines = Vec::with_capacity(medicine_docs.len());
    for medicine in decode_all::<Medicine>(&medicine_docs)? {
        let intakes_path = root
            .collection(collections::MEDICINES)
            .doc(medicine.id.as_str())
            .collection(collections::INTAKES);
        let intakes: Vec<Intake> = decode_all(&store.query(&Query::collection(intakes_path))?)?;
        medicines.push(MedicineAdherence::tally(&medicine, &intakes, &day));
    }

    let progress: Vec<VideoProgress> =
        decode_all(&store.query(&Query::collection(root.collection(collections::VIDEO_PROGRESS)))?)?;

    let mut report = AdherenceReport {
        patient_id: patient_id.to_string(),
        date: today,
        accepted: 0,
        missed: 0,
        total: 0,
        taken_today: 0,
        today_total: 0,
        videos_viewed: progress.iter().filter(|p| p.status == Some(true)).count() as u32,
        videos_total: progress.len() as u32,
        medicines: Vec::new(),
    };
    for m in &medicines {
        report.accepted += m.accepted;
        report.missed += m.missed;
        report.total += m.total;
        report.taken_today += m.taken_today;
        report.today_total += m.taken_today + m.missed_today;
    }
    report.medicines = medicines;

    tracing::debug!(
        patient = %patient_id,
        accepted = report.accepted,
        missed = report.missed,
        total = report.total,
        "Adherence computed"
    );
    Ok(report)
}

/// Write the daily summary and replace the analytics snapshot in one batch.
pub fn persist_adherence(
    store: &dyn DocumentStore,
    report: &AdherenceReport,
) -> Result<(), AnalyticsError> {
    let now = store.server_time();
    let date = report.date.format("%Y-%m-%d").to_string();

    let mut batch = WriteBatch::new();
    batch
        .set(
            patient_data(&report.patient_id)
                .collection(collections::PROGRESS_SUMMARY)
                .doc(date.as_str()),
            json!({
                "uid": report.patient_id,
                "date": date,
                "taken": report.taken_today,
                "missed": report.today_total - report.taken_today,
                "total": report.today_total,
                "timestamp": now,
            }),
        )
        .set(
            CollectionPath::new(collections::ANALYTICS).doc(report.patient_id.as_str()),
            json!({
                "patientId": report.patient_id,
                "accepted": report.accepted,
                "missed": report.missed,
                "medicines": report.rows(),
                "updatedAt": now,
            }),
        );
    store.commit(batch)?;
    tracing::info!(patient = %report.patient_id, date = %date, "Adherence persisted");
    Ok(())
}

/// Compute for one of the doctor's own patients.
pub fn patient_adherence(
    store: &dyn DocumentStore,
    doctor_uid: &str,
    patient_id: &str,
    today: NaiveDate,
) -> Result<AdherenceReport, AnalyticsError> {
    let patient = directory::load_patient(store, patient_id)?;
    if patient.doctor_uid != doctor_uid {
        return Err(AnalyticsError::NotYourPatient(patient_id.to_string()));
    }
    compute_adherence(store, patient_id, today)
}

// ═══════════════════════════════════════════
// Patient picker
// ═══════════════════════════════════════════

pub fn doctor_patients(
    store: &dyn DocumentStore,
    doctor_uid: &str,
) -> Result<Vec<Patient>, AnalyticsError> {
    let docs = store.query(&directory::roster_query(doctor_uid))?;
    Ok(decode_all(&docs)?)
}

/// Match IIN, email or "last first middle" name, case-insensitively.
pub fn search_patients(patients: &[Patient], term: &str) -> Vec<Patient> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return patients.to_vec();
    }
    patients
        .iter()
        .filter(|p| {
            p.iin.contains(&needle)
                || p.email.to_lowercase().contains(&needle)
                || p.full_name().to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

// ═══════════════════════════════════════════
// Export
// ═══════════════════════════════════════════

/// Render rows as an `.xlsx` workbook with a single sheet.
pub fn export_xlsx(rows: &[MedicineRow]) -> Result<Vec<u8>, AnalyticsError> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, title) in SHEET_HEADER.iter().enumerate() {
        sheet.write_string(0, col as u16, *title)?;
    }
    for (i, row) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        sheet.write_string(r, 0, row.name.as_str())?;
        sheet.write_number(r, 1, row.taken_today)?;
        sheet.write_number(r, 2, row.accepted)?;
        sheet.write_number(r, 3, row.missed)?;
        sheet.write_number(r, 4, row.total)?;
    }

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::Record;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
    }

    fn add_medicine(store: &MemoryStore, patient: &str, id: &str, name: &str) -> CollectionPath {
        let med = patient_data(patient).collection(collections::MEDICINES).doc(id);
        store.set(&med, json!({"name": name})).unwrap();
        med.collection(collections::INTAKES)
    }

    fn add_intake(store: &MemoryStore, intakes: &CollectionPath, status: Option<bool>, datetime: &str) {
        let mut body = json!({"datetime": datetime});
        if let Some(status) = status {
            body["status"] = json!(status);
        }
        store.add(intakes, body).unwrap();
    }

    #[test]
    fn ten_intakes_seven_accepted_three_missed() {
        let store = MemoryStore::new();
        let intakes = add_medicine(&store, "p1", "m1", "Ibuprofen");
        for i in 0..10 {
            add_intake(&store, &intakes, Some(i < 7), "2024-05-01T08:00:00Z");
        }

        let report = compute_adherence(&store, "p1", day()).unwrap();
        assert_eq!(report.accepted, 7);
        assert_eq!(report.missed, 3);
        assert_eq!(report.total, 10);
        assert_eq!(report.medicines[0].row(), MedicineRow {
            name: "Ibuprofen".into(),
            taken_today: 0,
            accepted: 7,
            missed: 3,
            total: 10,
        });
    }

    #[test]
    fn unanswered_intakes_count_toward_total_only() {
        let store = MemoryStore::new();
        let intakes = add_medicine(&store, "p1", "m1", "Vitamin D");
        add_intake(&store, &intakes, Some(true), "2024-05-20T08:00:00Z");
        add_intake(&store, &intakes, Some(false), "2024-05-20T20:00:00Z");
        add_intake(&store, &intakes, None, "2024-05-20T22:00:00Z");
        add_intake(&store, &intakes, Some(true), "2024-05-19T08:00:00Z");

        let report = compute_adherence(&store, "p1", day()).unwrap();
        let m = &report.medicines[0];
        assert_eq!((m.taken_today, m.missed_today), (1, 1));
        assert_eq!((m.accepted, m.missed, m.total), (2, 1, 4));
        assert!(m.accepted + m.missed <= m.total);
        assert_eq!(report.today_total, 2);
    }

    #[test]
    fn totals_accumulate_and_videos_are_counted() {
        let store = MemoryStore::new();
        let a = add_medicine(&store, "p1", "a", "A");
        let b = add_medicine(&store, "p1", "b", "B");
        add_intake(&store, &a, Some(true), "2024-05-20T08:00:00Z");
        add_intake(&store, &b, Some(true), "2024-05-20T09:00:00Z");
        add_intake(&store, &b, Some(false), "2024-05-18T09:00:00Z");

        let progress = patient_data("p1").collection(collections::VIDEO_PROGRESS);
        store.add(&progress, json!({"status": true})).unwrap();
        store.add(&progress, json!({"status": false})).unwrap();
        store.add(&progress, json!({})).unwrap();

        let report = compute_adherence(&store, "p1", day()).unwrap();
        assert_eq!((report.accepted, report.missed, report.total), (2, 1, 3));
        assert_eq!(report.taken_today, 2);
        assert_eq!((report.videos_viewed, report.videos_total), (1, 3));
    }

    #[test]
    fn compute_does_not_write() {
        let store = MemoryStore::new();
        let intakes = add_medicine(&store, "p1", "m1", "A");
        add_intake(&store, &intakes, Some(true), "2024-05-20T08:00:00Z");
        let before = store.len();
        compute_adherence(&store, "p1", day()).unwrap();
        assert_eq!(store.len(), before);
    }

    #[test]
    fn persist_writes_summary_and_snapshot() {
        let store = MemoryStore::new();
        let intakes = add_medicine(&store, "p1", "m1", "A");
        add_intake(&store, &intakes, Some(true), "2024-05-20T08:00:00Z");
        add_intake(&store, &intakes, Some(false), "2024-05-20T20:00:00Z");
        add_intake(&store, &intakes, Some(false), "2024-05-01T20:00:00Z");

        let report = compute_adherence(&store, "p1", day()).unwrap();
        persist_adherence(&store, &report).unwrap();

        let summary = store
            .get(
                &patient_data("p1")
                    .collection(collections::PROGRESS_SUMMARY)
                    .doc("2024-05-20"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(summary.get("taken"), Some(&json!(1)));
        assert_eq!(summary.get("missed"), Some(&json!(1)));
        assert_eq!(summary.get("total"), Some(&json!(2)));
        assert_eq!(summary.get_str("date"), Some("2024-05-20"));

        let snapshot = store
            .get(&CollectionPath::new(collections::ANALYTICS).doc("p1"))
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.get("accepted"), Some(&json!(1)));
        assert_eq!(snapshot.get("missed"), Some(&json!(2)));
        let rows: Vec<MedicineRow> =
            serde_json::from_value(snapshot.get("medicines").cloned().unwrap()).unwrap();
        assert_eq!(rows, report.rows());
    }

    #[test]
    fn other_doctors_cannot_read_adherence() {
        let store = MemoryStore::new();
        store
            .set(
                &CollectionPath::new(collections::PATIENTS).doc("p1"),
                json!({"doctorUid": "d1"}),
            )
            .unwrap();
        assert!(patient_adherence(&store, "d1", "p1", day()).is_ok());
        assert!(matches!(
            patient_adherence(&store, "d2", "p1", day()),
            Err(AnalyticsError::NotYourPatient(_))
        ));
    }

    #[test]
    fn picker_search_matches_iin_email_and_name() {
        let store = MemoryStore::new();
        let patients = CollectionPath::new(collections::PATIENTS);
        store
            .set(
                &patients.doc("p1"),
                json!({"doctorUid": "d1", "iin": "990101300123", "email": "aigerim@mail.kz",
                       "firstName": "Aigerim", "lastName": "Sadykova"}),
            )
            .unwrap();
        store
            .set(
                &patients.doc("p2"),
                json!({"doctorUid": "d1", "iin": "850505400456", "email": "bolat@mail.kz",
                       "firstName": "Bolat", "lastName": "Nurlanov", "middleName": "Serikovich"}),
            )
            .unwrap();
        let all = doctor_patients(&store, "d1").unwrap();
        assert_eq!(all.len(), 2);

        let ids = |term: &str| -> Vec<String> {
            search_patients(&all, term).into_iter().map(|p| p.id).collect()
        };
        assert_eq!(ids("300123"), ["p1"]);
        assert_eq!(ids("BOLAT@"), ["p2"]);
        assert_eq!(ids("nurlanov bolat serik"), ["p2"]);
        assert_eq!(ids("").len(), 2);

        let decoded = Patient::from_document(&store.get(&patients.doc("p1")).unwrap().unwrap());
        assert!(decoded.is_ok());
    }

    #[test]
    fn export_produces_xlsx_bytes() {
        let rows = vec![MedicineRow {
            name: "Ibuprofen".into(),
            taken_today: 1,
            accepted: 7,
            missed: 3,
            total: 10,
        }];
        let bytes = export_xlsx(&rows).unwrap();
        // XLSX is a zip container.
        assert_eq!(&bytes[..2], b"PK");
        assert!(export_xlsx(&[]).unwrap().len() > 2);
    }
}
