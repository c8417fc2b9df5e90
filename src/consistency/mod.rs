//! Consistency Manager (§4.H): reconciles the DB with the face service.

use anyhow::Result;
use tracing::warn;

use crate::db::Database;
use crate::faceservice::FaceServiceClient;

#[derive(Debug, Clone, Default)]
pub struct PersonSyncResult {
    pub created: i64,
    pub updated: i64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FaceSyncResult {
    pub uploaded: i64,
    pub skipped: i64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub missing_subject: Vec<i64>,
    pub orphaned_faces: Vec<i64>,
}

/// For every Person, ensures a subject exists on the service and matches
/// what's recorded locally.
pub fn sync_persons(db: &Database, client: &FaceServiceClient) -> Result<PersonSyncResult> {
    let mut result = PersonSyncResult::default();
    let remote_subjects = client.list_subjects()?;

    for person in db.get_all_people()? {
        let needs_create = match &person.face_service_subject_id {
            None => true,
            Some(id) => !remote_subjects.contains(id),
        };
        if !needs_create {
            continue;
        }
        let subject = format!("person-{}", person.id);
        match client.create_subject(&subject) {
            Ok(()) => {
                db.set_person_subject_id(person.id, &subject)?;
                if person.face_service_subject_id.is_some() {
                    result.updated += 1;
                } else {
                    result.created += 1;
                }
            }
            Err(e) => {
                warn!(person_id = person.id, error = %e, "subject sync failed");
                result.errors.push(e.to_string());
            }
        }
    }
    Ok(result)
}

/// For every Person with unsynced faces, uploads each (skipping ones
/// whose image is missing from disk).
pub fn sync_faces(db: &Database, client: &FaceServiceClient) -> Result<FaceSyncResult> {
    let mut result = FaceSyncResult::default();

    for person in db.get_all_people()? {
        let Some(subject_id) = person.face_service_subject_id.clone() else { continue };
        let faces = db.get_trainable_faces(person.id, None)?;
        for face in faces {
            let Some(path) = face.face_image_path.as_ref() else {
                result.skipped += 1;
                continue;
            };
            if !std::path::Path::new(path).exists() {
                result.skipped += 1;
                continue;
            }
            match client.add_face_to_subject(&subject_id, std::path::Path::new(path)) {
                Ok(_) => {
                    db.mark_face_synced(face.id)?;
                    result.uploaded += 1;
                }
                Err(e) => {
                    warn!(face_id = face.id, error = %e, "face sync failed");
                    result.errors.push(e.to_string());
                }
            }
        }
    }
    Ok(result)
}

pub struct EnsureOptions {
    pub check_faces: bool,
    pub check_persons: bool,
    pub auto_repair: bool,
}

/// Compares DB vs. service-side counts and flags discrepancies; with
/// `auto_repair`, re-uploads orphaned faces.
pub fn ensure_consistency(db: &Database, client: &FaceServiceClient, options: &EnsureOptions) -> Result<ConsistencyReport> {
    let mut report = ConsistencyReport::default();
    let remote_subjects = client.list_subjects()?;

    for person in db.get_all_people()? {
        if options.check_persons {
            let missing = match &person.face_service_subject_id {
                None => true,
                Some(id) => !remote_subjects.contains(id),
            };
            if missing {
                report.missing_subject.push(person.id);
            }
        }

        if options.check_faces {
            if let Some(subject_id) = &person.face_service_subject_id {
                let remote_faces = client.list_faces()?.into_iter().filter(|f| &f.subject == subject_id).count() as i64;
                let local_faces = db.get_synced_faces_for_person(person.id)?.len() as i64;
                if local_faces > 0 && remote_faces < local_faces / 2 {
                    report.orphaned_faces.push(person.id);
                    if options.auto_repair {
                        for face in db.get_synced_faces_for_person(person.id)? {
                            db.reset_face_sync(face.id)?;
                        }
                        sync_faces(db, client)?;
                    }
                }
            }
        }
    }
    Ok(report)
}

/// Fast check for a single person: warns when the service-side gap
/// against the local synced count exceeds 2.
pub fn quick_consistency_check(db: &Database, client: &FaceServiceClient, person_id: i64) -> Result<bool> {
    let Some(person) = db.get_person(person_id)? else { return Ok(true) };
    let Some(subject_id) = person.face_service_subject_id else { return Ok(false) };

    let remote_faces = client.list_faces()?.into_iter().filter(|f| f.subject == subject_id).count() as i64;
    let local_faces = db.get_synced_faces_for_person(person_id)?.len() as i64;
    let gap = (local_faces - remote_faces).abs();
    if gap > 2 {
        warn!(person_id, gap, "face count gap against the face service exceeds tolerance");
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_check_reports_false_for_a_person_with_no_subject() {
        let db = Database::open_in_memory().unwrap();
        let person = db.find_or_create_person("Ada").unwrap();
        let config = crate::config::FaceServiceConfig { base_url: "http://127.0.0.1:1".into(), ..Default::default() };
        let client = FaceServiceClient::new(&config);
        let result = quick_consistency_check(&db, &client, person.id).unwrap();
        assert!(!result);
    }
}
