//! Cleanup Service (§4.I): removes subjects from the face service and
//! resets local sync flags.

use anyhow::Result;
use tracing::{info, warn};

use crate::db::faces::AssignedBy;
use crate::db::Database;
use crate::faceservice::FaceServiceClient;

const MANUAL_FACE_KEEP_THRESHOLD: i64 = 50;
const AUTO_FACE_CONFIDENCE_KEEP: f64 = 0.9;

#[derive(Debug, Clone, Default)]
pub struct CleanupPreview {
    pub subjects_removed: i64,
    pub faces_reset: i64,
    pub persons_reset: i64,
    pub errors: Vec<String>,
}

/// Deletes every subject from the service; with `reset_sync` clears the
/// local sync flags; with `reset_persons` also clears subject ids. `dry_run`
/// returns the would-be counts without mutating anything.
pub fn comprehensive_cleanup(db: &Database, client: &FaceServiceClient, reset_sync: bool, reset_persons: bool, dry_run: bool) -> Result<CleanupPreview> {
    let mut preview = CleanupPreview::default();
    let subjects = client.list_subjects()?;
    preview.subjects_removed = subjects.len() as i64;

    if reset_sync {
        preview.faces_reset = db.count_synced_faces()?;
    }
    if reset_persons {
        preview.persons_reset = db.count_people_with_subject()?;
    }

    if dry_run {
        return Ok(preview);
    }

    for subject in subjects {
        if let Err(e) = client.delete_subject(&subject) {
            warn!(subject = %subject, error = %e, "failed to delete subject");
            preview.errors.push(e.to_string());
        }
    }
    if reset_sync {
        db.reset_all_sync_flags()?;
    }
    if reset_persons {
        for person in db.get_all_people()? {
            db.clear_person_subject_id(person.id)?;
        }
    }
    info!(subjects = preview.subjects_removed, faces = preview.faces_reset, "comprehensive cleanup complete");
    Ok(preview)
}

/// Deletes one person's subject and resets that person's face sync flags.
pub fn cleanup_person(db: &Database, client: &FaceServiceClient, person_id: i64, dry_run: bool) -> Result<CleanupPreview> {
    let mut preview = CleanupPreview::default();
    let Some(person) = db.get_person(person_id)? else { return Ok(preview) };
    let Some(subject_id) = person.face_service_subject_id else { return Ok(preview) };

    let synced_faces = db.get_synced_faces_for_person(person_id)?;
    preview.subjects_removed = 1;
    preview.faces_reset = synced_faces.len() as i64;
    preview.persons_reset = 1;

    if dry_run {
        return Ok(preview);
    }

    client.delete_subject(&subject_id)?;
    for face in synced_faces {
        db.reset_face_sync(face.id)?;
    }
    db.clear_person_subject_id(person_id)?;
    Ok(preview)
}

/// Removes auto-assigned, synced faces from the service following the
/// confidence-aware retention policy: persons with many manually assigned
/// faces keep high-confidence auto faces.
pub fn auto_face_cleanup(db: &Database, client: &FaceServiceClient, dry_run: bool) -> Result<CleanupPreview> {
    let mut preview = CleanupPreview::default();

    for person in db.get_all_people()? {
        let manual_count = db
            .get_faces_for_person(person.id)?
            .iter()
            .filter(|f| f.assigned_by.as_deref() == Some(AssignedBy::User.as_str()) || f.assigned_by.as_deref() == Some(AssignedBy::Manual.as_str()))
            .count() as i64;
        let keep_high_confidence = manual_count >= MANUAL_FACE_KEEP_THRESHOLD;

        for face in db.get_auto_assigned_synced_faces(person.id)? {
            if keep_high_confidence && face.detection_confidence >= AUTO_FACE_CONFIDENCE_KEEP {
                continue;
            }
            preview.faces_reset += 1;
            if dry_run {
                continue;
            }
            if let Some(path) = &face.face_image_path {
                let face_ref = std::path::Path::new(path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                if let Err(e) = client.delete_face(&face_ref) {
                    warn!(face_id = face.id, error = %e, "failed to delete face from service");
                    preview.errors.push(e.to_string());
                    continue;
                }
            }
            db.reset_face_sync(face.id)?;
        }
    }
    Ok(preview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FaceServiceConfig;

    fn client() -> FaceServiceClient {
        FaceServiceClient::new(&FaceServiceConfig { base_url: "http://127.0.0.1:1".into(), ..Default::default() })
    }

    #[test]
    fn cleanup_person_without_a_subject_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let person = db.find_or_create_person("Ada").unwrap();
        let preview = cleanup_person(&db, &client(), person.id, true).unwrap();
        assert_eq!(preview.subjects_removed, 0);
    }

    #[test]
    fn auto_cleanup_dry_run_does_not_touch_sync_flags() {
        let db = Database::open_in_memory().unwrap();
        let person = db.find_or_create_person("Grace").unwrap();
        let preview = auto_face_cleanup(&db, &client(), true).unwrap();
        assert_eq!(preview.faces_reset, 0);
        let _ = person;
    }
}
