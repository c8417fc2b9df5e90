//! Selective Trainer (§4.G): controlled upload of verified faces to the
//! face service, plus the training queue and auto-training selector.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::faces::RecognitionStatus;
use crate::db::Database;
use crate::error::EngineError;
use crate::faceservice::FaceServiceClient;

const MAX_QUEUE_BATCH: i64 = 5;
const MAX_AUTO_TRAIN_BATCH: i64 = 10;

#[derive(Debug, Clone)]
pub struct TrainResult {
    pub person_id: i64,
    pub uploaded: i64,
    pub skipped: i64,
    pub subject_id: String,
    pub errors: Vec<String>,
}

/// Trains a single person: uploads only faces that pass the filter
/// `assigned_by = user AND NOT compreface_synced`, optionally capped.
pub fn train_person(db: &Database, client: &FaceServiceClient, person_id: i64, max_faces: Option<i64>) -> Result<TrainResult> {
    let person = db.get_person(person_id)?.context("person not found")?;
    db.set_recognition_status(person_id, RecognitionStatus::Training)?;

    let subject_id = match &person.face_service_subject_id {
        Some(id) => id.clone(),
        None => {
            let subject = format!("person-{}", person.id);
            client.create_subject(&subject)?;
            db.set_person_subject_id(person_id, &subject)?;
            subject
        }
    };

    let faces = db.get_trainable_faces(person_id, max_faces)?;
    let mut uploaded = 0i64;
    let mut skipped = 0i64;
    let mut errors = Vec::new();

    for face in &faces {
        let Some(path) = face.face_image_path.as_ref() else {
            skipped += 1;
            continue;
        };
        match client.add_face_to_subject(&subject_id, std::path::Path::new(path)) {
            Ok(response) => {
                db.mark_face_synced(face.id)?;
                db.log_face_training_attempt(face.id, person_id, true, Some(&response.image_id), None)?;
                uploaded += 1;
            }
            Err(e) => {
                let message = e.to_string();
                db.log_face_training_attempt(face.id, person_id, false, None, Some(&message))?;
                warn!(face_id = face.id, error = %message, "face upload failed");
                errors.push(message);
                skipped += 1;
            }
        }
    }

    let final_status = if uploaded > 0 { RecognitionStatus::Trained } else { RecognitionStatus::Failed };
    db.record_training_completion(person_id, uploaded, final_status)?;

    info!(person_id, uploaded, skipped, "training pass complete");
    Ok(TrainResult { person_id, uploaded, skipped, subject_id, errors })
}

/// Refuses to enqueue a person who already has a non-terminal job, or who
/// has fewer than `min_faces_threshold` confirmed faces (the training
/// guardrail).
pub fn queue_person_for_training(db: &Database, person_id: i64, job_type: &str, min_faces_threshold: i64) -> Result<Option<i64>> {
    let person = db.get_person(person_id)?.context("person not found")?;
    if person.face_count < min_faces_threshold {
        return Err(EngineError::InvalidInput(format!(
            "person {person_id} has {} confirmed face(s), below the training threshold of {min_faces_threshold}",
            person.face_count
        ))
        .into());
    }
    if db.has_active_training_job(person_id)? {
        return Ok(None);
    }
    let job = db.create_training_job(person_id, job_type)?;
    Ok(Some(job.id))
}

/// Drains up to `MAX_QUEUE_BATCH` pending jobs FIFO, running each to
/// completion and transitioning its status.
pub fn process_training_queue(db: &Database, client: &FaceServiceClient) -> Result<usize> {
    let jobs = db.pending_training_jobs(MAX_QUEUE_BATCH)?;
    let mut processed = 0;
    for job in jobs {
        db.start_training_job(job.id)?;
        match train_person(db, client, job.person_id, None) {
            Ok(result) => {
                let failed = result.errors.len() as i64;
                db.complete_training_job(job.id, result.uploaded, failed)?;
            }
            Err(e) => {
                warn!(job_id = job.id, error = %e, "training job failed");
                db.fail_training_job(job.id)?;
            }
        }
        processed += 1;
    }
    Ok(processed)
}

/// Periodic selection of persons due for a first pass or a refresh.
pub fn select_auto_training_candidates(db: &Database, config: &Config) -> Result<Vec<i64>> {
    let recognition = &config.processing.face_recognition;
    let people = db.people_due_for_auto_training(
        recognition.min_faces_threshold as i64,
        recognition.training_interval_days,
        MAX_AUTO_TRAIN_BATCH,
    )?;
    Ok(people.into_iter().map(|p| p.id).collect())
}

/// Queues every auto-training candidate that isn't already queued.
pub fn run_auto_training_pass(db: &Database, config: &Config) -> Result<usize> {
    if !config.processing.face_recognition.auto_training_enabled {
        return Ok(0);
    }
    let candidates = select_auto_training_candidates(db, config)?;
    let min_faces_threshold = config.processing.face_recognition.min_faces_threshold as i64;
    let mut queued = 0;
    for person_id in candidates {
        if queue_person_for_training(db, person_id, "incremental", min_faces_threshold)?.is_some() {
            queued += 1;
        }
    }
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::faces::{AssignedBy, NewFace};
    use crate::db::objects::BoundingBox;

    fn bbox() -> BoundingBox {
        BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 }
    }

    fn person_with_faces(db: &Database, name: &str, count: usize) -> crate::db::faces::Person {
        let person = db.find_or_create_person(name).unwrap();
        let image_id = db
            .insert_image(&crate::db::images::NewImage {
                hash: format!("hash-{name}"),
                source_path: format!("{name}.jpg"),
                relative_path: format!("2026/01/{name}.jpg"),
                size_bytes: 10,
                ..Default::default()
            })
            .unwrap();
        let faces: Vec<NewFace> = (0..count)
            .map(|_| NewFace {
                bbox: bbox(),
                detection_confidence: 0.95,
                gender: None,
                gender_confidence: None,
                age_low: None,
                age_high: None,
                age_confidence: None,
                landmarks_json: None,
                face_image_path: Some(format!("/tmp/{name}.jpg")),
            })
            .collect();
        for face_id in db.insert_detected_faces(image_id, &faces).unwrap() {
            db.assign_face_to_person(face_id, person.id, AssignedBy::User, None).unwrap();
        }
        db.get_person(person.id).unwrap().unwrap()
    }

    #[test]
    fn queueing_twice_refuses_the_second_request() {
        let db = Database::open_in_memory().unwrap();
        let person = person_with_faces(&db, "ada", 3);

        let first = queue_person_for_training(&db, person.id, "manual", 3).unwrap();
        assert!(first.is_some());

        let second = queue_person_for_training(&db, person.id, "manual", 3).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn queueing_below_the_face_threshold_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let person = person_with_faces(&db, "grace", 1);

        let result = queue_person_for_training(&db, person.id, "manual", 3);
        assert!(result.is_err());
    }

    #[test]
    fn auto_training_skips_people_below_the_face_threshold() {
        let db = Database::open_in_memory().unwrap();
        let person = db.find_or_create_person("Grace").unwrap();
        let image_id = db
            .insert_image(&crate::db::images::NewImage {
                hash: "h1".into(),
                source_path: "a.jpg".into(),
                relative_path: "2026/01/a.jpg".into(),
                size_bytes: 10,
                mime: Some("image/jpeg".into()),
                width: Some(100),
                height: Some(100),
                ..Default::default()
            })
            .unwrap();
        db.insert_detected_faces(
            image_id,
            &[NewFace {
                bbox: bbox(),
                detection_confidence: 0.95,
                gender: None,
                gender_confidence: None,
                age_low: None,
                age_high: None,
                age_confidence: None,
                landmarks_json: None,
                face_image_path: Some("/tmp/face.jpg".into()),
            }],
        )
        .unwrap();
        let face = db.get_faces_for_image(image_id).unwrap().into_iter().next().unwrap();
        db.assign_face_to_person(face.id, person.id, AssignedBy::User, None).unwrap();

        let candidates = select_auto_training_candidates(&db, &Config::default()).unwrap();
        assert!(!candidates.contains(&person.id));
    }
}
