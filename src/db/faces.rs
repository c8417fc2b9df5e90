//! DetectedFace and Person persistence (§3 DetectedFace, Person).
//!
//! Grounded on the predecessor's `db/faces.rs` — person CRUD, face CRUD, and
//! embedding-adjacent query shapes carry over; extended with assignment
//! provenance and face-service sync flags the spec requires.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::objects::BoundingBox;
use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignedBy {
    User,
    Manual,
    AutoRecognition,
    AutoCompreface,
    System,
}

impl AssignedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignedBy::User => "user",
            AssignedBy::Manual => "manual",
            AssignedBy::AutoRecognition => "auto_recognition",
            AssignedBy::AutoCompreface => "auto_compreface",
            AssignedBy::System => "system",
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, AssignedBy::AutoRecognition | AssignedBy::AutoCompreface)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(AssignedBy::User),
            "manual" => Some(AssignedBy::Manual),
            "auto_recognition" => Some(AssignedBy::AutoRecognition),
            "auto_compreface" => Some(AssignedBy::AutoCompreface),
            "system" => Some(AssignedBy::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionStatus {
    Untrained,
    Training,
    Trained,
    Failed,
}

impl RecognitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionStatus::Untrained => "untrained",
            RecognitionStatus::Training => "training",
            RecognitionStatus::Trained => "trained",
            RecognitionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "training" => RecognitionStatus::Training,
            "trained" => RecognitionStatus::Trained,
            "failed" => RecognitionStatus::Failed,
            _ => RecognitionStatus::Untrained,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewFace {
    pub bbox: BoundingBox,
    pub detection_confidence: f64,
    pub gender: Option<String>,
    pub gender_confidence: Option<f64>,
    pub age_low: Option<i64>,
    pub age_high: Option<i64>,
    pub age_confidence: Option<f64>,
    pub landmarks_json: Option<String>,
    pub face_image_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Face {
    pub id: i64,
    pub image_id: i64,
    pub bbox: BoundingBox,
    pub detection_confidence: f64,
    pub face_image_path: Option<String>,
    pub person_id: Option<i64>,
    pub assigned_by: Option<String>,
    pub compreface_synced: bool,
    pub compreface_uploaded_at: Option<String>,
}

fn row_to_face(row: &rusqlite::Row) -> rusqlite::Result<Face> {
    Ok(Face {
        id: row.get("id")?,
        image_id: row.get("image_id")?,
        bbox: BoundingBox {
            x: row.get("bbox_x")?,
            y: row.get("bbox_y")?,
            width: row.get("bbox_width")?,
            height: row.get("bbox_height")?,
        },
        detection_confidence: row.get("detection_confidence")?,
        face_image_path: row.get("face_image_path")?,
        person_id: row.get("person_id")?,
        assigned_by: row.get("assigned_by")?,
        compreface_synced: row.get::<_, i64>("compreface_synced")? != 0,
        compreface_uploaded_at: row.get("compreface_uploaded_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub face_service_subject_id: Option<String>,
    pub recognition_status: String,
    pub training_face_count: i64,
    pub last_trained_at: Option<String>,
    pub face_count: i64,
}

impl Database {
    // ---------- faces ----------

    pub fn insert_detected_faces(&self, image_id: i64, faces: &[NewFace]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(faces.len());
        for face in faces {
            self.conn().execute(
                r#"
                INSERT INTO detected_faces (
                    image_id, bbox_x, bbox_y, bbox_width, bbox_height, detection_confidence,
                    gender, gender_confidence, age_low, age_high, age_confidence,
                    landmarks, face_image_path
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
                "#,
                params![
                    image_id,
                    face.bbox.x,
                    face.bbox.y,
                    face.bbox.width,
                    face.bbox.height,
                    face.detection_confidence,
                    face.gender,
                    face.gender_confidence,
                    face.age_low,
                    face.age_high,
                    face.age_confidence,
                    face.landmarks_json,
                    face.face_image_path,
                ],
            )?;
            ids.push(self.conn().last_insert_rowid());
        }
        Ok(ids)
    }

    pub fn get_face(&self, face_id: i64) -> Result<Option<Face>> {
        let face = self
            .conn()
            .query_row("SELECT * FROM detected_faces WHERE id = ?1", params![face_id], row_to_face)
            .optional()?;
        Ok(face)
    }

    pub fn get_faces_for_image(&self, image_id: i64) -> Result<Vec<Face>> {
        let mut stmt = self.conn().prepare("SELECT * FROM detected_faces WHERE image_id = ?1")?;
        let faces = stmt
            .query_map(params![image_id], row_to_face)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(faces)
    }

    /// Unassigned faces eligible for clustering/suggestions (§4.J): no
    /// person, detection confidence above `min_confidence`, face image on
    /// disk.
    pub fn get_unassigned_faces(&self, min_confidence: f64, limit: i64) -> Result<Vec<Face>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT * FROM detected_faces
            WHERE person_id IS NULL
              AND detection_confidence >= ?1
              AND face_image_path IS NOT NULL
            ORDER BY detection_confidence DESC
            LIMIT ?2
            "#,
        )?;
        let faces = stmt
            .query_map(params![min_confidence, limit], row_to_face)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(faces)
    }

    pub fn count_unassigned_faces(&self, min_confidence: f64) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM detected_faces WHERE person_id IS NULL AND detection_confidence >= ?1",
            params![min_confidence],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn assign_face_to_person(
        &self,
        face_id: i64,
        person_id: i64,
        assigned_by: AssignedBy,
        recognition_method: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE detected_faces SET person_id = ?2, assigned_by = ?3, recognition_method = ?4 WHERE id = ?1",
            params![face_id, person_id, assigned_by.as_str(), recognition_method],
        )?;
        self.recompute_face_count(person_id)?;
        Ok(())
    }

    pub fn unassign_face(&self, face_id: i64) -> Result<()> {
        let person_id: Option<i64> = self
            .conn()
            .query_row("SELECT person_id FROM detected_faces WHERE id = ?1", params![face_id], |r| r.get(0))
            .optional()?
            .flatten();
        self.conn().execute(
            "UPDATE detected_faces SET person_id = NULL, assigned_by = NULL, recognition_method = NULL WHERE id = ?1",
            params![face_id],
        )?;
        if let Some(pid) = person_id {
            self.recompute_face_count(pid)?;
        }
        Ok(())
    }

    pub fn get_faces_for_person(&self, person_id: i64) -> Result<Vec<Face>> {
        let mut stmt = self.conn().prepare("SELECT * FROM detected_faces WHERE person_id = ?1")?;
        let faces = stmt
            .query_map(params![person_id], row_to_face)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(faces)
    }

    /// Faces eligible for the Selective Trainer (§4.G): this person, user
    /// assigned, not yet synced.
    pub fn get_trainable_faces(&self, person_id: i64, max: Option<i64>) -> Result<Vec<Face>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT * FROM detected_faces
            WHERE person_id = ?1 AND assigned_by = 'user' AND compreface_synced = 0
            ORDER BY id
            LIMIT ?2
            "#,
        )?;
        let limit = max.unwrap_or(i64::MAX);
        let faces = stmt
            .query_map(params![person_id, limit], row_to_face)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(faces)
    }

    pub fn mark_face_synced(&self, face_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE detected_faces SET compreface_synced = 1, compreface_uploaded_at = ?2 WHERE id = ?1",
            params![face_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn reset_face_sync(&self, face_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE detected_faces SET compreface_synced = 0, compreface_uploaded_at = NULL WHERE id = ?1",
            params![face_id],
        )?;
        Ok(())
    }

    pub fn reset_all_sync_flags(&self) -> Result<usize> {
        let n = self
            .conn()
            .execute("UPDATE detected_faces SET compreface_synced = 0, compreface_uploaded_at = NULL WHERE compreface_synced = 1", [])?;
        Ok(n)
    }

    pub fn count_synced_faces(&self) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM detected_faces WHERE compreface_synced = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_people_with_subject(&self) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM people WHERE face_service_subject_id IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_synced_faces_for_person(&self, person_id: i64) -> Result<Vec<Face>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM detected_faces WHERE person_id = ?1 AND compreface_synced = 1")?;
        let faces = stmt
            .query_map(params![person_id], row_to_face)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(faces)
    }

    pub fn get_auto_assigned_synced_faces(&self, person_id: i64) -> Result<Vec<Face>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT * FROM detected_faces
            WHERE person_id = ?1 AND compreface_synced = 1
              AND assigned_by IN ('auto_recognition', 'auto_compreface')
            "#,
        )?;
        let faces = stmt
            .query_map(params![person_id], row_to_face)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(faces)
    }

    // ---------- people ----------

    pub fn find_person_by_name(&self, name: &str) -> Result<Option<Person>> {
        let person = self
            .conn()
            .query_row(
                "SELECT * FROM people WHERE name = ?1 COLLATE NOCASE",
                params![name],
                Self::row_to_person,
            )
            .optional()?;
        Ok(person)
    }

    pub fn find_or_create_person(&self, name: &str) -> Result<Person> {
        if let Some(p) = self.find_person_by_name(name)? {
            return Ok(p);
        }
        self.conn()
            .execute("INSERT INTO people (name) VALUES (?1)", params![name])?;
        let id = self.conn().last_insert_rowid();
        Ok(self.get_person(id)?.expect("just inserted"))
    }

    pub fn get_person(&self, id: i64) -> Result<Option<Person>> {
        let person = self
            .conn()
            .query_row("SELECT * FROM people WHERE id = ?1", params![id], Self::row_to_person)
            .optional()?;
        Ok(person)
    }

    pub fn get_all_people(&self) -> Result<Vec<Person>> {
        let mut stmt = self.conn().prepare("SELECT * FROM people ORDER BY name")?;
        let people = stmt
            .query_map([], Self::row_to_person)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(people)
    }

    pub fn find_person_by_subject_id(&self, subject_id: &str) -> Result<Option<Person>> {
        let person = self
            .conn()
            .query_row(
                "SELECT * FROM people WHERE face_service_subject_id = ?1",
                params![subject_id],
                Self::row_to_person,
            )
            .optional()?;
        Ok(person)
    }

    pub fn set_person_subject_id(&self, person_id: i64, subject_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE people SET face_service_subject_id = ?2 WHERE id = ?1",
            params![person_id, subject_id],
        )?;
        Ok(())
    }

    pub fn clear_person_subject_id(&self, person_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE people SET face_service_subject_id = NULL, last_trained_at = NULL WHERE id = ?1",
            params![person_id],
        )?;
        Ok(())
    }

    pub fn set_recognition_status(&self, person_id: i64, status: RecognitionStatus) -> Result<()> {
        self.conn().execute(
            "UPDATE people SET recognition_status = ?2 WHERE id = ?1",
            params![person_id, status.as_str()],
        )?;
        Ok(())
    }

    pub fn record_training_completion(&self, person_id: i64, uploaded: i64, status: RecognitionStatus) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE people
            SET recognition_status = ?2, training_face_count = training_face_count + ?3, last_trained_at = ?4
            WHERE id = ?1
            "#,
            params![person_id, status.as_str(), uploaded, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Recomputes `Person.face_count` from the authoritative join, keeping
    /// invariant 3 of §8.
    pub fn recompute_face_count(&self, person_id: i64) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE people SET face_count = (
                SELECT COUNT(*) FROM detected_faces WHERE person_id = people.id
            ) WHERE id = ?1
            "#,
            params![person_id],
        )?;
        Ok(())
    }

    pub(crate) fn row_to_person(row: &rusqlite::Row) -> rusqlite::Result<Person> {
        Ok(Person {
            id: row.get("id")?,
            name: row.get("name")?,
            face_service_subject_id: row.get("face_service_subject_id")?,
            recognition_status: row.get("recognition_status")?,
            training_face_count: row.get("training_face_count")?,
            last_trained_at: row.get("last_trained_at")?,
            face_count: row.get("face_count")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_face(confidence: f64) -> NewFace {
        NewFace {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
            detection_confidence: confidence,
            gender: None,
            gender_confidence: None,
            age_low: None,
            age_high: None,
            age_confidence: None,
            landmarks_json: None,
            face_image_path: Some("faces/a__face_0.jpg".into()),
        }
    }

    fn seed_image(db: &Database) -> i64 {
        db.insert_image(&crate::db::images::NewImage {
            hash: "h1".into(),
            source_path: "/a.jpg".into(),
            relative_path: "2024/01/a_deadbeef.jpg".into(),
            size_bytes: 100,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn assigning_a_face_updates_person_face_count() {
        let db = Database::open_in_memory().unwrap();
        let image_id = seed_image(&db);
        let face_ids = db.insert_detected_faces(image_id, &[new_face(0.9)]).unwrap();
        let person = db.find_or_create_person("Ada").unwrap();

        db.assign_face_to_person(face_ids[0], person.id, AssignedBy::User, None).unwrap();

        let refreshed = db.get_person(person.id).unwrap().unwrap();
        assert_eq!(refreshed.face_count, 1);
    }

    #[test]
    fn unassigning_a_face_decrements_person_face_count() {
        let db = Database::open_in_memory().unwrap();
        let image_id = seed_image(&db);
        let face_ids = db.insert_detected_faces(image_id, &[new_face(0.9)]).unwrap();
        let person = db.find_or_create_person("Ada").unwrap();
        db.assign_face_to_person(face_ids[0], person.id, AssignedBy::User, None).unwrap();

        db.unassign_face(face_ids[0]).unwrap();

        let refreshed = db.get_person(person.id).unwrap().unwrap();
        assert_eq!(refreshed.face_count, 0);
    }

    #[test]
    fn unassigned_faces_excludes_low_confidence() {
        let db = Database::open_in_memory().unwrap();
        let image_id = seed_image(&db);
        db.insert_detected_faces(image_id, &[new_face(0.5), new_face(0.95)]).unwrap();

        let found = db.get_unassigned_faces(0.8, 10).unwrap();
        assert_eq!(found.len(), 1);
    }
}
