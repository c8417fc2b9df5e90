//! TrainingJob and face-training-log persistence (§3, §4.G Selective
//! Trainer).

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::Database;

#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub id: i64,
    pub person_id: i64,
    pub job_type: String,
    pub status: String,
    pub success_rate: Option<f64>,
    pub added_count: i64,
    pub failed_count: i64,
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<TrainingJob> {
    Ok(TrainingJob {
        id: row.get("id")?,
        person_id: row.get("person_id")?,
        job_type: row.get("job_type")?,
        status: row.get("status")?,
        success_rate: row.get("success_rate")?,
        added_count: row.get("added_count")?,
        failed_count: row.get("failed_count")?,
    })
}

impl Database {
    pub fn create_training_job(&self, person_id: i64, job_type: &str) -> Result<TrainingJob> {
        self.conn().execute(
            "INSERT INTO training_jobs (person_id, job_type, started_at) VALUES (?1,?2,?3)",
            params![person_id, job_type, Utc::now().to_rfc3339()],
        )?;
        let id = self.conn().last_insert_rowid();
        Ok(self.get_training_job(id)?.expect("just inserted"))
    }

    pub fn get_training_job(&self, id: i64) -> Result<Option<TrainingJob>> {
        let job = self
            .conn()
            .query_row("SELECT * FROM training_jobs WHERE id = ?1", params![id], row_to_job)
            .optional()?;
        Ok(job)
    }

    pub fn complete_training_job(&self, id: i64, added: i64, failed: i64) -> Result<()> {
        let total = added + failed;
        let success_rate = if total > 0 { added as f64 / total as f64 } else { 0.0 };
        self.conn().execute(
            r#"
            UPDATE training_jobs
            SET status = 'completed', completed_at = ?2, added_count = ?3, failed_count = ?4, success_rate = ?5
            WHERE id = ?1
            "#,
            params![id, Utc::now().to_rfc3339(), added, failed, success_rate],
        )?;
        Ok(())
    }

    pub fn fail_training_job(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE training_jobs SET status = 'failed', completed_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn recent_training_jobs_for_person(&self, person_id: i64, limit: i64) -> Result<Vec<TrainingJob>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM training_jobs WHERE person_id = ?1 ORDER BY id DESC LIMIT ?2")?;
        let jobs = stmt
            .query_map(params![person_id, limit], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    pub fn log_face_training_attempt(
        &self,
        face_id: i64,
        person_id: i64,
        success: bool,
        service_response: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO face_training_log (face_id, person_id, success, service_response, error)
            VALUES (?1,?2,?3,?4,?5)
            "#,
            params![face_id, person_id, success as i64, service_response, error],
        )?;
        Ok(())
    }

    /// Used by the training queue guard: refuses to enqueue a person who
    /// already has a pending/running job.
    pub fn has_active_training_job(&self, person_id: i64) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM training_jobs WHERE person_id = ?1 AND status IN ('pending', 'running')",
            params![person_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn start_training_job(&self, id: i64) -> Result<()> {
        self.conn().execute("UPDATE training_jobs SET status = 'running' WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn cancel_training_job(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE training_jobs SET status = 'cancelled', completed_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn pending_training_jobs(&self, limit: i64) -> Result<Vec<TrainingJob>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM training_jobs WHERE status = 'pending' ORDER BY id LIMIT ?1")?;
        let jobs = stmt.query_map(params![limit], row_to_job)?.filter_map(|r| r.ok()).collect();
        Ok(jobs)
    }

    /// Candidates for auto-training (§4.G): enough faces, due for a first
    /// pass or a refresh, and no training job already in flight.
    pub fn people_due_for_auto_training(&self, min_faces: i64, retrain_after_days: i64, limit: i64) -> Result<Vec<super::faces::Person>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT * FROM people
            WHERE face_count >= ?1
              AND (
                recognition_status IN ('untrained', 'failed')
                OR (recognition_status = 'trained' AND (
                    last_trained_at IS NULL
                    OR julianday('now') - julianday(last_trained_at) >= ?2
                ))
              )
              AND id NOT IN (SELECT person_id FROM training_jobs WHERE status IN ('pending', 'running'))
            ORDER BY id
            LIMIT ?3
            "#,
        )?;
        let people = stmt
            .query_map(params![min_faces, retrain_after_days, limit], super::Database::row_to_person)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(people)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completing_a_job_computes_success_rate() {
        let db = Database::open_in_memory().unwrap();
        let person = db.find_or_create_person("Ada").unwrap();
        let job = db.create_training_job(person.id, "manual").unwrap();

        db.complete_training_job(job.id, 3, 1).unwrap();

        let reloaded = db.get_training_job(job.id).unwrap().unwrap();
        assert_eq!(reloaded.status, "completed");
        assert!((reloaded.success_rate.unwrap() - 0.75).abs() < 1e-9);
    }
}
