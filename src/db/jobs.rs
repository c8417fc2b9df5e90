//! Job persistence backing the priority queue (§3 Job, §4.D).
//!
//! This is the durable store the in-process queue in [`crate::jobs`]
//! reconciles against on startup; the queue itself holds the live priority
//! ordering in memory.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => JobPriority::Low,
            "high" => JobPriority::High,
            "urgent" => JobPriority::Urgent,
            _ => JobPriority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub kind: String,
    pub priority: String,
    pub status: String,
    pub data: Option<String>,
    pub progress: i64,
    pub total_items: Option<i64>,
    pub processed_items: i64,
    pub errors: Option<String>,
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get("id")?,
        kind: row.get("kind")?,
        priority: row.get("priority")?,
        status: row.get("status")?,
        data: row.get("data")?,
        progress: row.get("progress")?,
        total_items: row.get("total_items")?,
        processed_items: row.get("processed_items")?,
        errors: row.get("errors")?,
    })
}

impl Database {
    pub fn enqueue_job(&self, kind: &str, priority: JobPriority, data: Option<&str>) -> Result<JobRecord> {
        self.conn().execute(
            "INSERT INTO jobs (kind, priority, data) VALUES (?1,?2,?3)",
            params![kind, priority.as_str(), data],
        )?;
        let id = self.conn().last_insert_rowid();
        Ok(self.get_job(id)?.expect("just inserted"))
    }

    pub fn get_job(&self, id: i64) -> Result<Option<JobRecord>> {
        let job = self
            .conn()
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], row_to_job)
            .optional()?;
        Ok(job)
    }

    /// Jobs not yet terminal, ordered for a fresh in-memory queue to
    /// reconstruct priority order on startup (urgent first, oldest first
    /// within a tier).
    pub fn pending_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT * FROM jobs WHERE status = 'pending'
            ORDER BY CASE priority
                WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3
            END, id
            "#,
        )?;
        let jobs = stmt.query_map([], row_to_job)?.filter_map(|r| r.ok()).collect();
        Ok(jobs)
    }

    pub fn mark_job_running(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET status = 'running', started_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn update_job_progress(&self, id: i64, processed_items: i64, total_items: Option<i64>) -> Result<()> {
        let progress = match total_items {
            Some(total) if total > 0 => ((processed_items as f64 / total as f64) * 100.0) as i64,
            _ => 0,
        };
        self.conn().execute(
            "UPDATE jobs SET processed_items = ?2, total_items = ?3, progress = ?4 WHERE id = ?1",
            params![id, processed_items, total_items, progress],
        )?;
        Ok(())
    }

    pub fn complete_job(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET status = 'completed', progress = 100, completed_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn fail_job(&self, id: i64, error: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET status = 'failed', errors = ?2, completed_at = ?3 WHERE id = ?1",
            params![id, error, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn cancel_job(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Removes completed/failed/cancelled jobs older than `cutoff_rfc3339`
    /// (§4.D periodic cleanup sweep). Returns the number removed.
    pub fn delete_terminal_jobs_older_than(&self, cutoff_rfc3339: &str) -> Result<usize> {
        let removed = self.conn().execute(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?1
            "#,
            params![cutoff_rfc3339],
        )?;
        Ok(removed)
    }

    /// Jobs stuck `running` past a cutoff, reclaimed by the worker pool's
    /// cleanup sweep after an unclean shutdown (§4.D).
    pub fn stale_running_jobs(&self, cutoff_rfc3339: &str) -> Result<Vec<JobRecord>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM jobs WHERE status = 'running' AND started_at < ?1")?;
        let jobs = stmt
            .query_map(params![cutoff_rfc3339], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_jobs_are_ordered_by_priority_then_age() {
        let db = Database::open_in_memory().unwrap();
        db.enqueue_job("scan", JobPriority::Normal, None).unwrap();
        let urgent = db.enqueue_job("reprocess", JobPriority::Urgent, None).unwrap();
        db.enqueue_job("scan", JobPriority::Low, None).unwrap();

        let pending = db.pending_jobs().unwrap();
        assert_eq!(pending[0].id, urgent.id);
        assert_eq!(pending.last().unwrap().priority, "low");
    }

    #[test]
    fn progress_percentage_is_computed_from_totals() {
        let db = Database::open_in_memory().unwrap();
        let job = db.enqueue_job("scan", JobPriority::Normal, None).unwrap();

        db.update_job_progress(job.id, 25, Some(100)).unwrap();

        let reloaded = db.get_job(job.id).unwrap().unwrap();
        assert_eq!(reloaded.progress, 25);
    }
}
