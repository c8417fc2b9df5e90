//! FileIndexEntry persistence (§3, §4.C).
//!
//! Grounded on the predecessor's `scanner/change_detection.rs`, which
//! compared mtime alone; the spec additionally tracks size, so both are
//! persisted and compared on re-scan.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileIndexEntry {
    pub id: i64,
    pub path: String,
    pub size_bytes: i64,
    pub mtime: String,
    pub hash: Option<String>,
    pub processing_status: String,
    pub retry_count: i64,
    pub error: Option<String>,
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<FileIndexEntry> {
    Ok(FileIndexEntry {
        id: row.get("id")?,
        path: row.get("path")?,
        size_bytes: row.get("size_bytes")?,
        mtime: row.get("mtime")?,
        hash: row.get("hash")?,
        processing_status: row.get("processing_status")?,
        retry_count: row.get("retry_count")?,
        error: row.get("error")?,
    })
}

impl Database {
    pub fn get_file_index_entry(&self, path: &str) -> Result<Option<FileIndexEntry>> {
        let entry = self
            .conn()
            .query_row("SELECT * FROM file_index_entries WHERE path = ?1", params![path], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// Inserts a newly discovered path, or resets an existing entry back to
    /// `pending` if size or mtime changed since the last scan (§4.C change
    /// detection).
    pub fn upsert_discovered_path(&self, path: &str, size_bytes: i64, mtime: &str) -> Result<FileIndexEntry> {
        if let Some(existing) = self.get_file_index_entry(path)? {
            if existing.size_bytes != size_bytes || existing.mtime != mtime {
                self.conn().execute(
                    r#"
                    UPDATE file_index_entries
                    SET size_bytes = ?2, mtime = ?3, processing_status = 'pending', retry_count = 0, error = NULL
                    WHERE path = ?1
                    "#,
                    params![path, size_bytes, mtime],
                )?;
            }
            return Ok(self.get_file_index_entry(path)?.expect("just touched"));
        }
        self.conn().execute(
            "INSERT INTO file_index_entries (path, size_bytes, mtime) VALUES (?1,?2,?3)",
            params![path, size_bytes, mtime],
        )?;
        Ok(self.get_file_index_entry(path)?.expect("just inserted"))
    }

    pub fn claim_pending_entries(&self, limit: i64) -> Result<Vec<FileIndexEntry>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM file_index_entries WHERE processing_status = 'pending' ORDER BY discovered_at LIMIT ?1")?;
        let entries: Vec<FileIndexEntry> = stmt
            .query_map(params![limit], row_to_entry)?
            .filter_map(|r| r.ok())
            .collect();
        for entry in &entries {
            self.conn().execute(
                "UPDATE file_index_entries SET processing_status = 'processing' WHERE id = ?1",
                params![entry.id],
            )?;
        }
        Ok(entries)
    }

    pub fn mark_entry_completed(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE file_index_entries SET processing_status = 'completed', last_processed_at = ?2, error = NULL WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_entry_hash(&self, id: i64, hash: &str) -> Result<()> {
        self.conn()
            .execute("UPDATE file_index_entries SET hash = ?2 WHERE id = ?1", params![id, hash])?;
        Ok(())
    }

    /// Records a failure and bumps the retry counter; callers decide the max
    /// retry ceiling (§8 edge cases: corrupt/unreadable files).
    pub fn mark_entry_failed(&self, id: i64, error: &str) -> Result<i64> {
        self.conn().execute(
            r#"
            UPDATE file_index_entries
            SET processing_status = 'failed', retry_count = retry_count + 1, error = ?2, last_processed_at = ?3
            WHERE id = ?1
            "#,
            params![id, error, Utc::now().to_rfc3339()],
        )?;
        let retry_count: i64 = self
            .conn()
            .query_row("SELECT retry_count FROM file_index_entries WHERE id = ?1", params![id], |r| r.get(0))?;
        Ok(retry_count)
    }

    /// Resets a failed entry to `pending`, used when `retry_count` is still
    /// under the ceiling.
    pub fn requeue_entry(&self, id: i64) -> Result<()> {
        self.conn()
            .execute("UPDATE file_index_entries SET processing_status = 'pending' WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn count_by_status(&self, status: ProcessingStatus) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM file_index_entries WHERE processing_status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescanning_unchanged_file_does_not_reset_status() {
        let db = Database::open_in_memory().unwrap();
        let entry = db.upsert_discovered_path("/a.jpg", 100, "2024-01-01T00:00:00Z").unwrap();
        db.mark_entry_completed(entry.id).unwrap();

        let rescanned = db.upsert_discovered_path("/a.jpg", 100, "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(rescanned.processing_status, "completed");
    }

    #[test]
    fn rescanning_changed_file_resets_to_pending() {
        let db = Database::open_in_memory().unwrap();
        let entry = db.upsert_discovered_path("/a.jpg", 100, "2024-01-01T00:00:00Z").unwrap();
        db.mark_entry_completed(entry.id).unwrap();

        let rescanned = db.upsert_discovered_path("/a.jpg", 200, "2024-01-02T00:00:00Z").unwrap();
        assert_eq!(rescanned.processing_status, "pending");
    }

    #[test]
    fn failed_entries_increment_retry_count() {
        let db = Database::open_in_memory().unwrap();
        let entry = db.upsert_discovered_path("/a.jpg", 100, "2024-01-01T00:00:00Z").unwrap();

        let first = db.mark_entry_failed(entry.id, "decode error").unwrap();
        let second = db.mark_entry_failed(entry.id, "decode error").unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }
}
