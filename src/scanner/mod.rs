//! File discovery + index reconciliation (§4.C).
//!
//! Grounded on the predecessor's `scanner/mod.rs` orchestration shape and
//! `scanner/change_detection.rs`'s size/mtime comparison, now folded into
//! [`crate::db::file_index`]'s upsert. A single-flight `AtomicBool` guard
//! mirrors the predecessor's cancellable-scan pattern without the TUI
//! progress channel, which has no counterpart here.

pub mod discovery;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;

pub use discovery::{discover_images, SUPPORTED_EXTENSIONS};

/// Number of files processed between cooperative yields (§5 suspension
/// points: filesystem scans yield every ~50 entries).
const YIELD_EVERY: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub discovered: usize,
    pub new_entries: usize,
    pub changed_entries: usize,
    pub unreadable: usize,
}

/// Single-flight guard: a second concurrent scan is a no-op (§4.C).
pub struct Scanner {
    scanning: Arc<AtomicBool>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self { scanning: Arc::new(AtomicBool::new(false)) }
    }

    /// Runs a full discovery pass under `source_dir`, upserting every
    /// supported file into the file index. Returns `Ok(None)` without doing
    /// any work if a scan is already in progress.
    pub async fn scan(&self, source_dir: &Path, db: &Database) -> Result<Option<ScanReport>> {
        if self.scanning.swap(true, Ordering::SeqCst) {
            debug!("scan already in progress, skipping");
            return Ok(None);
        }
        let guard = ScanGuard(&self.scanning);

        let paths = discover_images(source_dir);
        let mut report = ScanReport { discovered: paths.len(), ..Default::default() };
        info!(count = paths.len(), "discovered candidate files");

        for (idx, path) in paths.iter().enumerate() {
            match upsert_one(db, path) {
                Ok(Change::New) => report.new_entries += 1,
                Ok(Change::Changed) => report.changed_entries += 1,
                Ok(Change::Unchanged) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable file during scan");
                    report.unreadable += 1;
                }
            }

            if (idx + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        drop(guard);
        Ok(Some(report))
    }
}

struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Change {
    New,
    Changed,
    Unchanged,
}

fn upsert_one(db: &Database, path: &Path) -> Result<Change> {
    let metadata = std::fs::metadata(path)?;
    let size_bytes = metadata.len() as i64;
    let mtime: DateTime<Utc> = metadata.modified()?.into();
    let mtime_str = mtime.to_rfc3339();

    let before = db.get_file_index_entry(&path.to_string_lossy())?;
    db.upsert_discovered_path(&path.to_string_lossy(), size_bytes, &mtime_str)?;

    Ok(match before {
        None => Change::New,
        Some(existing) if existing.size_bytes != size_bytes || existing.mtime != mtime_str => Change::Changed,
        Some(_) => Change::Unchanged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn scan_inserts_one_entry_per_discovered_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("b.png"), b"y").unwrap();
        let db = Database::open_in_memory().unwrap();

        let scanner = Scanner::new();
        let report = scanner.scan(dir.path(), &db).await.unwrap().unwrap();

        assert_eq!(report.discovered, 2);
        assert_eq!(report.new_entries, 2);
    }

    #[tokio::test]
    async fn rescanning_unchanged_directory_reports_no_new_entries() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        let db = Database::open_in_memory().unwrap();
        let scanner = Scanner::new();
        scanner.scan(dir.path(), &db).await.unwrap();

        let second = scanner.scan(dir.path(), &db).await.unwrap().unwrap();
        assert_eq!(second.new_entries, 0);
        assert_eq!(second.changed_entries, 0);
    }
}
