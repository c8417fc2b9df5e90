//! Job Queue + Worker Pool (§4.D).

pub mod pool;
pub mod queue;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};

use crate::db::Database;

pub use pool::{CancelRegistry, CancelToken, JobContext, JobFuture, JobHandler, WorkerPool};
pub use queue::{JobQueue, QueuedJob};

/// The seven job kinds enumerated in §4.D; dispatch keys registered on the
/// worker pool use [`JobKind::as_str`] so the persisted `kind` column and
/// the in-process handler map always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    ImageProcessing,
    FaceDetection,
    ObjectDetection,
    SmartAlbums,
    Scan,
    Thumbnail,
    FaceRecognition,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ImageProcessing => "image_processing",
            JobKind::FaceDetection => "face_detection",
            JobKind::ObjectDetection => "object_detection",
            JobKind::SmartAlbums => "smart_albums",
            JobKind::Scan => "scan",
            JobKind::Thumbnail => "thumbnail",
            JobKind::FaceRecognition => "face_recognition",
        }
    }
}

/// Reclaims jobs left `running` by an unclean shutdown, per §4.D; call once
/// at startup before the pool resumes dequeuing.
pub fn reclaim_stale_running_jobs(db: &Database, stale_after: std::time::Duration) -> Result<usize> {
    let cutoff = Utc::now() - ChronoDuration::from_std(stale_after)?;
    let stale = db.stale_running_jobs(&cutoff.to_rfc3339())?;
    for job in &stale {
        db.fail_job(job.id, "reclaimed after unclean shutdown")?;
    }
    Ok(stale.len())
}

/// Periodic sweep removing terminal jobs older than `retention` (§4.D
/// "periodic sweep removes completed/failed/cancelled jobs older than N
/// hours").
pub fn sweep_old_jobs(db: &Database, retention: std::time::Duration) -> Result<usize> {
    let cutoff = Utc::now() - ChronoDuration::from_std(retention)?;
    db.delete_terminal_jobs_older_than(&cutoff.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::jobs::JobPriority;

    #[test]
    fn sweep_leaves_recently_completed_jobs_alone() {
        let db = Database::open_in_memory().unwrap();
        let job = db.enqueue_job("scan", JobPriority::Normal, None).unwrap();
        db.complete_job(job.id).unwrap();

        let removed = sweep_old_jobs(&db, std::time::Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(db.get_job(job.id).unwrap().is_some());
    }
}
