//! In-memory priority queue backing the worker pool (§4.D).
//!
//! Four strict tiers, FIFO within a tier. Grounded on the predecessor's
//! `llm/queue.rs`, which kept a single `Arc<Mutex<VecDeque<_>>>` guarding a
//! shared work list; here the single deque becomes four, one per priority.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::db::jobs::{JobPriority, JobRecord};

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: i64,
    pub kind: String,
    pub priority: JobPriority,
    pub data: Option<String>,
}

impl From<JobRecord> for QueuedJob {
    fn from(record: JobRecord) -> Self {
        QueuedJob { id: record.id, kind: record.kind, priority: JobPriority::parse(&record.priority), data: record.data }
    }
}

#[derive(Default)]
struct Tiers {
    urgent: VecDeque<QueuedJob>,
    high: VecDeque<QueuedJob>,
    normal: VecDeque<QueuedJob>,
    low: VecDeque<QueuedJob>,
}

/// Insertion is O(1); `pop` scans tiers highest-to-lowest, which is the O(n)
/// "priority scan" the spec describes (n = number of tiers, not jobs).
pub struct JobQueue {
    tiers: Mutex<Tiers>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self { tiers: Mutex::new(Tiers::default()) }
    }

    /// Rebuilds the in-memory ordering from durable `pending` jobs — called
    /// once at startup so an unclean shutdown doesn't lose queued work.
    pub fn reload(&self, jobs: Vec<JobRecord>) {
        let mut tiers = self.tiers.lock().unwrap();
        for job in jobs {
            Self::push_into(&mut tiers, job.into());
        }
    }

    pub fn push(&self, job: QueuedJob) {
        let mut tiers = self.tiers.lock().unwrap();
        Self::push_into(&mut tiers, job);
    }

    fn push_into(tiers: &mut Tiers, job: QueuedJob) {
        match job.priority {
            JobPriority::Urgent => tiers.urgent.push_back(job),
            JobPriority::High => tiers.high.push_back(job),
            JobPriority::Normal => tiers.normal.push_back(job),
            JobPriority::Low => tiers.low.push_back(job),
        }
    }

    pub fn pop(&self) -> Option<QueuedJob> {
        let mut tiers = self.tiers.lock().unwrap();
        tiers
            .urgent
            .pop_front()
            .or_else(|| tiers.high.pop_front())
            .or_else(|| tiers.normal.pop_front())
            .or_else(|| tiers.low.pop_front())
    }

    pub fn len(&self) -> usize {
        let tiers = self.tiers.lock().unwrap();
        tiers.urgent.len() + tiers.high.len() + tiers.normal.len() + tiers.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: i64, priority: JobPriority) -> QueuedJob {
        QueuedJob { id, kind: "scan".to_string(), priority, data: None }
    }

    #[test]
    fn higher_priority_is_strictly_ahead_of_lower() {
        let queue = JobQueue::new();
        queue.push(job(1, JobPriority::Low));
        queue.push(job(2, JobPriority::Urgent));
        queue.push(job(3, JobPriority::Normal));

        assert_eq!(queue.pop().unwrap().id, 2);
        assert_eq!(queue.pop().unwrap().id, 3);
        assert_eq!(queue.pop().unwrap().id, 1);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn equal_priority_jobs_are_fifo() {
        let queue = JobQueue::new();
        queue.push(job(1, JobPriority::Normal));
        queue.push(job(2, JobPriority::Normal));

        assert_eq!(queue.pop().unwrap().id, 1);
        assert_eq!(queue.pop().unwrap().id, 2);
    }
}
