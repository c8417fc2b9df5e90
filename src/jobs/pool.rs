//! Persistent worker pool executing queued jobs (§4.D).
//!
//! Grounded on the predecessor's `llm/queue.rs`: persistent workers pulling
//! from a shared queue, one restart-with-backoff loop per worker, progress
//! reported per item. The consecutive-failure circuit breaker there becomes
//! a per-job timeout here, since jobs (not a shared remote endpoint) are the
//! unit of failure in this engine.

use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::jobs::queue::JobQueue;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Cooperative cancel flag checked by a handler at its own batch boundaries
/// (§5 Cancellation: "a cancel sets a boolean that inner loops test").
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct CancelRegistry {
    flags: Mutex<HashMap<i64, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    pub fn register(&self, job_id: i64) -> CancelToken {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags.lock().unwrap().insert(job_id, flag.clone());
        CancelToken(flag)
    }

    pub fn cancel(&self, job_id: i64) -> bool {
        if let Some(flag) = self.flags.lock().unwrap().get(&job_id) {
            flag.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn clear(&self, job_id: i64) {
        self.flags.lock().unwrap().remove(&job_id);
    }
}

pub struct JobContext {
    pub job_id: i64,
    pub kind: String,
    pub data: Option<String>,
    pub cancel: CancelToken,
    pub db: Arc<Mutex<Database>>,
}

pub trait JobHandler: Send + Sync {
    fn handle(&self, ctx: JobContext) -> JobFuture;
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    db: Arc<Mutex<Database>>,
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
    cancels: Arc<CancelRegistry>,
    /// Persistent worker count (`server.scan_batch_size`); the in-flight
    /// semaphore below additionally caps total concurrency at the spec's
    /// hard ceiling of `2x` that count, absorbing brief restart overlap.
    worker_count: usize,
    job_timeout: Duration,
    inflight: Arc<Semaphore>,
    shutting_down: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        db: Arc<Mutex<Database>>,
        handlers: HashMap<String, Arc<dyn JobHandler>>,
        worker_count: usize,
        job_timeout: Duration,
    ) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            queue,
            db,
            handlers: Arc::new(handlers),
            cancels: Arc::new(CancelRegistry::default()),
            worker_count,
            job_timeout,
            inflight: Arc::new(Semaphore::new(worker_count * 2)),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_registry(&self) -> Arc<CancelRegistry> {
        self.cancels.clone()
    }

    /// Spawns the persistent worker loops. Each loop survives a panicking job
    /// handler by running it in its own task and isolating the panic as a
    /// `JoinError`; after one, the loop backs off ~1s before picking up its
    /// next job, for the pool's own lifetime.
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_count)
            .map(|worker_id| {
                let queue = self.queue.clone();
                let db = self.db.clone();
                let handlers = self.handlers.clone();
                let cancels = self.cancels.clone();
                let inflight = self.inflight.clone();
                let job_timeout = self.job_timeout;
                let shutting_down = self.shutting_down.clone();

                tokio::spawn(async move {
                    loop {
                        if shutting_down.load(Ordering::SeqCst) {
                            break;
                        }
                        let Some(job) = queue.pop() else {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        };

                        let _permit = inflight.clone().acquire_owned().await.expect("semaphore never closed");
                        let Some(handler) = handlers.get(&job.kind).cloned() else {
                            warn!(worker = worker_id, kind = %job.kind, "no handler registered for job kind");
                            let db_guard = db.lock().unwrap();
                            let _ = db_guard.fail_job(job.id, "no handler registered");
                            continue;
                        };

                        let cancel = cancels.register(job.id);
                        {
                            let db_guard = db.lock().unwrap();
                            let _ = db_guard.mark_job_running(job.id);
                        }

                        let ctx = JobContext { job_id: job.id, kind: job.kind.clone(), data: job.data.clone(), cancel: cancel.clone(), db: db.clone() };
                        // The handler body runs in its own task so a panic inside it
                        // unwinds that task alone; the worker loop observes it as a
                        // JoinError rather than going down with it.
                        let job_task = tokio::spawn(handler.handle(ctx));
                        let abort_handle = job_task.abort_handle();
                        let outcome = timeout(job_timeout, job_task).await;

                        cancels.clear(job.id);
                        let mut panicked = false;
                        {
                            let db_guard = db.lock().unwrap();
                            match outcome {
                                Ok(Ok(Ok(()))) if cancel.is_cancelled() => {
                                    // A completion signal that arrives after cancellation is discarded.
                                    let _ = db_guard.cancel_job(job.id);
                                }
                                Ok(Ok(Ok(()))) => {
                                    let _ = db_guard.complete_job(job.id);
                                }
                                Ok(Ok(Err(err))) => {
                                    error!(worker = worker_id, job_id = job.id, error = %err, "job failed");
                                    let _ = db_guard.fail_job(job.id, &err.to_string());
                                }
                                Ok(Err(join_err)) if join_err.is_panic() => {
                                    error!(worker = worker_id, job_id = job.id, error = %join_err, "job handler panicked");
                                    let _ = db_guard.fail_job(job.id, "handler panicked");
                                    panicked = true;
                                }
                                Ok(Err(join_err)) => {
                                    warn!(worker = worker_id, job_id = job.id, error = %join_err, "job task aborted");
                                    let _ = db_guard.fail_job(job.id, "task aborted");
                                }
                                Err(_elapsed) => {
                                    warn!(worker = worker_id, job_id = job.id, "job exceeded timeout");
                                    let _ = db_guard.fail_job(job.id, "timeout");
                                    abort_handle.abort();
                                }
                            }
                        }
                        if panicked {
                            // Give any transient condition that caused the panic (e.g.
                            // a momentarily unavailable resource) a chance to clear
                            // before this worker picks up its next job.
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                    info!(worker = worker_id, "worker loop exiting");
                })
            })
            .collect()
    }

    pub fn request_cancel(&self, job_id: i64) -> bool {
        self.cancels.cancel(job_id)
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::jobs::JobPriority;
    use crate::jobs::queue::QueuedJob;

    struct Echo;
    impl JobHandler for Echo {
        fn handle(&self, _ctx: JobContext) -> JobFuture {
            Box::pin(async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn pool_completes_a_simple_job() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let job_record = { db.lock().unwrap().enqueue_job("scan", JobPriority::Normal, None).unwrap() };

        let queue = Arc::new(JobQueue::new());
        queue.push(QueuedJob { id: job_record.id, kind: "scan".into(), priority: JobPriority::Normal, data: None });

        let mut handlers: HashMap<String, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert("scan".to_string(), Arc::new(Echo));

        let pool = WorkerPool::new(queue, db.clone(), handlers, 1, Duration::from_secs(5));
        let handles = pool.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.shutdown();
        for h in handles {
            let _ = tokio::time::timeout(Duration::from_millis(500), h).await;
        }

        let reloaded = db.lock().unwrap().get_job(job_record.id).unwrap().unwrap();
        assert_eq!(reloaded.status, "completed");
    }

    struct Panicky;
    impl JobHandler for Panicky {
        fn handle(&self, _ctx: JobContext) -> JobFuture {
            Box::pin(async move { panic!("handler blew up") })
        }
    }

    #[tokio::test]
    async fn a_panicking_handler_is_isolated_and_the_worker_keeps_running() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let panicking_job = { db.lock().unwrap().enqueue_job("panicky", JobPriority::Normal, None).unwrap() };
        let echo_job = { db.lock().unwrap().enqueue_job("scan", JobPriority::Normal, None).unwrap() };

        let queue = Arc::new(JobQueue::new());
        queue.push(QueuedJob { id: panicking_job.id, kind: "panicky".into(), priority: JobPriority::Normal, data: None });
        queue.push(QueuedJob { id: echo_job.id, kind: "scan".into(), priority: JobPriority::Normal, data: None });

        let mut handlers: HashMap<String, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert("panicky".to_string(), Arc::new(Panicky));
        handlers.insert("scan".to_string(), Arc::new(Echo));

        let pool = WorkerPool::new(queue, db.clone(), handlers, 1, Duration::from_secs(5));
        let handles = pool.spawn();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        pool.shutdown();
        for h in handles {
            let _ = tokio::time::timeout(Duration::from_millis(500), h).await;
        }

        let failed = db.lock().unwrap().get_job(panicking_job.id).unwrap().unwrap();
        assert_eq!(failed.status, "failed");
        let completed = db.lock().unwrap().get_job(echo_job.id).unwrap().unwrap();
        assert_eq!(completed.status, "completed");
    }
}
