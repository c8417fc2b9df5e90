//! Headless daemon: runs the job queue's worker pool plus the periodic
//! sweeps (stale-job reclaim, scan, auto-training, consistency, similarity
//! hygiene) that keep the engine moving without a foreground CLI invocation.
//!
//! Grounded on the predecessor's `main.rs` daemon loop: a poll-interval
//! `thread::sleep` loop dispatching by task type, generalized here to the
//! seven job kinds and a real priority queue/worker pool instead of a single
//! `scheduled_tasks` table scan.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use photon_engine::faceservice::FaceServiceClient;
use photon_engine::jobs::{JobContext, JobFuture, JobHandler, JobKind, JobQueue, WorkerPool};
use photon_engine::pipeline::{process_image, NullObjectDetector};
use photon_engine::scanner::discovery::discover_images;
use photon_engine::{clustering, consistency, jobs, smart_albums, trainer};
use photon_engine::{Config, Database};

struct DaemonArgs {
    once: bool,
    poll_interval: u64,
    config_path: Option<PathBuf>,
}

impl Default for DaemonArgs {
    fn default() -> Self {
        Self { once: false, poll_interval: 60, config_path: None }
    }
}

fn parse_args() -> DaemonArgs {
    let raw: Vec<String> = std::env::args().collect();
    let mut args = DaemonArgs::default();
    let mut i = 1;
    while i < raw.len() {
        match raw[i].as_str() {
            "--once" | "-1" => args.once = true,
            "--interval" | "-i" => {
                i += 1;
                if let Some(v) = raw.get(i) {
                    if let Ok(n) = v.parse() {
                        args.poll_interval = n;
                    }
                }
            }
            "--config" | "-c" => {
                i += 1;
                if let Some(v) = raw.get(i) {
                    args.config_path = Some(PathBuf::from(v));
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    args
}

fn print_help() {
    println!(
        r#"photon-engine-daemon - background worker for the photo ingestion engine

USAGE:
    photon-engine-daemon [OPTIONS]

OPTIONS:
    --once, -1          Run one worker pass plus the periodic sweeps, then exit
    --interval, -i N    Seconds between sweep passes (default: 60)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message
"#
    );
}

/// Scan handler: discovers files under `storage.source_dir` and files them
/// into `file_index_entries`, then enqueues one `image_processing` job per
/// pending entry.
struct ScanHandler {
    source_dir: PathBuf,
    queue: Arc<JobQueue>,
}

impl JobHandler for ScanHandler {
    fn handle(&self, ctx: JobContext) -> JobFuture {
        let source_dir = self.source_dir.clone();
        let queue = self.queue.clone();
        Box::pin(async move {
            let paths = discover_images(&source_dir);
            let db = ctx.db.lock().unwrap();
            for path in &paths {
                let Ok(metadata) = std::fs::metadata(path) else { continue };
                let mtime = metadata
                    .modified()
                    .ok()
                    .and_then(|t| chrono::DateTime::<chrono::Utc>::try_from(t).ok())
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                let entry = db.upsert_discovered_path(&path.to_string_lossy(), metadata.len() as i64, &mtime)?;
                if entry.processing_status == "pending" {
                    let job = db.enqueue_job("image_processing", photon_engine::db::jobs::JobPriority::Normal, Some(&path.to_string_lossy()))?;
                    queue.push(job.into());
                }
                if ctx.cancel.is_cancelled() {
                    break;
                }
            }
            Ok(())
        })
    }
}

/// ImageProcessing handler: runs the enrichment pipeline on the single file
/// path carried in the job's `data` column.
struct ImageProcessingHandler {
    config: Arc<Config>,
    face_client: Arc<FaceServiceClient>,
}

impl JobHandler for ImageProcessingHandler {
    fn handle(&self, ctx: JobContext) -> JobFuture {
        let config = self.config.clone();
        let face_client = self.face_client.clone();
        Box::pin(async move {
            let Some(path) = ctx.data.clone() else {
                anyhow::bail!("image_processing job missing a file path");
            };
            let object_detector = NullObjectDetector;
            let db = ctx.db.lock().unwrap();
            match process_image(&db, &config, std::path::Path::new(&path), face_client.as_ref(), &object_detector) {
                Ok(report) => {
                    info!(?path, faces = report.faces_detected, objects = report.objects_detected, "processed image");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
    }
}

/// SmartAlbums handler: re-evaluates every active album against the image
/// named in `data`, or re-seeds the default albums when `data` is absent.
struct SmartAlbumsHandler;

impl JobHandler for SmartAlbumsHandler {
    fn handle(&self, ctx: JobContext) -> JobFuture {
        Box::pin(async move {
            let db = ctx.db.lock().unwrap();
            match ctx.data.as_deref().and_then(|d| d.parse::<i64>().ok()) {
                Some(image_id) => {
                    smart_albums::evaluate_image(&db, image_id)?;
                }
                None => {
                    smart_albums::seed_defaults(&db)?;
                }
            }
            Ok(())
        })
    }
}

/// FaceRecognition handler: runs one recognition-suggestion + clustering
/// pass over the currently unassigned faces.
struct FaceRecognitionHandler {
    face_client: Arc<FaceServiceClient>,
    auto_assign_threshold: f64,
}

impl JobHandler for FaceRecognitionHandler {
    fn handle(&self, ctx: JobContext) -> JobFuture {
        let face_client = self.face_client.clone();
        let threshold = self.auto_assign_threshold;
        Box::pin(async move {
            let db = ctx.db.lock().unwrap();
            let (suggestions, residual) = clustering::generate_recognition_suggestions(&db, &face_client, threshold)?;
            let clusters = clustering::cluster_residual_faces(&db, &face_client, &residual)?;
            clustering::materialize_clusters(&db, &clusters)?;
            info!(suggestions = suggestions.len(), clusters = clusters.len(), "face recognition pass complete");
            Ok(())
        })
    }
}

fn build_pool(config: Arc<Config>, db: Arc<Mutex<Database>>, queue: Arc<JobQueue>, face_client: Arc<FaceServiceClient>) -> WorkerPool {
    let mut handlers: HashMap<String, Arc<dyn JobHandler>> = HashMap::new();
    handlers.insert(
        JobKind::Scan.as_str().to_string(),
        Arc::new(ScanHandler { source_dir: config.storage.source_dir.clone(), queue: queue.clone() }),
    );
    handlers.insert(
        JobKind::ImageProcessing.as_str().to_string(),
        Arc::new(ImageProcessingHandler { config: config.clone(), face_client: face_client.clone() }),
    );
    handlers.insert(JobKind::SmartAlbums.as_str().to_string(), Arc::new(SmartAlbumsHandler));
    handlers.insert(
        JobKind::FaceRecognition.as_str().to_string(),
        Arc::new(FaceRecognitionHandler {
            face_client: face_client.clone(),
            auto_assign_threshold: config.processing.face_recognition.confidence_auto_assign as f64,
        }),
    );

    WorkerPool::new(queue, db, handlers, config.server.scan_batch_size, Duration::from_secs(config.server.job_timeout_secs))
}

/// Periodic sweep pass: old-job cleanup, auto-training, consistency check,
/// orphaned-similarity cleanup. Runs between worker-pool dispatch cycles.
fn run_sweeps(db: &Database, config: &Config, face_client: &FaceServiceClient) {
    if let Err(e) = jobs::sweep_old_jobs(db, Duration::from_secs(3600 * 24)) {
        warn!(error = %e, "job sweep failed");
    }
    match trainer::run_auto_training_pass(db, config) {
        Ok(n) if n > 0 => info!(queued = n, "auto-training queued people"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "auto-training pass failed"),
    }
    match trainer::process_training_queue(db, face_client) {
        Ok(n) if n > 0 => info!(processed = n, "drained training queue"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "training queue drain failed"),
    }
    let options = consistency::EnsureOptions { check_faces: true, check_persons: true, auto_repair: true };
    match consistency::ensure_consistency(db, face_client, &options) {
        Ok(report) if !report.missing_subject.is_empty() || !report.orphaned_faces.is_empty() => {
            warn!(missing = report.missing_subject.len(), orphaned = report.orphaned_faces.len(), "consistency gaps found");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "consistency sweep failed"),
    }
    match clustering::sweep_orphaned_similarities(db) {
        Ok(n) if n > 0 => info!(removed = n, "swept orphaned similarity rows"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "similarity sweep failed"),
    }
}

fn main() -> Result<()> {
    let args = parse_args();
    let config_path = args.config_path.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path).context("loading config")?;

    photon_engine::logging::init(Some(config.storage.logs_dir.clone())).context("initializing logging")?;
    info!("photon-engine-daemon starting");

    let db_path = config.database.sqlite_path(&Config::data_dir());
    let db = Database::open(&db_path).context("opening database")?;

    let reclaimed = jobs::reclaim_stale_running_jobs(&db, Duration::from_secs(config.server.job_timeout_secs * 2))
        .context("reclaiming stale jobs")?;
    if reclaimed > 0 {
        warn!(reclaimed, "reclaimed jobs left running by an unclean shutdown");
    }
    smart_albums::seed_defaults(&db).context("seeding default smart albums")?;

    let pending = db.pending_jobs().context("loading pending jobs")?;
    let queue = Arc::new(JobQueue::new());
    queue.reload(pending);

    let config = Arc::new(config);
    let db = Arc::new(Mutex::new(db));
    let face_client = Arc::new(FaceServiceClient::new(&config.face_service));

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("building async runtime")?;

    runtime.block_on(async {
        let pool = build_pool(config.clone(), db.clone(), queue.clone(), face_client.clone());
        let workers = pool.spawn();

        {
            let db_guard = db.lock().unwrap();
            let job = db_guard.enqueue_job("scan", photon_engine::db::jobs::JobPriority::High, None)?;
            queue.push(job.into());
        }

        if args.once {
            tokio::time::sleep(Duration::from_secs(2)).await;
            pool.shutdown();
            let db_guard = db.lock().unwrap();
            run_sweeps(&db_guard, &config, &face_client);
        } else {
            loop {
                tokio::time::sleep(Duration::from_secs(args.poll_interval)).await;
                let db_guard = db.lock().unwrap();
                run_sweeps(&db_guard, &config, &face_client);
                drop(db_guard);

                let db_guard = db.lock().unwrap();
                let job = db_guard.enqueue_job("scan", photon_engine::db::jobs::JobPriority::Normal, None)?;
                drop(db_guard);
                queue.push(job.into());
            }
        }

        pool.shutdown();
        for w in workers {
            let _ = tokio::time::timeout(Duration::from_secs(5), w).await;
        }
        Ok::<(), anyhow::Error>(())
    })?;

    info!("photon-engine-daemon stopped");
    Ok(())
}
