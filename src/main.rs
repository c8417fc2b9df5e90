//! Command-line front end for the photo ingestion engine.
//!
//! This binary is for one-shot operations against the local database; the
//! always-on scan/process/train loop lives in `photon-engine-daemon`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;

use photon_engine::faceservice::FaceServiceClient;
use photon_engine::pipeline::{process_image, NullObjectDetector};
use photon_engine::scanner::Scanner;
use photon_engine::{cleanup, clustering, consistency, jobs, logging, trainer};
use photon_engine::{Config, Database};

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

enum Command {
    Init,
    Scan,
    Process { path: PathBuf },
    Train { person_id: i64 },
    TrainQueue,
    ConsistencyCheck,
    ConsistencySync,
    Cleanup { dry_run: bool },
    Cluster,
    Help,
    Version,
}

fn main() -> Result<()> {
    let args = parse_args()?;

    match &args.command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("photon-engine {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config_path = args.config_path.unwrap_or_else(Config::config_path);

    if matches!(args.command, Command::Init) {
        return run_init(&config_path);
    }

    let config = Config::load_from(&config_path).context("loading config")?;
    logging::init(Some(config.storage.logs_dir.clone())).context("initializing logging")?;

    let db_path = config.database.sqlite_path(&Config::data_dir());
    let db = Database::open(&db_path).context("opening database")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;

    match args.command {
        Command::Scan => runtime.block_on(run_scan(&db, &config)),
        Command::Process { path } => run_process(&db, &config, &path),
        Command::Train { person_id } => run_train(&db, &config, person_id),
        Command::TrainQueue => run_train_queue(&db, &config),
        Command::ConsistencyCheck => run_consistency_check(&db, &config),
        Command::ConsistencySync => run_consistency_sync(&db, &config),
        Command::Cleanup { dry_run } => run_cleanup(&db, &config, dry_run),
        Command::Cluster => run_cluster(&db, &config),
        Command::Init | Command::Help | Command::Version => unreachable!(),
    }
}

fn parse_args() -> Result<Args> {
    let raw: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut i = 1;
    let mut command = None;

    while i < raw.len() {
        match raw[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let Some(path) = raw.get(i) else { bail!("--config requires a path") };
                config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                command = Some(Command::Help);
            }
            "--version" | "-V" => {
                command = Some(Command::Version);
            }
            "init" => command = Some(Command::Init),
            "scan" => command = Some(Command::Scan),
            "process" => {
                i += 1;
                let Some(path) = raw.get(i) else { bail!("process requires a file path") };
                command = Some(Command::Process { path: PathBuf::from(path) });
            }
            "train" => {
                i += 1;
                let Some(id) = raw.get(i) else { bail!("train requires a person id") };
                let person_id = id.parse().context("person id must be an integer")?;
                command = Some(Command::Train { person_id });
            }
            "train-queue" => command = Some(Command::TrainQueue),
            "consistency-check" => command = Some(Command::ConsistencyCheck),
            "consistency-sync" => command = Some(Command::ConsistencySync),
            "cleanup" => command = Some(Command::Cleanup { dry_run: false }),
            "cleanup-dry-run" => command = Some(Command::Cleanup { dry_run: true }),
            "cluster" => command = Some(Command::Cluster),
            other => bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(Args { config_path, command: command.unwrap_or(Command::Help) })
}

fn print_help() {
    println!(
        r#"photon-engine - photo ingestion and enrichment engine

USAGE:
    photon-engine [--config PATH] <COMMAND>

COMMANDS:
    init                  Write a default config file and create storage directories
    scan                  Discover new/changed files under storage.source_dir
    process FILE          Run the enrichment pipeline on a single file
    train PERSON_ID       Upload a person's unsynced faces and train their subject
    train-queue           Drain pending training jobs
    consistency-check     Compare local and face-service state, report gaps
    consistency-sync      Reconcile persons and faces against the face service
    cleanup               Remove all subjects from the face service
    cleanup-dry-run       Preview a cleanup without deleting anything
    cluster               Run recognition suggestions + clustering over unassigned faces

OPTIONS:
    --config, -c PATH     Path to config file (default: {})
    --help, -h            Show this help message
    --version, -V         Show the version
"#,
        Config::config_path().display()
    );
}

fn run_init(config_path: &std::path::Path) -> Result<()> {
    let config = Config::default();
    std::fs::create_dir_all(&config.storage.source_dir)?;
    std::fs::create_dir_all(&config.storage.processed_dir)?;
    std::fs::create_dir_all(&config.storage.logs_dir)?;
    config.save(config_path)?;
    println!("wrote config to {}", config_path.display());
    Ok(())
}

async fn run_scan(db: &Database, config: &Config) -> Result<()> {
    let scanner = Scanner::new();
    let Some(report) = scanner.scan(&config.storage.source_dir, db).await? else {
        println!("scan already in progress");
        return Ok(());
    };
    println!(
        "discovered {} files: {} new, {} changed, {} unreadable",
        report.discovered, report.new_entries, report.changed_entries, report.unreadable
    );
    Ok(())
}

fn run_process(db: &Database, config: &Config, path: &std::path::Path) -> Result<()> {
    let face_client = FaceServiceClient::new(&config.face_service);
    let object_detector = NullObjectDetector;
    let report = process_image(db, config, path, &face_client, &object_detector)?;
    println!("{:#?}", report);
    Ok(())
}

fn run_train(db: &Database, config: &Config, person_id: i64) -> Result<()> {
    let client = FaceServiceClient::new(&config.face_service);
    let result = trainer::train_person(db, &client, person_id, None)?;
    println!(
        "person {}: uploaded {}, skipped {}, subject {:?}, errors {}",
        result.person_id,
        result.uploaded,
        result.skipped,
        result.subject_id,
        result.errors.len()
    );
    for err in &result.errors {
        println!("  error: {err}");
    }
    Ok(())
}

fn run_train_queue(db: &Database, config: &Config) -> Result<()> {
    let client = FaceServiceClient::new(&config.face_service);
    let processed = trainer::process_training_queue(db, &client)?;
    println!("processed {processed} queued training job(s)");
    Ok(())
}

fn run_consistency_check(db: &Database, config: &Config) -> Result<()> {
    let client = FaceServiceClient::new(&config.face_service);
    let options = consistency::EnsureOptions { check_faces: true, check_persons: true, auto_repair: false };
    let report = consistency::ensure_consistency(db, &client, &options)?;
    println!(
        "{} person(s) missing a subject, {} person(s) with orphaned faces",
        report.missing_subject.len(),
        report.orphaned_faces.len()
    );
    Ok(())
}

fn run_consistency_sync(db: &Database, config: &Config) -> Result<()> {
    let client = FaceServiceClient::new(&config.face_service);
    let persons = consistency::sync_persons(db, &client)?;
    let faces = consistency::sync_faces(db, &client)?;
    println!(
        "persons: {} created, {} updated, {} errors; faces: {} uploaded, {} skipped, {} errors",
        persons.created,
        persons.updated,
        persons.errors.len(),
        faces.uploaded,
        faces.skipped,
        faces.errors.len()
    );
    Ok(())
}

fn run_cleanup(db: &Database, config: &Config, dry_run: bool) -> Result<()> {
    let client = FaceServiceClient::new(&config.face_service);
    let preview = cleanup::comprehensive_cleanup(db, &client, true, false, dry_run)?;
    println!(
        "{}subjects removed: {}, faces reset: {}, persons reset: {}, errors: {}",
        if dry_run { "(dry run) " } else { "" },
        preview.subjects_removed,
        preview.faces_reset,
        preview.persons_reset,
        preview.errors.len()
    );
    Ok(())
}

fn run_cluster(db: &Database, config: &Config) -> Result<()> {
    let client = FaceServiceClient::new(&config.face_service);
    let threshold = config.processing.face_recognition.confidence_auto_assign as f64;
    let (suggestions, residual) = clustering::generate_recognition_suggestions(db, &client, threshold)?;
    info!(suggestions = suggestions.len(), residual = residual.len(), "recognition pass complete");
    let clusters = clustering::cluster_residual_faces(db, &client, &residual)?;
    let ids = clustering::materialize_clusters(db, &clusters)?;
    println!("{} suggestion(s), {} cluster(s) created: {:?}", suggestions.len(), ids.len(), ids);
    let swept = jobs::sweep_old_jobs(db, std::time::Duration::from_secs(3600 * 24))?;
    let orphaned = clustering::sweep_orphaned_similarities(db)?;
    println!("housekeeping: {swept} old job(s) swept, {orphaned} orphaned similarity row(s) removed");
    Ok(())
}
