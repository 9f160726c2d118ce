pub mod captions;
pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod languages;
pub mod log_tags;
pub mod media;
pub mod transcriber;
pub mod worker;

use captions::{CompletionCommitter, DatabaseNotifier, OutboxFederator};
use config::AppConfig;
use database::Database;
use error::AppError;
use jobs::{RunnerJobService, TranscriptionDispatcher};
use media::{FfprobeProbe, VideoPathManager};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use transcriber::TranscriberCell;
use worker::{QueueWorker, TranscriptionExecutor};

/// Install the global subscriber. `RUST_LOG` wins over the configured level;
/// records from the `log` facade are forwarded to it.
pub fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// Everything the transcription lifecycle needs, wired from one config.
pub struct TranscriptionServices {
    pub db: Arc<Database>,
    pub dispatcher: TranscriptionDispatcher,
    pub runner_jobs: RunnerJobService,
    pub worker: QueueWorker,
}

impl TranscriptionServices {
    pub fn build(config: &AppConfig) -> Result<Self, AppError> {
        if let Some(parent) = config.database.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&config.storage.tmp_dir)?;
        std::fs::create_dir_all(&config.storage.captions_dir)?;

        let db = Arc::new(Database::new(&config.database.path)?);
        log::info!("Database opened at {:?}", config.database.path);

        let vt = &config.video_transcription;

        let committer = Arc::new(CompletionCommitter::new(
            db.clone(),
            config.storage.captions_dir.clone(),
            Arc::new(OutboxFederator::new(db.clone())),
            Arc::new(DatabaseNotifier::new(db.clone())),
        ));

        let executor = Arc::new(TranscriptionExecutor::new(
            db.clone(),
            VideoPathManager::new(),
            Arc::new(FfprobeProbe::new(vt.ffprobe_path.clone())),
            Arc::new(TranscriberCell::new(vt.clone())),
            committer.clone(),
            vt.clone(),
            &config.storage.tmp_dir,
        ));

        let dispatcher = TranscriptionDispatcher::from_config(db.clone(), vt);
        let runner_jobs = RunnerJobService::new(db.clone(), committer);
        let worker = QueueWorker::new(
            db.clone(),
            executor,
            vt.concurrency,
            Duration::from_secs(vt.poll_interval_secs),
        );

        Ok(Self {
            db,
            dispatcher,
            runner_jobs,
            worker,
        })
    }
}

/// Run the local queue worker until `cancel` fires.
pub async fn run(config: AppConfig, cancel: CancellationToken) -> Result<(), AppError> {
    let services = TranscriptionServices::build(&config)?;

    let vt = &config.video_transcription;
    log::info!(
        "Video transcription {} (engine {}, jobs go to {})",
        if vt.enabled { "enabled" } else { "disabled" },
        vt.engine,
        services.dispatcher.backend_name()
    );

    services.worker.run(cancel).await;
    Ok(())
}
