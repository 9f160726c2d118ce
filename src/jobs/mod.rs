pub mod runner;

use crate::config::TranscriptionConfig;
use crate::database::{
    Database, RunnerTranscriptionPayload, TranscriptionJobPayload, Video, VIDEO_TRANSCRIPTION_JOB,
};
use crate::error::AppError;
use crate::log_tags::LogTags;
use rusqlite::Connection;
use std::sync::Arc;

pub use runner::RunnerJobService;

/// Where transcription jobs are executed.
///
/// `submit` receives the connection of the transaction that also increments
/// the pending counter, so a rejected submission never counts as pending.
pub trait JobBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn submit(&self, conn: &Connection, video: &Video) -> Result<(), AppError>;
}

/// Jobs go to the local durable queue and run on this process' workers.
pub struct LocalQueueBackend;

impl JobBackend for LocalQueueBackend {
    fn name(&self) -> &'static str {
        "local-queue"
    }

    fn submit(&self, conn: &Connection, video: &Video) -> Result<(), AppError> {
        let payload = serde_json::to_value(TranscriptionJobPayload { video_uuid: video.uuid })?;
        Database::enqueue_job_in(conn, VIDEO_TRANSCRIPTION_JOB, &payload)
            .map_err(|e| AppError::Submission(e.to_string()))?;
        Ok(())
    }
}

/// Jobs are published for remote runners, which report back through
/// [`RunnerJobService`].
pub struct RemoteRunnerBackend;

impl JobBackend for RemoteRunnerBackend {
    fn name(&self) -> &'static str {
        "remote-runner"
    }

    fn submit(&self, conn: &Connection, video: &Video) -> Result<(), AppError> {
        let payload = serde_json::to_value(RunnerTranscriptionPayload {
            video_uuid: video.uuid,
            input_url: video.url.clone(),
        })?;
        let job_uuid = Database::create_runner_job_in(conn, VIDEO_TRANSCRIPTION_JOB, &payload)
            .map_err(|e| AppError::Submission(e.to_string()))?;
        log::debug!("Created runner job {} for video {}", job_uuid, video.uuid);
        Ok(())
    }
}

pub fn job_backend_from_config(config: &TranscriptionConfig) -> Box<dyn JobBackend> {
    if config.remote_runners.enabled {
        Box::new(RemoteRunnerBackend)
    } else {
        Box::new(LocalQueueBackend)
    }
}

/// Decides whether and where a transcription job is created.
pub struct TranscriptionDispatcher {
    db: Arc<Database>,
    enabled: bool,
    backend: Box<dyn JobBackend>,
}

impl TranscriptionDispatcher {
    pub fn new(db: Arc<Database>, enabled: bool, backend: Box<dyn JobBackend>) -> Self {
        Self { db, enabled, backend }
    }

    pub fn from_config(db: Arc<Database>, config: &TranscriptionConfig) -> Self {
        Self::new(db, config.enabled, job_backend_from_config(config))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Create a transcription job for `video` unless the feature is disabled.
    /// Returns whether a job was created.
    pub fn create_transcription_task_if_needed(&self, video: &Video) -> Result<bool, AppError> {
        if !self.enabled {
            return Ok(false);
        }

        let tags = LogTags::new("video-caption").with(video.uuid);
        log::info!(
            "{} Creating transcription job for {} on {}",
            tags,
            video.url,
            self.backend.name()
        );

        let mut submit_error = None;
        let result = self.db.with_transaction(|tx| {
            if let Err(e) = self.backend.submit(tx, video) {
                let message = e.to_string();
                submit_error = Some(e);
                anyhow::bail!(message);
            }
            Database::increase_pending_transcription_in(tx, video.id)
        });

        match (result, submit_error) {
            (Ok(()), _) => Ok(true),
            (Err(_), Some(e)) => Err(e),
            (Err(e), None) => Err(AppError::Submission(e.to_string())),
        }
    }
}
