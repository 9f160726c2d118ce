//! Runner side of remotely executed transcriptions: runners claim jobs and
//! report either a finished caption or an error.

use crate::captions::{CommitOutcome, CompletionCommitter};
use crate::database::{Database, RunnerJob, RunnerJobState, RunnerTranscriptionPayload, Video, VIDEO_TRANSCRIPTION_JOB};
use crate::error::AppError;
use crate::log_tags::LogTags;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub struct RunnerJobService {
    db: Arc<Database>,
    committer: Arc<CompletionCommitter>,
}

impl RunnerJobService {
    pub fn new(db: Arc<Database>, committer: Arc<CompletionCommitter>) -> Self {
        Self { db, committer }
    }

    /// Hand the oldest pending transcription job to `runner_name`.
    pub fn request_job(&self, runner_name: &str) -> Result<Option<RunnerJob>, AppError> {
        let job = self.db.claim_next_runner_job(VIDEO_TRANSCRIPTION_JOB, runner_name)?;
        if let Some(job) = &job {
            log::info!("Runner {} accepted transcription job {}", runner_name, job.uuid);
        }
        Ok(job)
    }

    /// A runner finished: commit its caption through the same path as local
    /// transcriptions.
    pub async fn complete_transcription(
        &self,
        job_uuid: Uuid,
        language: &str,
        vtt_path: &Path,
    ) -> Result<CommitOutcome, AppError> {
        let job = self.processing_job(&job_uuid)?;

        // Claim the completion so a duplicate report cannot commit twice
        if !self
            .db
            .transition_runner_job(&job_uuid, RunnerJobState::Processing, RunnerJobState::Finished, None)?
        {
            return Err(AppError::Other(format!("Runner job {} is no longer processing", job_uuid)));
        }

        let Some(video) = self.job_video(&job)? else {
            log::warn!("Video of runner job {} no longer exists, dropping result", job_uuid);
            return Err(AppError::NotFound(format!("video of runner job {}", job_uuid)));
        };

        let tags = LogTags::new("video-caption").with(video.uuid).with(job_uuid);

        match self.committer.commit(&video, language, vtt_path, &tags).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                log::error!("{} Failed to commit runner transcription: {}", tags, e);
                self.db.transition_runner_job(
                    &job_uuid,
                    RunnerJobState::Finished,
                    RunnerJobState::Errored,
                    Some(&e.to_string()),
                )?;
                if !e.pending_released() {
                    self.db.decrease_pending_transcription(video.id)?;
                }
                Err(e)
            }
        }
    }

    /// A runner gave up on the job (engine failure, no audio stream, ...).
    pub fn error_job(&self, job_uuid: Uuid, message: &str) -> Result<(), AppError> {
        let job = self.processing_job(&job_uuid)?;

        if !self.db.transition_runner_job(
            &job_uuid,
            RunnerJobState::Processing,
            RunnerJobState::Errored,
            Some(message),
        )? {
            return Err(AppError::Other(format!("Runner job {} is no longer processing", job_uuid)));
        }

        match self.job_video(&job)? {
            Some(video) => {
                let tags = LogTags::new("video-caption").with(video.uuid).with(job_uuid);
                log::warn!("{} Runner transcription errored: {}", tags, message);
                self.db.decrease_pending_transcription(video.id)?;
            }
            None => log::warn!("Runner job {} errored for a deleted video: {}", job_uuid, message),
        }
        Ok(())
    }

    fn processing_job(&self, job_uuid: &Uuid) -> Result<RunnerJob, AppError> {
        let job = self
            .db
            .get_runner_job(job_uuid)?
            .ok_or_else(|| AppError::NotFound(format!("runner job {}", job_uuid)))?;
        if job.state != RunnerJobState::Processing {
            return Err(AppError::Other(format!(
                "Runner job {} is {}, expected processing",
                job_uuid, job.state
            )));
        }
        Ok(job)
    }

    fn job_video(&self, job: &RunnerJob) -> Result<Option<Video>, AppError> {
        let payload: RunnerTranscriptionPayload = serde_json::from_value(job.payload.clone())?;
        Ok(self.db.load_video(&payload.video_uuid)?)
    }
}
