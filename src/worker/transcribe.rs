use crate::captions::{CommitOutcome, CompletionCommitter};
use crate::config::TranscriptionConfig;
use crate::database::{Database, VideoCaption};
use crate::error::AppError;
use crate::log_tags::LogTags;
use crate::media::{MediaProbe, VideoPathManager};
use crate::transcriber::{TranscribeRequest, TranscriberCell, TranscriptFormat, TranscriptionModel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// How a transcription attempt ended when it did not fail
#[derive(Debug, Clone)]
pub enum TranscriptionOutcome {
    Transcribed(VideoCaption),
    SkippedNoAudio,
    InvalidLanguage(String),
}

impl From<CommitOutcome> for TranscriptionOutcome {
    fn from(outcome: CommitOutcome) -> Self {
        match outcome {
            CommitOutcome::Committed(caption) => Self::Transcribed(caption),
            CommitOutcome::InvalidLanguage(language) => Self::InvalidLanguage(language),
        }
    }
}

/// Runs one local transcription attempt for a video.
pub struct TranscriptionExecutor {
    db: Arc<Database>,
    paths: VideoPathManager,
    probe: Arc<dyn MediaProbe>,
    transcribers: Arc<TranscriberCell>,
    committer: Arc<CompletionCommitter>,
    config: TranscriptionConfig,
    workspace_root: PathBuf,
}

impl TranscriptionExecutor {
    pub fn new(
        db: Arc<Database>,
        paths: VideoPathManager,
        probe: Arc<dyn MediaProbe>,
        transcribers: Arc<TranscriberCell>,
        committer: Arc<CompletionCommitter>,
        config: TranscriptionConfig,
        tmp_dir: &Path,
    ) -> Self {
        Self {
            db,
            paths,
            probe,
            transcribers,
            committer,
            config,
            workspace_root: tmp_dir.join("transcription"),
        }
    }

    /// Parent of the per-attempt workspaces
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn log_tags(video_uuid: &Uuid) -> LogTags {
        LogTags::new("video-caption").with(video_uuid)
    }

    pub async fn run(&self, video_uuid: Uuid) -> Result<TranscriptionOutcome, AppError> {
        let tags = Self::log_tags(&video_uuid);

        // Held until return; released on every path
        let lock = self.paths.lock_files(video_uuid).await;
        log::debug!("{} Acquired file lock of video {}", tags, lock.video_uuid());

        tokio::fs::create_dir_all(&self.workspace_root).await?;
        let workspace = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&self.workspace_root)?;

        let video = self
            .db
            .load_video(&video_uuid)?
            .ok_or_else(|| AppError::NotFound(format!("video {}", video_uuid)))?;
        let file = video
            .max_quality_file()
            .ok_or_else(|| AppError::NotFound(format!("file of video {}", video_uuid)))?;

        let media_path = self
            .paths
            .make_available_video_file(file, workspace.path())
            .await?;

        if !self.probe.has_audio_stream(&media_path).await? {
            log::info!("{} Do not run transcription for {}: no audio stream", tags, video.url);
            self.committer.skip(&video, &tags)?;
            return Ok(TranscriptionOutcome::SkippedNoAudio);
        }

        let transcriber = self.transcribers.ensure_ready(&tags).await?;
        let model = TranscriptionModel::from_config(&self.config)?;

        log::info!(
            "{} Running transcription for {} with {}",
            tags,
            video.url,
            transcriber.engine_name()
        );

        let transcript = transcriber
            .transcribe(TranscribeRequest {
                media_path: &media_path,
                model: &model,
                output_dir: workspace.path(),
                format: TranscriptFormat::Vtt,
            })
            .await?;

        let outcome = self
            .committer
            .commit(&video, &transcript.language, &transcript.path, &tags)
            .await?;

        Ok(outcome.into())
    }
}
