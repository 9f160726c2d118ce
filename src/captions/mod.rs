pub mod side_effects;

use crate::database::{Database, Video, VideoCaption};
use crate::error::AppError;
use crate::languages::is_caption_language_valid;
use crate::log_tags::LogTags;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub use side_effects::{DatabaseNotifier, Federator, Notifier, OutboxFederator};

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed(VideoCaption),
    /// The engine reported a language outside the accepted set; nothing stored.
    InvalidLanguage(String),
}

/// Finalizes transcription results: pending counter, video language, caption
/// file and row, then federation and notification.
pub struct CompletionCommitter {
    db: Arc<Database>,
    captions_dir: PathBuf,
    federator: Arc<dyn Federator>,
    notifier: Arc<dyn Notifier>,
}

impl CompletionCommitter {
    pub fn new(
        db: Arc<Database>,
        captions_dir: PathBuf,
        federator: Arc<dyn Federator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            captions_dir,
            federator,
            notifier,
        }
    }

    pub fn caption_file_path(&self, caption: &VideoCaption) -> PathBuf {
        self.captions_dir.join(&caption.filename)
    }

    /// Terminal state for an attempt that produced nothing to store.
    pub fn skip(&self, video: &Video, tags: &LogTags) -> Result<(), AppError> {
        self.release_pending(video, tags)
    }

    fn release_pending(&self, video: &Video, tags: &LogTags) -> Result<(), AppError> {
        let remaining = self.db.decrease_pending_transcription(video.id)?;
        log::debug!("{} Pending transcriptions left: {}", tags, remaining);
        Ok(())
    }

    pub async fn commit(
        &self,
        video: &Video,
        language: &str,
        caption_path: &Path,
        tags: &LogTags,
    ) -> Result<CommitOutcome, AppError> {
        // Decrement first so the counter stays accurate whatever happens next.
        self.release_pending(video, tags)?;

        if !is_caption_language_valid(language) {
            log::warn!(
                "{} Invalid transcription language {:?} for video {}",
                tags,
                language,
                video.uuid
            );
            return Ok(CommitOutcome::InvalidLanguage(language.to_string()));
        }

        let mut video = video.clone();
        let language_set = self
            .db
            .set_language_if_unset(video.id, language)
            .map_err(|e| AppError::Commit(format!("Failed to set video language: {}", e)))?;
        if language_set {
            log::info!("{} Video language set to {}", tags, language);
            video.language = Some(language.to_string());
        }

        let caption = self
            .create_local_caption(&video, language, caption_path)
            .await
            .map_err(|e| AppError::Commit(e.to_string()))?;

        if let Err(e) = self.federator.federate_video_if_needed(&video).await {
            log::warn!("{} Failed to federate video {}: {}", tags, video.uuid, e);
        }

        if let Err(e) = self.notifier.notify_of_generated_transcription(&video, &caption).await {
            log::warn!("{} Failed to notify generated transcription: {}", tags, e);
        }

        log::info!("{} Transcription ended for {}", tags, video.uuid);

        Ok(CommitOutcome::Committed(caption))
    }

    /// Copy the caption into durable storage under its per-language name,
    /// then upsert the row.
    async fn create_local_caption(
        &self,
        video: &Video,
        language: &str,
        source: &Path,
    ) -> Result<VideoCaption, AppError> {
        tokio::fs::create_dir_all(&self.captions_dir).await?;

        let filename = VideoCaption::caption_filename(&video.uuid, language);
        let target = self.captions_dir.join(&filename);
        let staging = self
            .captions_dir
            .join(format!(".{}.{}.tmp", filename, Uuid::new_v4()));

        tokio::fs::copy(source, &staging).await?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        let caption = self.db.upsert_caption(video.id, language, &filename)?;
        Ok(caption)
    }
}
