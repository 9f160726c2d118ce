//! Downstream effects of a committed caption. Both are best effort: the
//! committer logs their failures and never rolls back because of them.

use crate::database::{Database, Video, VideoCaption, VideoPrivacy};
use async_trait::async_trait;
use std::sync::Arc;

pub const GENERATED_TRANSCRIPTION_NOTIFICATION: &str = "my-video-transcription-generated";

#[async_trait]
pub trait Federator: Send + Sync {
    /// Announce the updated video to followers when its privacy allows it.
    async fn federate_video_if_needed(&self, video: &Video) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_of_generated_transcription(&self, video: &Video, caption: &VideoCaption) -> anyhow::Result<()>;
}

/// Records `update` activities in the federation outbox; delivery is owned by
/// whoever drains the outbox.
pub struct OutboxFederator {
    db: Arc<Database>,
}

impl OutboxFederator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Federator for OutboxFederator {
    async fn federate_video_if_needed(&self, video: &Video) -> anyhow::Result<()> {
        if video.privacy != VideoPrivacy::Public {
            log::debug!("Not federating {} video {}", video.privacy, video.uuid);
            return Ok(());
        }
        self.db.insert_federation_activity(video.id, "update")?;
        Ok(())
    }
}

/// Stores a notification row for the video owner.
pub struct DatabaseNotifier {
    db: Arc<Database>,
}

impl DatabaseNotifier {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Notifier for DatabaseNotifier {
    async fn notify_of_generated_transcription(&self, video: &Video, caption: &VideoCaption) -> anyhow::Result<()> {
        self.db.insert_notification(
            video.id,
            GENERATED_TRANSCRIPTION_NOTIFICATION,
            Some(&caption.language),
        )?;
        Ok(())
    }
}
