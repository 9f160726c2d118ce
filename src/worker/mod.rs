pub mod transcribe;


use crate::database::{Database, QueueJob, TranscriptionJobPayload, VIDEO_TRANSCRIPTION_JOB};
use crate::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use transcribe::{TranscriptionExecutor, TranscriptionOutcome};

/// Pulls transcription jobs from the local queue and runs them, at most
/// `concurrency` at a time.
pub struct QueueWorker {
    db: Arc<Database>,
    executor: Arc<TranscriptionExecutor>,
    concurrency: usize,
    poll_interval: Duration,
}

impl QueueWorker {
    pub fn new(
        db: Arc<Database>,
        executor: Arc<TranscriptionExecutor>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            executor,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Poll the queue until `cancel` fires, then wait for in-flight jobs.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!("Transcription worker started (concurrency {})", self.concurrency);

        // Jobs left in "processing" by a previous run never finished
        if let Err(e) = self.db.reset_stuck_processing() {
            log::warn!("Failed to reset stuck processing jobs: {}", e);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.fill_slots(&semaphore, &mut tasks);

            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("Transcription task panicked: {}", e);
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if !tasks.is_empty() {
            log::info!("Waiting for {} in-flight transcriptions", tasks.len());
        }
        while tasks.join_next().await.is_some() {}

        log::info!("Transcription worker stopped");
    }

    /// Claim jobs while there are free slots and pending work
    fn fill_slots(&self, semaphore: &Arc<Semaphore>, tasks: &mut JoinSet<()>) {
        loop {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                return;
            };

            let job = match self.db.claim_next_job(VIDEO_TRANSCRIPTION_JOB) {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(e) => {
                    log::error!("Failed to claim transcription job: {}", e);
                    return;
                }
            };

            let db = self.db.clone();
            let executor = self.executor.clone();
            tasks.spawn(async move {
                process_job(&db, &executor, job).await;
                drop(permit);
            });
        }
    }

    /// Run every pending job inline, one after another. Returns how many ran.
    pub async fn drain(&self) -> Result<usize, AppError> {
        let mut processed = 0;
        while let Some(job) = self.db.claim_next_job(VIDEO_TRANSCRIPTION_JOB)? {
            process_job(&self.db, &self.executor, job).await;
            processed += 1;
        }
        Ok(processed)
    }
}

/// Execute one claimed job and record its terminal state. A failed attempt
/// releases the video's pending transcription unless the failing stage did.
async fn process_job(db: &Database, executor: &TranscriptionExecutor, job: QueueJob) {
    let payload: TranscriptionJobPayload = match serde_json::from_value(job.payload.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("Invalid payload for transcription job {}: {}", job.id, e);
            if let Err(e) = db.mark_job_failed(job.id, &format!("Invalid payload: {}", e)) {
                log::error!("Failed to mark job {} failed: {}", job.id, e);
            }
            return;
        }
    };

    let video_uuid = payload.video_uuid;
    let tags = TranscriptionExecutor::log_tags(&video_uuid);
    let span = tracing::info_span!("transcription_job", job_id = job.id, video = %video_uuid);

    let start = std::time::Instant::now();
    let result = executor.run(video_uuid).instrument(span).await;

    match result {
        Ok(outcome) => {
            log::info!(
                "{} Transcription job {} done in {:.1}s: {}",
                tags,
                job.id,
                start.elapsed().as_secs_f64(),
                outcome_label(&outcome)
            );
            if let Err(e) = db.mark_job_completed(job.id) {
                log::error!("{} Failed to mark job {} completed: {}", tags, job.id, e);
            }
        }
        Err(e) => {
            log::error!("{} Transcription job {} failed: {}", tags, job.id, e);
            if let Err(db_err) = db.mark_job_failed(job.id, &e.to_string()) {
                log::error!("{} Failed to mark job {} failed: {}", tags, job.id, db_err);
            }
            if !e.pending_released() {
                release_pending(db, &video_uuid);
            }
        }
    }
}

fn release_pending(db: &Database, video_uuid: &uuid::Uuid) {
    match db.load_video(video_uuid) {
        Ok(Some(video)) => {
            if let Err(e) = db.decrease_pending_transcription(video.id) {
                log::error!("Failed to release pending transcription of {}: {}", video_uuid, e);
            }
        }
        Ok(None) => log::warn!("Video {} vanished before its transcription failed", video_uuid),
        Err(e) => log::error!("Failed to load video {}: {}", video_uuid, e),
    }
}

fn outcome_label(outcome: &TranscriptionOutcome) -> String {
    match outcome {
        TranscriptionOutcome::Transcribed(caption) => format!("caption {}", caption.language),
        TranscriptionOutcome::SkippedNoAudio => "no audio".to_string(),
        TranscriptionOutcome::InvalidLanguage(language) => format!("invalid language {}", language),
    }
}
