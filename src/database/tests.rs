// Edge-case tests for the transcription bookkeeping tables
// Run with: cargo test --package video-transcription --lib database::tests

#[cfg(test)]
mod transcription_tests {
    use crate::database::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    fn insert_video(db: &Database, language: Option<&str>) -> Video {
        db.create_video(&NewVideo {
            uuid: Uuid::new_v4(),
            name: "Episode 1",
            url: "https://videos.example/w/ep1",
            privacy: VideoPrivacy::Public,
            language,
        })
        .unwrap()
    }

    fn increase(db: &Database, video_id: i64) {
        db.with_transaction(|tx| Database::increase_pending_transcription_in(tx, video_id))
            .unwrap();
    }

    // =========================================================================
    // Videos and files
    // =========================================================================

    #[test]
    fn test_load_video_with_files() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);
        db.add_video_file(video.id, 480, 100, &FileStorage::Local { path: "/data/480.mp4".into() })
            .unwrap();
        db.add_video_file(
            video.id,
            1080,
            900,
            &FileStorage::ObjectStorage {
                url: "https://s3.example/1080.mp4".into(),
            },
        )
        .unwrap();

        let loaded = db.load_video(&video.uuid).unwrap().unwrap();
        assert_eq!(loaded.files.len(), 2);
        assert_eq!(loaded.privacy, VideoPrivacy::Public);

        let best = loaded.max_quality_file().unwrap();
        assert_eq!(best.resolution, 1080);
        assert!(matches!(best.storage, FileStorage::ObjectStorage { .. }));
    }

    #[test]
    fn test_load_unknown_video_is_none() {
        let (db, _temp) = setup_test_db();
        assert!(db.load_video(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_video_without_files_has_no_max_quality() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);
        let loaded = db.load_video(&video.uuid).unwrap().unwrap();
        assert!(loaded.max_quality_file().is_none());
    }

    #[test]
    fn test_language_first_writer_wins() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);

        assert!(db.set_language_if_unset(video.id, "en").unwrap());
        assert!(!db.set_language_if_unset(video.id, "fr").unwrap());

        let loaded = db.load_video(&video.uuid).unwrap().unwrap();
        assert_eq!(loaded.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_language_set_at_upload_is_kept() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, Some("de"));

        assert!(!db.set_language_if_unset(video.id, "en").unwrap());
        let loaded = db.load_video(&video.uuid).unwrap().unwrap();
        assert_eq!(loaded.language.as_deref(), Some("de"));
    }

    // =========================================================================
    // Pending transcription counter
    // =========================================================================

    #[test]
    fn test_counter_pairs_increments_and_decrements() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);

        increase(&db, video.id);
        increase(&db, video.id);
        assert_eq!(db.get_pending_transcription(video.id).unwrap(), 2);

        assert_eq!(db.decrease_pending_transcription(video.id).unwrap(), 1);
        assert_eq!(db.decrease_pending_transcription(video.id).unwrap(), 0);
    }

    #[test]
    fn test_counter_never_goes_negative() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);

        increase(&db, video.id);
        db.decrease_pending_transcription(video.id).unwrap();
        assert_eq!(db.decrease_pending_transcription(video.id).unwrap(), 0);
        assert_eq!(db.get_pending_transcription(video.id).unwrap(), 0);
    }

    #[test]
    fn test_decrease_without_row_is_zero() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);
        assert_eq!(db.decrease_pending_transcription(video.id).unwrap(), 0);
    }

    #[test]
    fn test_rolled_back_transaction_does_not_count() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);

        let result: anyhow::Result<()> = db.with_transaction(|tx| {
            Database::increase_pending_transcription_in(tx, video.id)?;
            anyhow::bail!("submission refused")
        });

        assert!(result.is_err());
        assert_eq!(db.get_pending_transcription(video.id).unwrap(), 0);
    }

    // =========================================================================
    // Captions
    // =========================================================================

    #[test]
    fn test_upsert_caption_keeps_one_row_per_language() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);

        let first = db.upsert_caption(video.id, "en", "a-en.vtt").unwrap();
        let second = db.upsert_caption(video.id, "en", "b-en.vtt").unwrap();
        db.upsert_caption(video.id, "fr", "a-fr.vtt").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.filename, "b-en.vtt");
        assert_eq!(second.created_at, first.created_at);

        let captions = db.list_captions(video.id).unwrap();
        assert_eq!(captions.len(), 2);
        assert_eq!(captions[0].language, "en");
        assert_eq!(captions[1].language, "fr");
    }

    #[test]
    fn test_get_missing_caption() {
        let (db, _temp) = setup_test_db();
        let video = insert_video(&db, None);
        assert!(db.get_caption(video.id, "en").unwrap().is_none());
    }

    // =========================================================================
    // Local queue
    // =========================================================================

    #[test]
    fn test_claim_is_fifo_and_exclusive() {
        let (db, _temp) = setup_test_db();
        let first = db
            .with_transaction(|tx| Database::enqueue_job_in(tx, VIDEO_TRANSCRIPTION_JOB, &serde_json::json!({"n": 1})))
            .unwrap();
        let second = db
            .with_transaction(|tx| Database::enqueue_job_in(tx, VIDEO_TRANSCRIPTION_JOB, &serde_json::json!({"n": 2})))
            .unwrap();

        let claimed = db.claim_next_job(VIDEO_TRANSCRIPTION_JOB).unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.started_at.is_some());

        assert_eq!(db.claim_next_job(VIDEO_TRANSCRIPTION_JOB).unwrap().unwrap().id, second);
        assert!(db.claim_next_job(VIDEO_TRANSCRIPTION_JOB).unwrap().is_none());
    }

    #[test]
    fn test_claim_ignores_other_job_types() {
        let (db, _temp) = setup_test_db();
        db.with_transaction(|tx| Database::enqueue_job_in(tx, "video-transcoding", &serde_json::json!({})))
            .unwrap();
        assert!(db.claim_next_job(VIDEO_TRANSCRIPTION_JOB).unwrap().is_none());
    }

    #[test]
    fn test_job_terminal_states() {
        let (db, _temp) = setup_test_db();
        let ok = db
            .with_transaction(|tx| Database::enqueue_job_in(tx, VIDEO_TRANSCRIPTION_JOB, &serde_json::json!({})))
            .unwrap();
        let ko = db
            .with_transaction(|tx| Database::enqueue_job_in(tx, VIDEO_TRANSCRIPTION_JOB, &serde_json::json!({})))
            .unwrap();

        db.mark_job_completed(ok).unwrap();
        db.mark_job_failed(ko, "engine crashed").unwrap();

        let ok = db.get_job(ok).unwrap().unwrap();
        assert_eq!(ok.status, JobStatus::Completed);
        assert!(ok.finished_at.is_some());

        let ko = db.get_job(ko).unwrap().unwrap();
        assert_eq!(ko.status, JobStatus::Failed);
        assert_eq!(ko.error_message.as_deref(), Some("engine crashed"));
    }

    #[test]
    fn test_reset_stuck_processing() {
        let (db, _temp) = setup_test_db();
        db.with_transaction(|tx| Database::enqueue_job_in(tx, VIDEO_TRANSCRIPTION_JOB, &serde_json::json!({})))
            .unwrap();
        let claimed = db.claim_next_job(VIDEO_TRANSCRIPTION_JOB).unwrap().unwrap();

        assert_eq!(db.reset_stuck_processing().unwrap(), 1);
        let job = db.get_job(claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());

        assert_eq!(db.reset_stuck_processing().unwrap(), 0);
    }

    // =========================================================================
    // Runner jobs
    // =========================================================================

    #[test]
    fn test_runner_job_lifecycle() {
        let (db, _temp) = setup_test_db();
        let payload = serde_json::json!({"videoUUID": Uuid::new_v4(), "inputUrl": "https://videos.example/w/1"});
        let uuid = db
            .with_transaction(|tx| Database::create_runner_job_in(tx, VIDEO_TRANSCRIPTION_JOB, &payload))
            .unwrap();

        let claimed = db
            .claim_next_runner_job(VIDEO_TRANSCRIPTION_JOB, "gpu-box")
            .unwrap()
            .unwrap();
        assert_eq!(claimed.uuid, uuid);
        assert_eq!(claimed.payload, payload);
        assert!(db.claim_next_runner_job(VIDEO_TRANSCRIPTION_JOB, "other").unwrap().is_none());

        assert!(db
            .transition_runner_job(&uuid, RunnerJobState::Processing, RunnerJobState::Finished, None)
            .unwrap());
        // Stale transition is refused
        assert!(!db
            .transition_runner_job(&uuid, RunnerJobState::Processing, RunnerJobState::Errored, Some("late"))
            .unwrap());

        let job = db.get_runner_job(&uuid).unwrap().unwrap();
        assert_eq!(job.state, RunnerJobState::Finished);
        assert_eq!(job.runner_name.as_deref(), Some("gpu-box"));
        assert!(job.error_message.is_none());
    }

    // =========================================================================
    // Outbox and notifications
    // =========================================================================

    #[test]
    fn test_outbox_and_notifications_are_per_video() {
        let (db, _temp) = setup_test_db();
        let a = insert_video(&db, None);
        let b = insert_video(&db, None);

        db.insert_federation_activity(a.id, "update").unwrap();
        db.insert_notification(a.id, "my-video-transcription-generated", Some("en"))
            .unwrap();

        assert_eq!(db.list_federation_activities(a.id).unwrap()[0].activity_type, "update");
        assert_eq!(
            db.list_notifications(a.id).unwrap()[0].caption_language.as_deref(),
            Some("en")
        );
        assert!(db.list_federation_activities(b.id).unwrap().is_empty());
        assert!(db.list_notifications(b.id).unwrap().is_empty());
    }
}
