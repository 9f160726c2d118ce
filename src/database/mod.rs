pub mod models;

#[cfg(test)]
mod tests;

use anyhow::{anyhow, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub use models::*;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column(row: &Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=5000;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                privacy TEXT NOT NULL DEFAULT 'public',
                language TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS video_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL,
                resolution INTEGER NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                storage TEXT NOT NULL, -- 'local' | 'object-storage'
                file_path TEXT,
                file_url TEXT,
                FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_video_files_video ON video_files(video_id);

            CREATE TABLE IF NOT EXISTS video_captions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL,
                language TEXT NOT NULL,
                filename TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE,
                UNIQUE(video_id, language)
            );

            -- Outstanding work per video
            CREATE TABLE IF NOT EXISTS video_job_info (
                video_id INTEGER PRIMARY KEY,
                pending_transcription INTEGER NOT NULL DEFAULT 0 CHECK (pending_transcription >= 0),
                FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
            );

            -- Local durable queue
            CREATE TABLE IF NOT EXISTS job_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_job_queue_status ON job_queue(job_type, status, id);

            -- Jobs handed to remote runners
            CREATE TABLE IF NOT EXISTS runner_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                runner_name TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runner_jobs_state ON runner_jobs(job_type, state, id);

            CREATE TABLE IF NOT EXISTS federation_outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL,
                activity_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS user_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL,
                notification_type TEXT NOT NULL,
                caption_language TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
            );
            "#,
        )?;
        Ok(())
    }

    /// Run `f` inside one transaction; nothing is written unless it returns Ok.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // =========================================================================
    // Videos
    // =========================================================================

    pub fn create_video(&self, video: &NewVideo<'_>) -> Result<Video> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO videos (uuid, name, url, privacy, language, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                video.uuid.to_string(),
                video.name,
                video.url,
                video.privacy.to_string(),
                video.language,
                now()
            ],
        )?;
        Ok(Video {
            id: conn.last_insert_rowid(),
            uuid: video.uuid,
            name: video.name.to_string(),
            url: video.url.to_string(),
            privacy: video.privacy,
            language: video.language.map(str::to_string),
            files: Vec::new(),
        })
    }

    pub fn add_video_file(&self, video_id: i64, resolution: i32, size: i64, storage: &FileStorage) -> Result<i64> {
        let (kind, path, url) = match storage {
            FileStorage::Local { path } => ("local", Some(path.as_str()), None),
            FileStorage::ObjectStorage { url } => ("object-storage", None, Some(url.as_str())),
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO video_files (video_id, resolution, size, storage, file_path, file_url) VALUES (?, ?, ?, ?, ?, ?)",
            params![video_id, resolution, size, kind, path, url],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Load a video together with all of its files
    pub fn load_video(&self, uuid: &Uuid) -> Result<Option<Video>> {
        let conn = self.conn()?;

        let video = conn
            .query_row(
                "SELECT id, uuid, name, url, privacy, language FROM videos WHERE uuid = ?",
                params![uuid.to_string()],
                |row| {
                    Ok(Video {
                        id: row.get(0)?,
                        uuid: uuid_column(row, 1)?,
                        name: row.get(2)?,
                        url: row.get(3)?,
                        privacy: row.get::<_, String>(4)?.into(),
                        language: row.get(5)?,
                        files: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut video) = video else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, video_id, resolution, size, storage, file_path, file_url
             FROM video_files WHERE video_id = ? ORDER BY id",
        )?;
        video.files = stmt
            .query_map(params![video.id], |row| {
                let kind: String = row.get(4)?;
                let storage = match kind.as_str() {
                    "object-storage" => FileStorage::ObjectStorage {
                        url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    },
                    _ => FileStorage::Local {
                        path: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    },
                };
                Ok(VideoFile {
                    id: row.get(0)?,
                    video_id: row.get(1)?,
                    resolution: row.get(2)?,
                    size: row.get(3)?,
                    storage,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(video))
    }

    /// Set the video language only if none is recorded yet.
    /// Returns true when this call set it.
    pub fn set_language_if_unset(&self, video_id: i64, language: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE videos SET language = ? WHERE id = ? AND language IS NULL",
            params![language, video_id],
        )?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Captions
    // =========================================================================

    /// Insert the caption for (video, language) or replace the existing row.
    pub fn upsert_caption(&self, video_id: i64, language: &str, filename: &str) -> Result<VideoCaption> {
        self.with_transaction(|tx| {
            let ts = now();
            tx.execute(
                "INSERT INTO video_captions (video_id, language, filename, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(video_id, language) DO UPDATE SET
                    filename = excluded.filename,
                    updated_at = excluded.updated_at",
                params![video_id, language, filename, ts],
            )?;
            let caption = Self::query_caption(tx, video_id, language)?
                .ok_or_else(|| anyhow!("Caption {} for video {} vanished after upsert", language, video_id))?;
            Ok(caption)
        })
    }

    pub fn get_caption(&self, video_id: i64, language: &str) -> Result<Option<VideoCaption>> {
        let conn = self.conn()?;
        Self::query_caption(&conn, video_id, language)
    }

    fn query_caption(conn: &Connection, video_id: i64, language: &str) -> Result<Option<VideoCaption>> {
        let caption = conn
            .query_row(
                "SELECT id, video_id, language, filename, created_at, updated_at
                 FROM video_captions WHERE video_id = ? AND language = ?",
                params![video_id, language],
                |row| {
                    Ok(VideoCaption {
                        id: row.get(0)?,
                        video_id: row.get(1)?,
                        language: row.get(2)?,
                        filename: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(caption)
    }

    pub fn list_captions(&self, video_id: i64) -> Result<Vec<VideoCaption>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, video_id, language, filename, created_at, updated_at
             FROM video_captions WHERE video_id = ? ORDER BY language",
        )?;
        let captions = stmt
            .query_map(params![video_id], |row| {
                Ok(VideoCaption {
                    id: row.get(0)?,
                    video_id: row.get(1)?,
                    language: row.get(2)?,
                    filename: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(captions)
    }

    // =========================================================================
    // Pending transcription counter
    // =========================================================================

    /// Increment inside a caller-owned transaction, creating the row on first use.
    pub fn increase_pending_transcription_in(conn: &Connection, video_id: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO video_job_info (video_id, pending_transcription) VALUES (?, 1)
             ON CONFLICT(video_id) DO UPDATE SET pending_transcription = pending_transcription + 1",
            params![video_id],
        )?;
        Ok(())
    }

    /// Decrement, never below zero. Returns the new value.
    pub fn decrease_pending_transcription(&self, video_id: i64) -> Result<i64> {
        self.with_transaction(|tx| {
            let changed = tx.execute(
                "UPDATE video_job_info
                 SET pending_transcription = MAX(pending_transcription - 1, 0)
                 WHERE video_id = ?",
                params![video_id],
            )?;
            if changed == 0 {
                log::warn!("Decreasing pending transcription of video {} with no job info row", video_id);
                return Ok(0);
            }
            let value = tx.query_row(
                "SELECT pending_transcription FROM video_job_info WHERE video_id = ?",
                params![video_id],
                |row| row.get(0),
            )?;
            Ok(value)
        })
    }

    pub fn get_pending_transcription(&self, video_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT pending_transcription FROM video_job_info WHERE video_id = ?",
                params![video_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    // =========================================================================
    // Local job queue
    // =========================================================================

    pub fn enqueue_job_in(conn: &Connection, job_type: &str, payload: &serde_json::Value) -> Result<i64> {
        conn.execute(
            "INSERT INTO job_queue (job_type, payload, status, created_at) VALUES (?, ?, 'pending', ?)",
            params![job_type, payload.to_string(), now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Atomically take the oldest pending job of `job_type` and mark it processing
    pub fn claim_next_job(&self, job_type: &str) -> Result<Option<QueueJob>> {
        self.with_transaction(|tx| {
            let id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM job_queue WHERE job_type = ? AND status = 'pending' ORDER BY id LIMIT 1",
                    params![job_type],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = id else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE job_queue SET status = 'processing', attempts = attempts + 1, started_at = ? WHERE id = ?",
                params![now(), id],
            )?;
            Self::query_job(tx, id)
        })
    }

    pub fn get_job(&self, id: i64) -> Result<Option<QueueJob>> {
        let conn = self.conn()?;
        Self::query_job(&conn, id)
    }

    fn query_job(conn: &Connection, id: i64) -> Result<Option<QueueJob>> {
        let job = conn
            .query_row(
                "SELECT id, job_type, payload, status, attempts, error_message, created_at, started_at, finished_at
                 FROM job_queue WHERE id = ?",
                params![id],
                Self::job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn job_from_row(row: &Row) -> rusqlite::Result<QueueJob> {
        Ok(QueueJob {
            id: row.get(0)?,
            job_type: row.get(1)?,
            payload: json_column(row, 2)?,
            status: row.get::<_, String>(3)?.into(),
            attempts: row.get(4)?,
            error_message: row.get(5)?,
            created_at: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }

    pub fn list_jobs(&self, job_type: &str) -> Result<Vec<QueueJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_type, payload, status, attempts, error_message, created_at, started_at, finished_at
             FROM job_queue WHERE job_type = ? ORDER BY id",
        )?;
        let jobs = stmt
            .query_map(params![job_type], Self::job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn mark_job_completed(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE job_queue SET status = 'completed', error_message = NULL, finished_at = ? WHERE id = ?",
            params![now(), id],
        )?;
        Ok(())
    }

    pub fn mark_job_failed(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE job_queue SET status = 'failed', error_message = ?, finished_at = ? WHERE id = ?",
            params![error, now(), id],
        )?;
        Ok(())
    }

    /// Reset any stuck "processing" jobs to "pending" (for recovery after crash)
    pub fn reset_stuck_processing(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE job_queue SET status = 'pending', started_at = NULL WHERE status = 'processing'",
            [],
        )?;
        if count > 0 {
            log::info!("Reset {} stuck processing jobs to pending", count);
        }
        Ok(count)
    }

    // =========================================================================
    // Runner jobs
    // =========================================================================

    pub fn create_runner_job_in(conn: &Connection, job_type: &str, payload: &serde_json::Value) -> Result<Uuid> {
        let uuid = Uuid::new_v4();
        let ts = now();
        conn.execute(
            "INSERT INTO runner_jobs (uuid, job_type, payload, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
            params![uuid.to_string(), job_type, payload.to_string(), ts],
        )?;
        Ok(uuid)
    }

    /// Hand the oldest pending runner job of `job_type` to `runner_name`
    pub fn claim_next_runner_job(&self, job_type: &str, runner_name: &str) -> Result<Option<RunnerJob>> {
        self.with_transaction(|tx| {
            let uuid: Option<String> = tx
                .query_row(
                    "SELECT uuid FROM runner_jobs WHERE job_type = ? AND state = 'pending' ORDER BY id LIMIT 1",
                    params![job_type],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(uuid) = uuid else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE runner_jobs SET state = 'processing', runner_name = ?, updated_at = ? WHERE uuid = ?",
                params![runner_name, now(), uuid],
            )?;
            Self::query_runner_job(tx, &uuid)
        })
    }

    pub fn get_runner_job(&self, uuid: &Uuid) -> Result<Option<RunnerJob>> {
        let conn = self.conn()?;
        Self::query_runner_job(&conn, &uuid.to_string())
    }

    fn query_runner_job(conn: &Connection, uuid: &str) -> Result<Option<RunnerJob>> {
        let job = conn
            .query_row(
                "SELECT id, uuid, job_type, payload, state, runner_name, error_message, created_at, updated_at
                 FROM runner_jobs WHERE uuid = ?",
                params![uuid],
                Self::runner_job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn runner_job_from_row(row: &Row) -> rusqlite::Result<RunnerJob> {
        Ok(RunnerJob {
            id: row.get(0)?,
            uuid: uuid_column(row, 1)?,
            job_type: row.get(2)?,
            payload: json_column(row, 3)?,
            state: row.get::<_, String>(4)?.into(),
            runner_name: row.get(5)?,
            error_message: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub fn list_runner_jobs(&self, job_type: &str) -> Result<Vec<RunnerJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, uuid, job_type, payload, state, runner_name, error_message, created_at, updated_at
             FROM runner_jobs WHERE job_type = ? ORDER BY id",
        )?;
        let jobs = stmt
            .query_map(params![job_type], Self::runner_job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Move a runner job from `from` to `to`. Returns false if the job was not
    /// in state `from`, so two reports for the same job cannot both apply.
    pub fn transition_runner_job(
        &self,
        uuid: &Uuid,
        from: RunnerJobState,
        to: RunnerJobState,
        error: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE runner_jobs SET state = ?, error_message = ?, updated_at = ? WHERE uuid = ? AND state = ?",
            params![to.to_string(), error, now(), uuid.to_string(), from.to_string()],
        )?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Federation outbox and notifications
    // =========================================================================

    pub fn insert_federation_activity(&self, video_id: i64, activity_type: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO federation_outbox (video_id, activity_type, created_at) VALUES (?, ?, ?)",
            params![video_id, activity_type, now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_federation_activities(&self, video_id: i64) -> Result<Vec<FederationActivity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, video_id, activity_type, created_at FROM federation_outbox WHERE video_id = ? ORDER BY id",
        )?;
        let activities = stmt
            .query_map(params![video_id], |row| {
                Ok(FederationActivity {
                    id: row.get(0)?,
                    video_id: row.get(1)?,
                    activity_type: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(activities)
    }

    pub fn insert_notification(&self, video_id: i64, notification_type: &str, caption_language: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_notifications (video_id, notification_type, caption_language, created_at) VALUES (?, ?, ?, ?)",
            params![video_id, notification_type, caption_language, now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_notifications(&self, video_id: i64) -> Result<Vec<UserNotification>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, video_id, notification_type, caption_language, created_at
             FROM user_notifications WHERE video_id = ? ORDER BY id",
        )?;
        let notifications = stmt
            .query_map(params![video_id], |row| {
                Ok(UserNotification {
                    id: row.get(0)?,
                    video_id: row.get(1)?,
                    notification_type: row.get(2)?,
                    caption_language: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }
}
