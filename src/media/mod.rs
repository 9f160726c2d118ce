pub mod probe;

use crate::database::{FileStorage, VideoFile};
use crate::error::AppError;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

pub use probe::{FfprobeProbe, MediaProbe};

type LockTable = Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>;

/// Serializes file-mutating work per video and stages video files locally.
///
/// Each video UUID gets its own async mutex, so two videos never wait on
/// each other. Entries are dropped from the table once nobody holds or waits
/// for them.
#[derive(Clone, Default)]
pub struct VideoPathManager {
    locks: LockTable,
    http: reqwest::Client,
}

/// Exclusive access to one video's files. Released on drop.
pub struct VideoFilesLock {
    video_uuid: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
}

impl VideoFilesLock {
    pub fn video_uuid(&self) -> &Uuid {
        &self.video_uuid
    }
}

impl Drop for VideoFilesLock {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = match self.locks.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Only the table itself still references the mutex: no holder, no waiter.
        if let Some(mutex) = table.get(&self.video_uuid) {
            if Arc::strong_count(mutex) == 1 {
                table.remove(&self.video_uuid);
            }
        }
    }
}

impl VideoPathManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the files of `video_uuid`
    pub async fn lock_files(&self, video_uuid: Uuid) -> VideoFilesLock {
        let mutex = {
            let mut table = match self.locks.lock() {
                Ok(table) => table,
                Err(poisoned) => poisoned.into_inner(),
            };
            table.entry(video_uuid).or_default().clone()
        };

        let guard = mutex.lock_owned().await;

        VideoFilesLock {
            video_uuid,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of videos currently locked or waited on
    pub fn active_locks(&self) -> usize {
        match self.locks.lock() {
            Ok(table) => table.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Return a local path for `file`. Local files are used in place; files in
    /// object storage are downloaded into `workspace`, which the caller owns
    /// and removes.
    pub async fn make_available_video_file(&self, file: &VideoFile, workspace: &Path) -> Result<PathBuf, AppError> {
        match &file.storage {
            FileStorage::Local { path } => {
                let path = PathBuf::from(path);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(AppError::NotFound(format!("Video file {} at {:?}", file.id, path)));
                }
                Ok(path)
            }
            FileStorage::ObjectStorage { url } => {
                let extension = Path::new(url.split('?').next().unwrap_or(url))
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("mp4");
                let target = workspace.join(format!("input-{}.{}", file.id, extension));
                self.download(url, &target).await?;
                Ok(target)
            }
        }
    }

    /// Streaming download with Content-Length validation
    async fn download(&self, url: &str, target: &Path) -> Result<u64, AppError> {
        log::info!("Downloading video file {} to {:?}", url, target);

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Io(format!(
                "Download of {} failed with status: {}",
                url,
                response.status()
            )));
        }

        let content_length = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(target).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = content_length {
            if downloaded != expected {
                return Err(AppError::Io(format!(
                    "Download incomplete: got {} bytes, expected {}",
                    downloaded, expected
                )));
            }
        }

        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_same_video_is_serialized() {
        let manager = VideoPathManager::new();
        let uuid = Uuid::new_v4();

        let first = manager.lock_files(uuid).await;

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let _second = manager.lock_files(uuid).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second lock must wait for the first");

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second lock acquired after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_distinct_videos_do_not_contend() {
        let manager = VideoPathManager::new();
        let _a = manager.lock_files(Uuid::new_v4()).await;

        let b = tokio::time::timeout(Duration::from_millis(200), manager.lock_files(Uuid::new_v4())).await;
        assert!(b.is_ok(), "locking video B must not wait on video A");
        assert_eq!(manager.active_locks(), 2);
    }

    #[tokio::test]
    async fn test_lock_entries_are_pruned_after_release() {
        let manager = VideoPathManager::new();
        let uuid = Uuid::new_v4();
        {
            let lock = manager.lock_files(uuid).await;
            assert_eq!(lock.video_uuid(), &uuid);
            assert_eq!(manager.active_locks(), 1);
        }
        assert_eq!(manager.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_lock_released_when_guarded_work_fails() {
        let manager = VideoPathManager::new();
        let uuid = Uuid::new_v4();

        async fn failing(manager: &VideoPathManager, uuid: Uuid) -> Result<(), AppError> {
            let _lock = manager.lock_files(uuid).await;
            Err(AppError::Engine("boom".into()))
        }

        assert!(failing(&manager, uuid).await.is_err());
        let relock = tokio::time::timeout(Duration::from_millis(200), manager.lock_files(uuid)).await;
        assert!(relock.is_ok());
    }

    #[tokio::test]
    async fn test_local_file_is_used_in_place() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("video.mp4");
        std::fs::write(&media, b"fake").unwrap();

        let file = VideoFile {
            id: 1,
            video_id: 1,
            resolution: 720,
            size: 4,
            storage: FileStorage::Local {
                path: media.to_string_lossy().to_string(),
            },
        };

        let manager = VideoPathManager::new();
        let path = manager.make_available_video_file(&file, dir.path()).await.unwrap();
        assert_eq!(path, media);
    }

    #[tokio::test]
    async fn test_missing_local_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let file = VideoFile {
            id: 7,
            video_id: 1,
            resolution: 1080,
            size: 0,
            storage: FileStorage::Local {
                path: dir.path().join("gone.mp4").to_string_lossy().to_string(),
            },
        };

        let manager = VideoPathManager::new();
        let result = manager.make_available_video_file(&file, dir.path()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
