use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const VIDEO_TRANSCRIPTION_JOB: &str = "video-transcription";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoPrivacy {
    Public,
    Unlisted,
    Private,
}

impl Default for VideoPrivacy {
    fn default() -> Self {
        Self::Public
    }
}

impl std::fmt::Display for VideoPrivacy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Unlisted => write!(f, "unlisted"),
            Self::Private => write!(f, "private"),
        }
    }
}

impl From<String> for VideoPrivacy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "unlisted" => Self::Unlisted,
            "private" => Self::Private,
            _ => Self::Public,
        }
    }
}

/// Where the bytes of a video file live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum FileStorage {
    Local { path: String },
    ObjectStorage { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFile {
    pub id: i64,
    pub video_id: i64,
    /// Quality rank; the vertical resolution in pixels.
    pub resolution: i32,
    pub size: i64,
    pub storage: FileStorage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub url: String,
    pub privacy: VideoPrivacy,
    pub language: Option<String>,
    pub files: Vec<VideoFile>,
}

impl Video {
    /// Highest resolution file. Ties go to the larger file, then the older row.
    pub fn max_quality_file(&self) -> Option<&VideoFile> {
        self.files
            .iter()
            .max_by_key(|f| (f.resolution, f.size, std::cmp::Reverse(f.id)))
    }
}

#[derive(Debug, Clone)]
pub struct NewVideo<'a> {
    pub uuid: Uuid,
    pub name: &'a str,
    pub url: &'a str,
    pub privacy: VideoPrivacy,
    pub language: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoCaption {
    pub id: i64,
    pub video_id: i64,
    pub language: String,
    pub filename: String,
    pub created_at: String,
    pub updated_at: String,
}

impl VideoCaption {
    /// Deterministic per-language file name, so replacing a caption
    /// overwrites the previous file instead of orphaning it.
    pub fn caption_filename(video_uuid: &Uuid, language: &str) -> String {
        format!("{}-{}.vtt", video_uuid, language)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A row of the local durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: i64,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionJobPayload {
    #[serde(rename = "videoUUID")]
    pub video_uuid: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerJobState {
    Pending,
    Processing,
    Finished,
    Errored,
}

impl std::fmt::Display for RunnerJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Finished => write!(f, "finished"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

impl From<String> for RunnerJobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => Self::Processing,
            "finished" => Self::Finished,
            "errored" => Self::Errored,
            _ => Self::Pending,
        }
    }
}

/// Payload handed to remote runners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerTranscriptionPayload {
    #[serde(rename = "videoUUID")]
    pub video_uuid: Uuid,
    #[serde(rename = "inputUrl")]
    pub input_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerJob {
    pub id: i64,
    pub uuid: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: RunnerJobState,
    pub runner_name: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationActivity {
    pub id: i64,
    pub video_id: i64,
    pub activity_type: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotification {
    pub id: i64,
    pub video_id: i64,
    pub notification_type: String,
    pub caption_language: Option<String>,
    pub created_at: String,
}
