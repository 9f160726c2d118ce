//! Speech-to-text engines and the process-wide transcriber instance.

mod whisper_cli;

use crate::config::{EngineName, TranscriptionConfig};
use crate::error::AppError;
use crate::log_tags::LogTags;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub use whisper_cli::WhisperCliTranscriber;

/// Model handed to the engine for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionModel {
    /// User supplied model file or directory
    FromPath(PathBuf),
    /// Model the engine knows by name ("tiny", "small", "large-v3", ...)
    Builtin(String),
}

impl TranscriptionModel {
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Err(AppError::Config(format!("Transcription model not found: {:?}", path)));
        }
        Ok(Self::FromPath(path.to_path_buf()))
    }

    /// A configured model path wins over the built-in model name.
    pub fn from_config(config: &TranscriptionConfig) -> Result<Self, AppError> {
        match &config.model_path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::Builtin(config.model.clone())),
        }
    }
}

/// Caption format requested from the engine. Captions are stored as WebVTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Vtt,
}

impl TranscriptFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Vtt => "vtt",
        }
    }
}

pub struct TranscribeRequest<'a> {
    pub media_path: &'a Path,
    pub model: &'a TranscriptionModel,
    pub output_dir: &'a Path,
    pub format: TranscriptFormat,
}

/// Caption file produced by an engine plus the language it detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFile {
    pub path: PathBuf,
    pub language: String,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn engine_name(&self) -> EngineName;

    /// One-time installation of the engine into `directory`.
    async fn install(&self, directory: &Path) -> Result<(), AppError>;

    /// Run the engine to completion. Fails with `AppError::Engine` when the
    /// engine errors or leaves no usable output.
    async fn transcribe(&self, request: TranscribeRequest<'_>) -> Result<TranscriptFile, AppError>;
}

pub type TranscriberFactory =
    Box<dyn Fn(&TranscriptionConfig) -> Result<Arc<dyn Transcriber>, AppError> + Send + Sync>;

/// Build the engine named by the configuration.
pub fn create_from_engine_name(config: &TranscriptionConfig) -> Result<Arc<dyn Transcriber>, AppError> {
    Ok(Arc::new(WhisperCliTranscriber::new(
        config.engine,
        config.engine_path.clone(),
        &config.install_directory,
    )))
}

/// Lazily built, shared transcriber.
///
/// The first `ensure_ready` call constructs the engine and, when no external
/// engine binary is configured, installs it. Concurrent first callers wait on
/// the same initialization; a failed initialization is retried by the next
/// caller.
pub struct TranscriberCell {
    config: TranscriptionConfig,
    factory: TranscriberFactory,
    cell: OnceCell<Arc<dyn Transcriber>>,
}

impl TranscriberCell {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self::with_factory(config, Box::new(create_from_engine_name))
    }

    pub fn with_factory(config: TranscriptionConfig, factory: TranscriberFactory) -> Self {
        Self {
            config,
            factory,
            cell: OnceCell::new(),
        }
    }

    pub async fn ensure_ready(&self, tags: &LogTags) -> Result<Arc<dyn Transcriber>, AppError> {
        let transcriber = self
            .cell
            .get_or_try_init(|| async {
                let transcriber = (self.factory)(&self.config)?;

                if self.config.engine_path.is_none() {
                    log::info!(
                        "{} Installing transcriber {} to generate subtitles",
                        tags,
                        transcriber.engine_name()
                    );
                    transcriber.install(&self.config.install_directory).await?;
                }

                Ok::<_, AppError>(transcriber)
            })
            .await?;

        Ok(transcriber.clone())
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }
}
