//! Whisper family command line engines, installed with pip.

use super::{TranscribeRequest, Transcriber, TranscriptFile, TranscriptionModel};
use crate::config::EngineName;
use crate::error::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

pub struct WhisperCliTranscriber {
    engine: EngineName,
    binary: PathBuf,
}

#[derive(Debug, Deserialize)]
struct WhisperJsonOutput {
    language: Option<String>,
}

fn pip_package(engine: EngineName) -> &'static str {
    match engine {
        EngineName::OpenaiWhisper => "openai-whisper",
        EngineName::WhisperCtranslate2 => "whisper-ctranslate2",
        EngineName::WhisperTimestamped => "whisper-timestamped",
    }
}

fn command_name(engine: EngineName) -> &'static str {
    match engine {
        EngineName::OpenaiWhisper => "whisper",
        EngineName::WhisperCtranslate2 => "whisper-ctranslate2",
        EngineName::WhisperTimestamped => "whisper_timestamped",
    }
}

impl WhisperCliTranscriber {
    /// `engine_path` overrides the binary pip would install under
    /// `<install_directory>/bin`.
    pub fn new(engine: EngineName, engine_path: Option<PathBuf>, install_directory: &Path) -> Self {
        let binary = engine_path.unwrap_or_else(|| install_directory.join("bin").join(command_name(engine)));
        Self { engine, binary }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn build_args(&self, request: &TranscribeRequest<'_>) -> Vec<String> {
        let mut args = vec![request.media_path.to_string_lossy().to_string()];

        match (self.engine, request.model) {
            (EngineName::WhisperCtranslate2, TranscriptionModel::FromPath(path)) => {
                args.push("--model_directory".to_string());
                args.push(path.to_string_lossy().to_string());
            }
            (_, TranscriptionModel::FromPath(path)) => {
                args.push("--model".to_string());
                args.push(path.to_string_lossy().to_string());
            }
            (_, TranscriptionModel::Builtin(name)) => {
                args.push("--model".to_string());
                args.push(name.clone());
            }
        }

        // "all" so the JSON file carrying the detected language is written too
        args.extend([
            "--output_format".to_string(),
            "all".to_string(),
            "--output_dir".to_string(),
            request.output_dir.to_string_lossy().to_string(),
        ]);
        args
    }
}

/// Caption and JSON file names the engine writes for the request.
/// whisper_timestamped keeps the full input file name, extension included,
/// and suffixes its JSON with `.words`.
fn output_names(engine: EngineName, request: &TranscribeRequest<'_>) -> Result<(String, String), AppError> {
    let name = match engine {
        EngineName::WhisperTimestamped => request.media_path.file_name(),
        _ => request.media_path.file_stem(),
    }
    .ok_or_else(|| AppError::Engine(format!("Media path {:?} has no file name", request.media_path)))?
    .to_string_lossy()
    .to_string();

    let json = match engine {
        EngineName::WhisperTimestamped => format!("{}.words.json", name),
        _ => format!("{}.json", name),
    };
    Ok((format!("{}.{}", name, request.format.extension()), json))
}

/// Locate the caption file and read the detected language from the JSON
/// sidecar written next to it.
async fn collect_output(engine: EngineName, request: &TranscribeRequest<'_>) -> Result<TranscriptFile, AppError> {
    let (caption_name, json_name) = output_names(engine, request)?;

    let caption_path = request.output_dir.join(caption_name);
    if !tokio::fs::try_exists(&caption_path).await.unwrap_or(false) {
        return Err(AppError::Engine(format!("Engine produced no caption file at {:?}", caption_path)));
    }

    let json_path = request.output_dir.join(json_name);
    let json = tokio::fs::read(&json_path)
        .await
        .map_err(|e| AppError::Engine(format!("Engine produced no JSON output at {:?}: {}", json_path, e)))?;
    let output: WhisperJsonOutput = serde_json::from_slice(&json)
        .map_err(|e| AppError::Engine(format!("Unreadable engine JSON output: {}", e)))?;

    let language = output
        .language
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| AppError::Engine("Engine did not report a detected language".to_string()))?;

    Ok(TranscriptFile {
        path: caption_path,
        language,
    })
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    fn engine_name(&self) -> EngineName {
        self.engine
    }

    async fn install(&self, directory: &Path) -> Result<(), AppError> {
        tokio::fs::create_dir_all(directory).await?;

        let package = pip_package(self.engine);
        log::info!("Installing {} with pip into {:?}", package, directory);

        let output = Command::new("python3")
            .args(["-m", "pip", "install", "--user", "--upgrade", package])
            .env("PYTHONUSERBASE", directory)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::Engine(format!("Failed to spawn pip: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Engine(format!(
                "pip install {} failed with status {}: {}",
                package,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    async fn transcribe(&self, request: TranscribeRequest<'_>) -> Result<TranscriptFile, AppError> {
        let args = self.build_args(&request);
        log::info!("Running {:?} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AppError::Engine(format!("Failed to spawn {:?}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Engine(format!(
                "{} failed with status {}: {}",
                self.engine,
                output.status,
                stderr.trim()
            )));
        }

        collect_output(self.engine, &request).await
    }
}
