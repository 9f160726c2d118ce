use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the speech-to-text engine to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineName {
    OpenaiWhisper,
    WhisperCtranslate2,
    WhisperTimestamped,
}

impl std::fmt::Display for EngineName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenaiWhisper => write!(f, "openai-whisper"),
            Self::WhisperCtranslate2 => write!(f, "whisper-ctranslate2"),
            Self::WhisperTimestamped => write!(f, "whisper-timestamped"),
        }
    }
}

impl std::str::FromStr for EngineName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai-whisper" => Ok(Self::OpenaiWhisper),
            "whisper-ctranslate2" => Ok(Self::WhisperCtranslate2),
            "whisper-timestamped" => Ok(Self::WhisperTimestamped),
            other => Err(AppError::Config(format!("Unknown transcription engine: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub video_transcription: TranscriptionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub tmp_dir: PathBuf,
    pub captions_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub enabled: bool,
    pub engine: EngineName,
    /// Externally installed engine binary. When set, no install step runs.
    pub engine_path: Option<PathBuf>,
    /// Built-in model name, used when `model_path` is unset.
    pub model: String,
    pub model_path: Option<PathBuf>,
    pub install_directory: PathBuf,
    pub ffprobe_path: PathBuf,
    pub concurrency: usize,
    pub poll_interval_secs: u64,
    pub remote_runners: RemoteRunnersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteRunnersConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("video-transcription")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            video_transcription: TranscriptionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("video-transcription.db"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir().join("video-transcription"),
            captions_dir: data_dir().join("captions"),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            engine: EngineName::WhisperCtranslate2,
            engine_path: None,
            model: "small".to_string(),
            model_path: None,
            install_directory: data_dir().join("pip"),
            ffprobe_path: PathBuf::from("ffprobe"),
            concurrency: 1,
            poll_interval_secs: 5,
            remote_runners: RemoteRunnersConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the YAML config file, then apply `.env` and environment overrides.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let mut config: AppConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            log::warn!("Config file {:?} not found, using defaults", path);
            AppConfig::default()
        };

        let env_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_overrides(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| load_env_value(env_dir, key))
        })?;
        config.validate()?;

        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vt = &mut self.video_transcription;
        if let Some(v) = lookup("VIDEO_TRANSCRIPTION_ENGINE") {
            vt.engine = v.trim().parse()?;
        }
        if let Some(v) = lookup("VIDEO_TRANSCRIPTION_ENABLED") {
            vt.enabled = parse_bool("VIDEO_TRANSCRIPTION_ENABLED", &v)?;
        }
        if let Some(v) = lookup("VIDEO_TRANSCRIPTION_REMOTE_RUNNERS_ENABLED") {
            vt.remote_runners.enabled = parse_bool("VIDEO_TRANSCRIPTION_REMOTE_RUNNERS_ENABLED", &v)?;
        }
        if let Some(v) = lookup("VIDEO_TRANSCRIPTION_ENGINE_PATH") {
            vt.engine_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VIDEO_TRANSCRIPTION_MODEL_PATH") {
            vt.model_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), AppError> {
        let vt = &self.video_transcription;
        if vt.concurrency == 0 {
            return Err(AppError::Config("video_transcription.concurrency must be at least 1".into()));
        }
        if vt.model_path.is_none() && vt.model.trim().is_empty() {
            return Err(AppError::Config(
                "video_transcription.model is required when model_path is not set".into(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!("{} must be a boolean, got {:?}", key, other))),
    }
}

/// Load a value from the .env file in `dir` by key name
pub fn load_env_value(dir: &Path, key: &str) -> Option<String> {
    let env_path = dir.join(".env");
    let prefix = format!("{}=", key);
    if let Ok(content) = std::fs::read_to_string(&env_path) {
        for line in content.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix(&prefix) {
                let value = rest.trim().trim_matches('"').trim_matches('\'');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
video_transcription:
  enabled: true
  engine: openai-whisper
  model: tiny
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.video_transcription.enabled);
        assert_eq!(config.video_transcription.engine, EngineName::OpenaiWhisper);
        assert_eq!(config.video_transcription.model, "tiny");
        assert!(!config.video_transcription.remote_runners.enabled);
        assert_eq!(config.video_transcription.concurrency, 1);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("VIDEO_TRANSCRIPTION_ENABLED", "yes"),
            ("VIDEO_TRANSCRIPTION_REMOTE_RUNNERS_ENABLED", "true"),
            ("VIDEO_TRANSCRIPTION_MODEL_PATH", "/models/tiny.pt"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!(config.video_transcription.enabled);
        assert!(config.video_transcription.remote_runners.enabled);
        assert_eq!(
            config.video_transcription.model_path,
            Some(PathBuf::from("/models/tiny.pt"))
        );
        assert!(config.video_transcription.engine_path.is_none());
    }

    #[test]
    fn test_bad_boolean_override_is_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "VIDEO_TRANSCRIPTION_ENABLED").then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_load_env_value_strips_quotes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "# comment\nVIDEO_TRANSCRIPTION_ENGINE_PATH=\"/opt/whisper\"\nEMPTY=\n",
        )
        .unwrap();

        assert_eq!(
            load_env_value(dir.path(), "VIDEO_TRANSCRIPTION_ENGINE_PATH"),
            Some("/opt/whisper".to_string())
        );
        assert_eq!(load_env_value(dir.path(), "EMPTY"), None);
        assert_eq!(load_env_value(dir.path(), "MISSING"), None);
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let mut config = AppConfig::default();
        config.video_transcription.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_override() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| (k == "VIDEO_TRANSCRIPTION_ENGINE").then(|| "whisper-timestamped".to_string()))
            .unwrap();
        assert_eq!(config.video_transcription.engine, EngineName::WhisperTimestamped);

        let result = config.apply_overrides(|k| (k == "VIDEO_TRANSCRIPTION_ENGINE").then(|| "vosk".to_string()));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
