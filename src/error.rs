use thiserror::Error;

/// Typed error hierarchy for the transcription pipeline.
///
/// Database helpers return `anyhow::Result` and are converted at the service
/// boundary; the variants that matter to callers (`Submission`, `Engine`,
/// `Commit`) are raised explicitly by the stage that owns them.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The local queue or the runner fleet refused the job.
    #[error("Job submission failed: {0}")]
    Submission(String),

    /// The engine errored or produced no usable output.
    #[error("Transcription engine failed: {0}")]
    Engine(String),

    /// Caption file move or metadata upsert failed after the pending counter
    /// was already decremented.
    #[error("Caption commit failed: {0}")]
    Commit(String),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether the pending transcription counter was already released by the
    /// stage that failed. Callers owning the failure path must not decrement
    /// again in that case.
    pub fn pending_released(&self) -> bool {
        matches!(self, AppError::Commit(_))
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Io(format!("HTTP error: {}", e))
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_commit_failures_release_pending() {
        assert!(AppError::Commit("disk full".into()).pending_released());
        assert!(!AppError::Engine("exit 1".into()).pending_released());
        assert!(!AppError::Database("locked".into()).pending_released());
        assert!(!AppError::NotFound("video".into()).pending_released());
    }

    #[test]
    fn test_string_conversions() {
        let e: AppError = "boom".into();
        assert_eq!(e.to_string(), "boom");
        let e: AppError = AppError::from(format!("video {} missing", 3));
        assert!(matches!(e, AppError::Other(_)));
    }
}
