use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use video_transcription_lib::config::AppConfig;
use video_transcription_lib::error::AppError;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VIDEO_TRANSCRIPTION_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));

    let config = AppConfig::load(&config_path)?;
    video_transcription_lib::init_logging(&config.log.level);
    log::info!("Loaded configuration from {:?}", config_path);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        log::info!("Shutdown requested");
        shutdown.cancel();
    });

    video_transcription_lib::run(config, cancel).await
}
