use anyhow::Context;
use recommendation_trainer::{Config, TrainingJob};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("recommendation_trainer=info,info"));
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    // Load config
    let config = Config::from_env().context("Failed to load configuration")?;
    let report_path = config.pipeline.report_path.clone();

    info!(
        events_path = %config.pipeline.events_path.display(),
        item_metadata = ?config.pipeline.item_metadata_path,
        dry_run = config.pipeline.dry_run,
        "Starting recommendation-trainer"
    );

    let job = TrainingJob::from_config(config)
        .await
        .context("Failed to initialize training job")?;
    let report = job.run().await.context("Training run failed")?;

    let rendered = serde_json::to_string_pretty(&report)?;
    info!(report = %rendered, "Run report");

    if let Some(path) = report_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, rendered)
            .await
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    Ok(())
}
