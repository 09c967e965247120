use anyhow::Context;
use spamwatch::config::AppConfig;
use spamwatch::services::ServiceContainer;
use spamwatch::{database, http, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let log_dir = config.log_dir.to_string_lossy().to_string();
    let (logging_config, _log_guard) = logging::init_logging(&log_dir)?;

    http::install_rustls_provider();

    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, &config)?;
    let token = container.cancellation_token();

    logging_config
        .apply_persisted_filter(&container.settings)
        .await;
    logging_config.watch_filter_setting(container.settings.clone(), token.clone());
    logging_config.start_retention_cleanup(token.clone());

    container.initialize().await?;
    tracing::info!("spamwatch started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    container.shutdown().await?;
    Ok(())
}
