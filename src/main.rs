//! `household-watch` service entry point.
//!
//! Reads `HOUSEHOLD_WATCH_*` settings (and `.env`), opens the SQLite store, registers the
//! seed account if credentials were given, and polls until Ctrl-C.
//!
//! ```bash
//! export HOUSEHOLD_WATCH_EMAIL="you@gmail.com"
//! export HOUSEHOLD_WATCH_PASSWORD="app-password"
//! export RUST_LOG=household_watch=debug
//! household-watch
//! ```

use household_watch::{Monitor, ServiceSettings, SqliteStore, TimeoutConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> household_watch::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("household_watch=info")),
        )
        .with_target(true)
        .init();

    let settings = ServiceSettings::from_env()?;
    tracing::info!(database = %settings.database_path.display(), "Starting household-watch");

    let store = Arc::new(SqliteStore::open(&settings.database_path)?);
    let monitor = Monitor::with_network(store, TimeoutConfig::default())?;

    if !settings.monitoring.is_empty() {
        let stored = monitor.monitoring_config().await?;
        let config = settings.monitoring.apply(stored)?;
        tracing::info!(
            polling_interval = ?config.polling_interval,
            auto_click = config.auto_click,
            "Applying monitoring settings from the environment"
        );
        monitor.set_monitoring_config(config).await?;
    }
    if let Some(account) = settings.seed_account {
        monitor.save_account(account).await?;
    }

    if let Err(e) = monitor.start().await {
        tracing::error!(error = %e, "Monitoring not started");
        return Err(e);
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested"),
        Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
    }

    monitor.stop().await;
    Ok(())
}
