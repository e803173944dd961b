//! Hepacheck: liver-disease risk prediction API.
//!
//! Main entry point for the HTTP server.

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hepacheck::adapters::artifacts::load_artifacts;
use hepacheck::adapters::http::router;
use hepacheck::adapters::sanitize::SanitizingMakeWriter;
use hepacheck::adapters::shapley::ShapleyFactory;
use hepacheck::adapters::sqlite::SqliteStorage;
use hepacheck::application::{ArtifactRegistry, PredictionService};
use hepacheck::config::Config;
use hepacheck::domain::{FieldCipher, FieldCryptoError};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;

    // Default behavior:
    // - interactive TTY: log to a file
    // - non-interactive: log to stdout (so `docker logs` works)
    let use_file = config.log_mode.use_file(std::io::stdout().is_terminal());
    let (writer, _guard) = if use_file {
        if let Some(parent) = config.log_file.parent() {
            // Best-effort: don't fail startup just because the directory is missing.
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)
            .with_context(|| format!("Cannot open log file {}", config.log_file.display()))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    tracing::info!("Starting Hepacheck...");

    let bundle = load_artifacts(&config.artifact_dir).with_context(|| {
        format!(
            "Failed to load model artifacts from {}",
            config.artifact_dir.display()
        )
    })?;
    let registry = ArtifactRegistry::new(
        bundle,
        Arc::new(ShapleyFactory),
        config.explainer_retry,
    );
    tracing::info!(
        "Loaded model {} ({} features, secondary model: {}, scaler: {})",
        registry.model_version(),
        registry.feature_spec().len(),
        registry.has_secondary_model(),
        registry.has_scaler()
    );

    let storage = open_storage(&config)?;
    let service = Arc::new(PredictionService::new(Arc::new(registry), storage));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Cannot bind {}", config.bind_addr))?;
    tracing::info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Hepacheck shutdown complete.");
    Ok(())
}

/// Open the prediction store, or run without one.
///
/// A missing field key disables persistence; an unreadable key or database
/// aborts startup.
fn open_storage(config: &Config) -> Result<Option<Arc<SqliteStorage>>> {
    let Some(db_path) = &config.db_path else {
        tracing::info!("Persistence disabled");
        return Ok(None);
    };

    let cipher = match FieldCipher::from_env() {
        Ok(cipher) => Arc::new(cipher),
        Err(FieldCryptoError::MissingKey) => {
            tracing::warn!("No field encryption key configured; persistence disabled");
            return Ok(None);
        }
        Err(e) => return Err(e).context("Failed to load field encryption key"),
    };

    let storage = SqliteStorage::new(db_path, cipher)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    tracing::info!("Persisting predictions to {}", db_path.display());
    Ok(Some(Arc::new(storage)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
