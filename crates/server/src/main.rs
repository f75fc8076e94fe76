//! Burrow server binary.

use anyhow::{Context, Result};
use burrow_core::config::AppConfig;
use burrow_server::completion::CompletionConsumer;
use burrow_server::reaper::{self, Reaper};
use burrow_server::vector::{NoopVectorIndex, VectorIndex};
use burrow_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Burrow - desktop agent sync backend
#[derive(Parser, Debug)]
#[command(name = "burrowd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "BURROW_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `BURROW_*` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("BURROW_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Burrow v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    burrow_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let metadata = burrow_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    // No reconciliation or agent session survives a restart.
    reaper::release_all(metadata.as_ref(), "startup")
        .await
        .context("failed to release crawls left by a previous instance")?;

    let log = burrow_transport::log_from_config(&config.stream)
        .context("failed to initialize log stream")?;
    tracing::info!(backend = log.backend_name(), "Log stream initialized");

    let vectors: Arc<dyn VectorIndex> = Arc::new(NoopVectorIndex);
    let (state, inbox) = AppState::new(config.clone(), metadata.clone(), log.clone(), vectors)
        .await
        .context("failed to connect backend transport session")?;

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push(state.dispatcher().spawn(inbox, shutdown.clone()));

    let consumer = CompletionConsumer::new(
        metadata.clone(),
        log,
        config.stream.signal_topic.clone(),
        config.stream.signal_group.clone(),
    );
    tasks.push(tokio::spawn(consumer.run(shutdown.clone())));

    if config.reaper.enabled {
        tasks.push(Reaper::new(metadata.clone(), config.reaper.clone()).spawn(shutdown.clone()));
    } else {
        tracing::info!("Idle-crawl reaper disabled");
    }

    let correlator = state.correlator.clone();
    let session = state.session.clone();
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = shutdown_signal().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signals");
            }
            tracing::info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }

    let abandoned = correlator.abandon_all();
    if abandoned > 0 {
        tracing::warn!(abandoned, "Abandoned pending chunk requests");
    }
    session.disconnect().await;

    if let Err(e) = reaper::release_all(metadata.as_ref(), "shutdown").await {
        tracing::error!(error = %e, "Shutdown crawl release failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
