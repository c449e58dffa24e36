//! Axum API server binary.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tubeflow_api::{create_router, metrics, ApiConfig, AppState};

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("tubeflow=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing()?;
    info!("Starting tubeflow-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let state = AppState::from_env(config.clone())
        .await
        .context("Failed to create application state")?;

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    // The sweep is safe to run in several processes at once
    let run_sweep = std::env::var("CLEANUP_SWEEP_ENABLED")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = run_sweep.then(|| {
        let cleanup = state.cleanup.clone();
        tokio::spawn(async move { cleanup.run(shutdown_rx).await })
    });

    let orchestrator = state.orchestrator.clone();
    let shutdown_timeout = orchestrator.config().shutdown_timeout;
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(sweeper) = sweeper {
        if tokio::time::timeout(shutdown_timeout, sweeper).await.is_err() {
            warn!("Cleanup sweep did not stop within {:?}", shutdown_timeout);
        }
    }

    // Let background ingest, processing and publish steps reach a stable status
    if !orchestrator.runner().wait_idle(shutdown_timeout).await {
        warn!(
            pending = orchestrator.runner().pending(),
            "Background steps still running at shutdown"
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
