//! Worker binary: runs the cleanup sweep until interrupted.

use std::net::SocketAddr;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tubeflow_worker::{CleanupScheduler, Services, WorkerConfig};

fn init_tracing() -> anyhow::Result<()> {
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
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting tubeflow-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = std::env::var("WORKER_METRICS_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()
            .context("Failed to start metrics exporter")?;
        info!(port, "Prometheus exporter listening");
    }

    let services = Services::from_env().await.context("Failed to build services")?;
    let cleanup = CleanupScheduler::new(&services.context, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(async move { cleanup.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(config.shutdown_timeout, sweeper).await.is_err() {
        warn!("Cleanup sweep did not stop within {:?}", config.shutdown_timeout);
    }

    info!("Worker shutdown complete");
    Ok(())
}
