//! thinkstream Proxy
//!
//! Streaming proxy for the Anthropic Messages API.
//!
//! Clients ask for a `-thinking` model; the proxy enables extended thinking
//! upstream, strips the thinking blocks from the event stream, and logs them
//! on the console.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use thinkstream_proxy::cli::Cli;
use thinkstream_proxy::config::ProxyConfig;
use thinkstream_proxy::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);

    info!("Starting thinkstream proxy");

    // Load configuration
    let config = ProxyConfig::load(&cli).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!("Target: {}", config.target_url);
    info!("Thinking budget: {} tokens", config.thinking_budget);
    info!("Log thinking: {}", config.log_thinking);

    if let Some(addr) = config.metrics_addr()? {
        init_metrics(addr)?;
    }

    let grace = config.shutdown_grace();
    let listener = config.bind_listener().await?;
    info!("Proxy listening on http://{}", listener.local_addr()?);

    let state = AppState::new(config)?;
    let app = create_router(state);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
    });

    shutdown_signal().await;
    warn!("Shutdown signal received, stopping server...");
    shutdown.cancel();

    // In-flight streams get a bounded grace period
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => {
            joined.context("Server task failed")??;
            info!("Server shutdown complete");
        }
        Err(_) => {
            warn!("In-flight requests still running after {:?}; exiting", grace);
        }
    }

    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("thinkstream=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("thinkstream=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Serve Prometheus metrics on their own listener
fn init_metrics(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    thinkstream_telemetry::metrics::describe_metrics();

    info!("Metrics exporter listening on http://{}/metrics", addr);
    Ok(())
}
