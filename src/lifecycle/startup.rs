//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Install the metrics exporter when enabled
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so traffic arrives only when ready
//! - `start` leaves logging to the embedding application; `run` installs it

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::validation::{validate_config, ValidationError};
use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::lifecycle::signals::shutdown_on_signal;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};
use crate::pool::WorkerPool;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0:?}")]
    Config(Vec<ValidationError>),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Run the gateway in front of `pool` until `shutdown` fires.
pub async fn start(
    config: GatewayConfig,
    pool: Arc<dyn WorkerPool>,
    shutdown: &Shutdown,
) -> Result<(), StartupError> {
    validate_config(&config).map_err(StartupError::Config)?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(err) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %err,
                "failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        address = %config.http.address,
        raw_body = config.http.raw_body,
        max_request_size_mb = config.http.max_request_size,
        request_timeout_secs = config.timeouts.request_secs,
        "configuration loaded"
    );

    let listener = TcpListener::bind(&config.http.address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.http.address.clone(),
            source,
        })?;

    let server = HttpServer::new(config, pool);
    server.run(listener, shutdown.subscribe()).await?;
    Ok(())
}

/// Install logging, stop on SIGINT/SIGTERM, and run the gateway.
pub async fn run(config: GatewayConfig, pool: Arc<dyn WorkerPool>) -> Result<(), StartupError> {
    if let Err(err) = logging::init_logging(&config.observability.log_level) {
        tracing::debug!(error = %err, "logging already installed");
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "worker gateway starting");

    let shutdown = Shutdown::new();
    let signals = tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let result = start(config, pool, &shutdown).await;
    signals.abort();

    tracing::info!("shutdown complete");
    result
}
