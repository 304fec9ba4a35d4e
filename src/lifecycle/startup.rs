//! Startup orchestration.
//!
//! # Order
//! store → frontend (director, transport) → metrics → listener → serve
//!
//! Any startup error is fatal: the process never begins serving. Once serving
//! stops, in-flight records drain and the store is closed.

use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::http::{DirectorError, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::store::{open_store, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("invalid upstream: {0}")]
    Upstream(#[from] DirectorError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Run the proxy until a shutdown signal arrives.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    signals::forward_signals(shutdown.clone());
    run_until(config, shutdown).await
}

/// Run the proxy until `shutdown` is triggered.
pub async fn run_until(config: ProxyConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let store = open_store(&config.store).await?;
    let server = HttpServer::new(&config.upstream, store.clone())?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let address = config.listener.socket_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    tracing::info!(
        address = %address,
        upstream = %config.upstream.base_url,
        "Listening for connections"
    );

    let served = server
        .run(listener, shutdown.signalled())
        .await
        .map_err(StartupError::Serve);

    if let Err(e) = store.close().await {
        tracing::error!(error = %e, "Failed to close transaction store");
    }
    served
}
