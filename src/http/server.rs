//! HTTP server setup: the proxy frontend.
//!
//! # Responsibilities
//! - Create the Axum Router; every path and method reaches one handler
//! - Wire up middleware (tracing)
//! - Run Director then CapturingTransport for each request
//! - Keep each exchange alive even if the client goes away
//! - Drain exchanges and records on shutdown

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::audit::Recorder;
use crate::config::UpstreamConfig;
use crate::http::director::{Director, DirectorError};
use crate::http::request::RequestId;
use crate::http::transport::{CapturingTransport, Outbound};
use crate::observability::metrics;
use crate::store::TransactionStore;

/// How long shutdown waits for in-flight exchanges, then again for records.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers. Read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub director: Arc<Director>,
    pub transport: CapturingTransport,
    pub exchanges: TaskTracker,
}

/// HTTP server for the capturing proxy.
pub struct HttpServer {
    router: Router,
    exchanges: TaskTracker,
    recorder: Recorder,
}

impl HttpServer {
    /// Build the frontend. Fails only on a malformed upstream URL.
    pub fn new(
        config: &UpstreamConfig,
        store: Arc<dyn TransactionStore>,
    ) -> Result<Self, DirectorError> {
        let director = Arc::new(Director::new(&config.base_url)?);
        let recorder = Recorder::new(store);
        let transport = CapturingTransport::new(config, recorder.clone());
        let exchanges = TaskTracker::new();

        tracing::info!(
            upstream = %director.upstream_authority(),
            max_body_bytes = config.max_body_bytes,
            request_timeout_secs = config.request_timeout_secs,
            "Proxy frontend initialized"
        );

        let state = AppState {
            director,
            transport,
            exchanges: exchanges.clone(),
        };

        Ok(Self {
            router: Self::build_router(state),
            exchanges,
            recorder,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// Serve until `shutdown` resolves, then drain exchanges and records.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.exchanges.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.exchanges.wait())
            .await
            .is_err()
        {
            tracing::warn!(pending = self.exchanges.len(), "Abandoning in-flight exchanges");
        }
        self.recorder.drain(DRAIN_TIMEOUT).await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Rewrites the request and runs the capturing round trip on its own task.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = RequestId::from_headers(request.headers());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "exchange",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let (mut parts, body) = request.into_parts();
    let inbound_headers = parts.headers.clone();
    span.in_scope(|| state.director.direct(&mut parts, Some(addr)));

    let outbound = Outbound {
        inbound_headers,
        inbound_path: path,
        parts,
        body,
    };

    // Spawned so a client disconnect cannot cancel the round trip or the record.
    let transport = state.transport.clone();
    let exchange = state
        .exchanges
        .spawn(async move { transport.round_trip(outbound).await }.instrument(span.clone()));

    let response = match exchange.await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            metrics::record_upstream_error(e.kind());
            span.in_scope(|| tracing::error!(error = %e, "Proxy error"));
            e.into_response()
        }
        Err(e) => {
            span.in_scope(|| tracing::error!(error = %e, "Exchange task failed"));
            (StatusCode::INTERNAL_SERVER_ERROR, "Exchange failed").into_response()
        }
    };

    metrics::record_request(&method, response.status().as_u16(), start_time);
    response
}
