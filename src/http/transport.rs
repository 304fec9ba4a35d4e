//! Body-preserving upstream round trip.
//!
//! # Responsibilities
//! - Buffer the inbound body, forward it intact
//! - Execute a single upstream attempt (no retries)
//! - Buffer the response body, return it intact
//! - Hand both buffers to the recorder
//!
//! # Design Decisions
//! - Buffer-then-forward: the client sees nothing until the full response is
//!   known, so the recorded bytes and the delivered bytes are the same `Bytes`
//! - Recording is dispatched, never awaited, on the response path

use axum::{
    body::Body,
    http::{request::Parts, HeaderMap, Request, Response, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::audit::{Exchange, Recorder};
use crate::config::UpstreamConfig;
use crate::http::director::strip_hop_by_hop;

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Errors that fail a single proxied request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    ResponseBody(#[source] axum::Error),
}

impl TransportError {
    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::RequestBody(_) => "request_body",
            TransportError::Upstream(_) => "upstream",
            TransportError::Timeout(_) => "timeout",
            TransportError::ResponseBody(_) => "response_body",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Install the process-wide rustls crypto provider if nobody has yet.
pub fn ensure_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Losing a race with another installer is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

/// Build the upstream client: http or https, no pooled idle connections.
pub fn build_client(config: &UpstreamConfig) -> UpstreamClient {
    ensure_crypto_provider();

    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(config.connect_timeout()));
    http.enforce_http(false);

    let connector = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build(connector)
}

/// A director-rewritten request plus what the recorder needs from the inbound request.
pub struct Outbound {
    /// Request headers before rewriting.
    pub inbound_headers: HeaderMap,
    /// Path of the inbound request.
    pub inbound_path: String,
    /// Rewritten request head.
    pub parts: Parts,
    /// Untouched inbound body.
    pub body: Body,
}

/// Performs the round trip and tees both bodies to the recorder.
#[derive(Clone)]
pub struct CapturingTransport {
    client: UpstreamClient,
    recorder: Recorder,
    max_body_bytes: usize,
    request_timeout: Duration,
}

impl CapturingTransport {
    pub fn new(config: &UpstreamConfig, recorder: Recorder) -> Self {
        Self::with_client(build_client(config), config, recorder)
    }

    pub fn with_client(client: UpstreamClient, config: &UpstreamConfig, recorder: Recorder) -> Self {
        Self {
            client,
            recorder,
            max_body_bytes: config.max_body_bytes,
            request_timeout: config.request_timeout(),
        }
    }

    /// Execute exactly one upstream round trip.
    pub async fn round_trip(&self, outbound: Outbound) -> Result<Response<Body>, TransportError> {
        let Outbound {
            inbound_headers,
            inbound_path,
            parts,
            body,
        } = outbound;

        // 1. Drain the inbound body; nothing is forwarded on failure.
        let request_bytes = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(TransportError::RequestBody)?;

        // 2. Forward a fresh body over the same buffer.
        let request = Request::from_parts(parts, Body::from(request_bytes.clone()));

        // 3. Single attempt. The deadline also covers reading the response body.
        let deadline = Instant::now() + self.request_timeout;
        let response: Response<Incoming> = timeout_at(deadline, self.client.request(request))
            .await
            .map_err(|_| TransportError::Timeout(self.request_timeout))??;

        // 4. Drain the response body.
        let (mut parts, incoming) = response.into_parts();
        let response_bytes: Bytes = timeout_at(
            deadline,
            axum::body::to_bytes(Body::new(incoming), self.max_body_bytes),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.request_timeout))?
        .map_err(TransportError::ResponseBody)?;

        // 5. The client gets a fresh body over the response buffer.
        strip_hop_by_hop(&mut parts.headers);
        let status = parts.status;

        // 6. Record without waiting on the store.
        self.recorder.dispatch(Exchange {
            headers: inbound_headers,
            url: inbound_path,
            status: status.as_u16(),
            request: request_bytes,
            response: response_bytes.clone(),
        });

        tracing::debug!(status = %status, bytes = response_bytes.len(), "Upstream responded");
        Ok(Response::from_parts(parts, Body::from(response_bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            TransportError::RequestBody(axum::Error::new("boom")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(TransportError::ResponseBody(axum::Error::new("x")).kind(), "response_body");
    }

    #[tokio::test]
    async fn test_build_client_accepts_defaults() {
        let _client = build_client(&UpstreamConfig::default());
    }
}
