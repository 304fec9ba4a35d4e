//! Shared utilities for integration testing.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use capture_proxy::config::UpstreamConfig;
use capture_proxy::store::{StoreError, StoreResult};
use capture_proxy::{HttpServer, MemoryStore, Shutdown, Transaction, TransactionStore};

/// What the mock upstream saw.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Received {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct MockUpstream {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<Received>>>,
}

#[allow(dead_code)]
impl MockUpstream {
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

/// Start an upstream whose responses are computed from the request.
#[allow(dead_code)]
pub async fn start_upstream<F>(respond: F) -> MockUpstream
where
    F: Fn(&Received) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    start_upstream_with_delay(Duration::ZERO, respond).await
}

/// Like [`start_upstream`], sleeping `delay` before each response.
pub async fn start_upstream_with_delay<F>(delay: Duration, respond: F) -> MockUpstream
where
    F: Fn(&Received) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    let received = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);
    let log = received.clone();

    let handler = move |request: Request<Body>| {
        let log = log.clone();
        let respond = respond.clone();
        async move {
            let (parts, body) = request.into_parts();
            let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
            let seen = Received {
                method: parts.method.to_string(),
                uri: parts.uri.to_string(),
                headers: parts.headers,
                body,
            };
            let (status, out) = respond(&seen);
            log.lock().unwrap().push(seen);
            tokio::time::sleep(delay).await;
            (StatusCode::from_u16(status).unwrap(), out)
        }
    };

    let app = Router::new().fallback(handler);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockUpstream { addr, received }
}

/// An upstream that answers every connection with `raw` bytes, then closes.
#[allow(dead_code)]
pub async fn start_raw_upstream(raw: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                // Read the request head so closing does not reset the connection.
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(raw).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// An address nothing is listening on.
#[allow(dead_code)]
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

#[allow(dead_code)]
impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

/// Start the proxy in front of `base_url`, recording into `store`.
pub async fn start_proxy(
    base_url: &str,
    store: Arc<dyn TransactionStore>,
    request_timeout_secs: u64,
) -> RunningProxy {
    let config = UpstreamConfig {
        base_url: base_url.to_string(),
        connect_timeout_secs: 2,
        request_timeout_secs,
        ..UpstreamConfig::default()
    };
    start_proxy_with(&config, store).await
}

/// Start the proxy with a fully specified upstream configuration.
pub async fn start_proxy_with(
    config: &UpstreamConfig,
    store: Arc<dyn TransactionStore>,
) -> RunningProxy {
    let server = HttpServer::new(config, store).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.signalled()));

    RunningProxy {
        addr,
        shutdown,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll until the store holds `count` transactions. Records are written on a
/// detached task, so they may land just after the response.
#[allow(dead_code)]
pub async fn wait_for_transactions(store: &MemoryStore, count: usize) -> Vec<Transaction> {
    for _ in 0..100 {
        if store.len() >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let all = store.transactions();
    assert_eq!(all.len(), count, "unexpected number of transactions");
    all
}

/// A store whose every write fails.
#[allow(dead_code)]
pub struct FailingStore;

#[async_trait]
impl TransactionStore for FailingStore {
    async fn insert_one(&self, _: &Transaction) -> StoreResult<()> {
        Err(StoreError::Write(std::io::Error::other("store offline")))
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "failing"
    }
}
