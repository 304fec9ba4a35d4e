//! Capturing reverse proxy.
//!
//! Forwards every request to one upstream origin and records each exchange
//! (headers, bodies, status) as an immutable [`Transaction`].
//!
//! ```text
//!   client ──▶ server (frontend) ──▶ director ──▶ transport ──▶ upstream
//!   client ◀──────────────────────────────────── transport ◀──┘
//!                                                   │
//!                                                   ▼
//!                                   recorder ──▶ TransactionStore
//! ```

pub mod audit;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod store;

pub use audit::{Recorder, Transaction};
pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use store::{MemoryStore, TransactionStore};
