//! Transaction persistence.
//!
//! # Data Flow
//! ```text
//! Recorder
//!     → TransactionStore::insert_one (write-only)
//!     → jsonl.rs (append-only file) | memory.rs (DashMap)
//! ```
//!
//! # Design Decisions
//! - The proxy only ever inserts; there is no read path in the serving code
//! - Implementations synchronize internally and are shared as `Arc<dyn TransactionStore>`
//! - Opened once at startup, closed explicitly after the server drains

pub mod jsonl;
pub mod memory;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::audit::Transaction;
use crate::config::{StoreConfig, StoreKind};

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Errors raised by a transaction store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be opened at startup.
    #[error("failed to open store at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize transaction: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Insert attempted after `close`.
    #[error("store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Write interface into the persistent store.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist one transaction.
    async fn insert_one(&self, transaction: &Transaction) -> StoreResult<()>;

    /// Flush and release the underlying resource.
    async fn close(&self) -> StoreResult<()>;

    /// Short name for logs.
    fn kind(&self) -> &'static str;
}

/// Open the store selected by configuration.
pub async fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn TransactionStore>> {
    let store: Arc<dyn TransactionStore> = match config.kind {
        StoreKind::Jsonl => Arc::new(JsonlStore::open(&config.path).await?),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    tracing::info!(kind = store.kind(), path = ?config.path, "Transaction store opened");
    Ok(store)
}
