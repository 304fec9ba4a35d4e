//! In-process transaction store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::Transaction;
use crate::store::{StoreError, StoreResult, TransactionStore};

/// A thread-safe map of recorded transactions, keyed by id.
///
/// Clones share the same map, so a test can keep a handle while the proxy
/// writes through another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<Uuid, Transaction>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<Transaction> {
        self.inner.get(id).map(|r| r.value().clone())
    }

    /// Number of stored transactions.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot of every transaction, oldest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut all: Vec<_> = self.inner.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|tx| tx.timestamp);
        all
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_one(&self, transaction: &Transaction) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        self.inner.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
