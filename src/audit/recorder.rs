//! Best-effort transaction recording.
//!
//! The round trip has already completed by the time a record is made, so a
//! store failure is logged and counted but never reaches the client.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::audit::transaction::{Exchange, Transaction};
use crate::observability::metrics;
use crate::store::{StoreResult, TransactionStore};

/// Builds transactions from exchanges and hands them to the store.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn TransactionStore>,
    tracker: TaskTracker,
}

impl Recorder {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self {
            store,
            tracker: TaskTracker::new(),
        }
    }

    /// Build one transaction and insert it, returning what was stored.
    pub async fn record(&self, exchange: &Exchange) -> StoreResult<Transaction> {
        let transaction = Transaction::from_exchange(exchange);
        match self.store.insert_one(&transaction).await {
            Ok(()) => {
                metrics::record_transaction("stored");
                tracing::debug!(
                    transaction_id = %transaction.id,
                    test_run_id = %transaction.test_run_id,
                    status = transaction.status,
                    "Transaction recorded"
                );
                Ok(transaction)
            }
            Err(e) => {
                metrics::record_transaction("failed");
                tracing::error!(
                    transaction_id = %transaction.id,
                    url = %transaction.url,
                    error = %e,
                    "Failed to record transaction"
                );
                Err(e)
            }
        }
    }

    /// Record on a detached task. The caller never waits on the store.
    pub fn dispatch(&self, exchange: Exchange) {
        let recorder = self.clone();
        self.tracker.spawn(
            async move {
                // Already logged inside `record`.
                let _ = recorder.record(&exchange).await;
            }
            .in_current_span(),
        );
    }

    /// Number of dispatched records still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for in-flight records, typically after the server has stopped.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight transaction records");
        }
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.tracker.len(),
                    "Timed out waiting for transaction records"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use axum::http::{HeaderMap, HeaderValue};
    use bytes::Bytes;

    struct FailingStore;

    #[async_trait]
    impl TransactionStore for FailingStore {
        async fn insert_one(&self, _: &Transaction) -> StoreResult<()> {
            Err(StoreError::Write(std::io::Error::other("disk full")))
        }

        async fn close(&self) -> StoreResult<()> {
            Ok(())
        }

        fn kind(&self) -> &'static str {
            "failing"
        }
    }

    fn exchange(run: &'static str) -> Exchange {
        let mut headers = HeaderMap::new();
        headers.insert("x-testrun-id", HeaderValue::from_static(run));
        Exchange {
            headers,
            url: "/charge".into(),
            status: 201,
            request: Bytes::from_static(b"req"),
            response: Bytes::from_static(b"resp"),
        }
    }

    #[tokio::test]
    async fn test_record_stores_transaction() {
        let store = MemoryStore::new();
        let recorder = Recorder::new(Arc::new(store.clone()));

        let tx = recorder.record(&exchange("run-1")).await.unwrap();

        assert_eq!(store.get(&tx.id), Some(tx.clone()));
        assert_eq!(tx.test_run_id, "run-1");
    }

    #[tokio::test]
    async fn test_record_reports_store_failure() {
        let recorder = Recorder::new(Arc::new(FailingStore));
        let err = recorder.record(&exchange("run-1")).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_dispatch_then_drain() {
        let store = MemoryStore::new();
        let recorder = Recorder::new(Arc::new(store.clone()));

        for _ in 0..20 {
            recorder.dispatch(exchange("run-2"));
        }
        assert!(recorder.drain(Duration::from_secs(5)).await);

        assert_eq!(store.len(), 20);
        assert_eq!(recorder.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let recorder = Recorder::new(Arc::new(FailingStore));
        recorder.dispatch(exchange("run-3"));
        assert!(recorder.drain(Duration::from_secs(5)).await);
    }
}
