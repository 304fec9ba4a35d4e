//! Append-only JSON-lines transaction store.
//!
//! One serialized [`Transaction`] per line. Each insert is flushed before it
//! returns; `close` syncs the file to disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::audit::Transaction;
use crate::store::{StoreError, StoreResult, TransactionStore};

/// Open file plus the length of its last complete line.
struct Appender {
    file: File,
    len: u64,
}

impl Appender {
    /// Append one whole line, or leave the file as it was.
    async fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
        let written = async {
            self.file.write_all(line).await?;
            self.file.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(trunc) = self.file.set_len(self.len).await {
                    tracing::error!(error = %trunc, "Failed to discard partial line");
                }
                Err(e)
            }
        }
    }
}

pub struct JsonlStore {
    path: PathBuf,
    /// `None` once closed.
    appender: Mutex<Option<Appender>>,
}

impl JsonlStore {
    /// Open (or create) the file for appending.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let open_error = |source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(open_error)?;
        let len = file.metadata().await.map_err(open_error)?.len();

        Ok(Self {
            path: path.to_path_buf(),
            appender: Mutex::new(Some(Appender { file, len })),
        })
    }
}

#[async_trait]
impl TransactionStore for JsonlStore {
    async fn insert_one(&self, transaction: &Transaction) -> StoreResult<()> {
        let mut line = serde_json::to_vec(transaction)?;
        line.push(b'\n');

        let mut guard = self.appender.lock().await;
        let appender = guard.as_mut().ok_or(StoreError::Closed)?;
        appender.append(&line).await?;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        let mut guard = self.appender.lock().await;
        if let Some(mut appender) = guard.take() {
            appender.file.flush().await?;
            appender.file.sync_all().await?;
            tracing::info!(path = %self.path.display(), "Transaction store closed");
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "jsonl"
    }
}
