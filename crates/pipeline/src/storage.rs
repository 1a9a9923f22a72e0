//! Durable blob storage for raw invoice documents
//!
//! Blobs are keyed by tenant/client/time-prefixed filename and written
//! once: a write to an existing path fails instead of clobbering it.

use std::path::PathBuf;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// Storage backend trait for different blob store implementations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write data at the given path. Fails if the path already exists.
    async fn put(&self, path: &str, data: &[u8]) -> PipelineResult<()>;

    /// Read data from the given path.
    async fn get(&self, path: &str) -> PipelineResult<Vec<u8>>;

    /// Check whether a blob exists at the given path.
    async fn exists(&self, path: &str) -> PipelineResult<bool>;
}

/// Build the canonical blob path for an invoice document.
///
/// `invoices/{firm}/{client}/{unix_millis}_{filename}`. The time-ordered
/// prefix avoids collisions between same-named files from one client.
pub fn invoice_blob_path(firm_id: Uuid, client_id: Uuid, file_name: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("invoices/{firm_id}/{client_id}/{millis}_{file_name}")
}

/// Filesystem storage backend rooted at a base directory.
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn put(&self, path: &str, data: &[u8]) -> PipelineResult<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Storage(format!("create {}: {}", parent.display(), e)))?;
        }

        // create_new is the non-overwriting guarantee: an existing blob at
        // this path is an error, never a silent replace.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
            .map_err(|e| PipelineError::Storage(format!("open {}: {}", full.display(), e)))?;

        file.write_all(data)
            .await
            .map_err(|e| PipelineError::Storage(format!("write {}: {}", full.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| PipelineError::Storage(format!("flush {}: {}", full.display(), e)))?;

        Ok(())
    }

    async fn get(&self, path: &str) -> PipelineResult<Vec<u8>> {
        let full = self.full_path(path);
        fs::read(&full)
            .await
            .map_err(|e| PipelineError::Storage(format!("read {}: {}", full.display(), e)))
    }

    async fn exists(&self, path: &str) -> PipelineResult<bool> {
        Ok(fs::try_exists(self.full_path(path)).await.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());

        backend.put("invoices/a/b/1_test.pdf", b"content").await.unwrap();
        let read = backend.get("invoices/a/b/1_test.pdf").await.unwrap();
        assert_eq!(read, b"content");
        assert!(backend.exists("invoices/a/b/1_test.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn put_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());

        backend.put("invoices/x.pdf", b"first").await.unwrap();
        let second = backend.put("invoices/x.pdf", b"second").await;
        assert!(second.is_err());

        // Original bytes untouched.
        assert_eq!(backend.get("invoices/x.pdf").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn get_missing_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        assert!(backend.get("nope.pdf").await.is_err());
        assert!(!backend.exists("nope.pdf").await.unwrap());
    }

    #[test]
    fn blob_path_is_namespaced() {
        let firm = Uuid::new_v4();
        let client = Uuid::new_v4();
        let path = invoice_blob_path(firm, client, "fatura.pdf");
        assert!(path.starts_with(&format!("invoices/{firm}/{client}/")));
        assert!(path.ends_with("_fatura.pdf"));
    }
}
