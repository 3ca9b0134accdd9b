use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dsc_types::{DiscoveryError, Result};
use tracing::debug;

use crate::security::validate_relative_path;

/// Destination for exported run artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `local_path` under `object_key`.
    async fn upload(&self, local_path: &Path, object_key: &str) -> Result<()>;
}

/// Object store backed by a local directory ("bucket").
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where an object key lands on disk.
    pub fn object_path(&self, object_key: &str) -> PathBuf {
        self.root.join(object_key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, local_path: &Path, object_key: &str) -> Result<()> {
        validate_relative_path(object_key)?;

        let dest = self.object_path(object_key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DiscoveryError::Storage(format!(
                    "Failed to create bucket dir {}: {e}",
                    parent.display()
                ))
            })?;
        }
        tokio::fs::copy(local_path, &dest).await.map_err(|e| {
            DiscoveryError::Storage(format!(
                "Failed to upload {} to {object_key}: {e}",
                local_path.display()
            ))
        })?;

        debug!(key = object_key, "Object uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_copies_under_key() {
        let src = tempfile::tempdir().unwrap();
        let bucket = tempfile::tempdir().unwrap();
        let file = src.path().join("domains.txt");
        std::fs::write(&file, "a.example.com\n").unwrap();

        let store = LocalObjectStore::new(bucket.path());
        store.upload(&file, "ws-1/domains.txt").await.unwrap();

        let uploaded = std::fs::read_to_string(store.object_path("ws-1/domains.txt")).unwrap();
        assert_eq!(uploaded, "a.example.com\n");
    }

    #[tokio::test]
    async fn upload_rejects_escaping_key() {
        let src = tempfile::tempdir().unwrap();
        let bucket = tempfile::tempdir().unwrap();
        let file = src.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();

        let store = LocalObjectStore::new(bucket.path());
        let err = store.upload(&file, "../escape.txt").await.unwrap_err();
        assert!(err.to_string().contains("traversal"));
    }

    #[tokio::test]
    async fn upload_missing_source_fails() {
        let bucket = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(bucket.path());
        let err = store
            .upload(Path::new("/nonexistent/file.txt"), "k/file.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Storage(_)));
    }
}
