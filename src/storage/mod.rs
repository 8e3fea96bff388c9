//! Blob storage abstraction.
//!
//! The gateway stores file content in an S3-compatible object store and all
//! visibility metadata in Postgres. This module is the thin contract between
//! the two worlds: engines call `put`/`copy`/`delete` here and use the
//! *returned* key as the record key, because a backend may rename on
//! collision.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

/// Contract over the object store.
///
/// `copy` is an atomic server-side operation. There is no atomic move: the
/// engines copy then delete, and a failed source delete leaves an orphan for
/// the reaper rather than a user-visible error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store content under `key`. Returns the key actually used, which may
    /// carry a collision suffix when `key` is already occupied.
    async fn put(&self, key: &str, content: &[u8]) -> Result<String>;

    /// Fetch the full content.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Fetch `length` bytes starting at `offset`.
    async fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Server-side copy.
    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// All keys under a prefix. Used by the orphan reaper.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Human-readable backend identifier.
    fn storage_type(&self) -> &'static str;

    /// Best-effort delete used when a metadata commit failed after a
    /// successful put. Failure is logged, never propagated; the orphaned
    /// blob is left for the reaper.
    async fn rollback(&self, key: &str) {
        tracing::warn!("Rolling back blob upload, deleting: {}", key);
        if let Err(e) = self.delete(key).await {
            tracing::warn!("Failed to roll back blob {} (orphaned): {}", key, e);
        }
    }
}

/// Derive a collision-free variant of `key` by inserting a short random
/// suffix before the extension.
pub(crate) fn alternative_key(key: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let tag = &suffix[..7];

    match key.rsplit_once('/') {
        Some((dir, name)) => match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{}/{}_{}.{}", dir, stem, tag, ext),
            _ => format!("{}/{}_{}", dir, name, tag),
        },
        None => format!("{}_{}", key, tag),
    }
}

/// Build the configured blob backend.
pub async fn create_blob_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    match config.storage_backend.as_str() {
        "local" => {
            let store = local::LocalBlobStore::new(config.local_storage_path.clone());
            store.initialize().await?;
            tracing::info!(
                "Using local blob storage backend at {}",
                config.local_storage_path
            );
            Ok(Arc::new(store))
        }
        "s3" => {
            #[cfg(feature = "s3")]
            {
                let store = s3::S3BlobStore::new(config).await?;
                tracing::info!("Using S3 blob storage backend (bucket: {})", config.s3_bucket);
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "s3"))]
            {
                Err(anyhow::anyhow!(
                    "S3 support not compiled in. Enable the 's3' feature to use S3 storage."
                ))
            }
        }
        other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternative_key_keeps_directory_and_extension() {
        let alt = alternative_key("7/docs/report.pdf");
        assert!(alt.starts_with("7/docs/report_"));
        assert!(alt.ends_with(".pdf"));
        assert_ne!(alt, "7/docs/report.pdf");
    }

    #[test]
    fn test_alternative_key_without_extension() {
        let alt = alternative_key("7/docs/readme");
        assert!(alt.starts_with("7/docs/readme_"));
        assert!(!alt.contains('.'));
    }

    #[test]
    fn test_alternative_key_hidden_file() {
        // ".folder" has no stem, so the suffix goes at the end.
        let alt = alternative_key("7/docs/.folder");
        assert!(alt.starts_with("7/docs/.folder_"));
    }

    #[test]
    fn test_alternative_keys_differ() {
        assert_ne!(alternative_key("7/a.txt"), alternative_key("7/a.txt"));
    }
}
