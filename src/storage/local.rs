//! Local filesystem blob backend.
//!
//! Development and test backend with the same contract as the S3 backend,
//! including collision suffixing on put. Keys map directly to paths below
//! the root directory.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use super::{alternative_key, BlobStore};

pub struct LocalBlobStore {
    root_path: String,
}

impl LocalBlobStore {
    pub fn new(root_path: String) -> Self {
        Self { root_path }
    }

    /// Create the root directory if it does not exist yet.
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root_path).await?;
        info!("Ensured blob root directory exists: {}", self.root_path);
        Ok(())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are engine-constructed, but stay defensive about separators.
        if key.is_empty() || key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(anyhow::anyhow!("Invalid blob key: {}", key));
        }
        Ok(Path::new(&self.root_path).join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, content: &[u8]) -> Result<String> {
        let mut actual_key = key.to_string();
        while self.exists(&actual_key).await? {
            actual_key = alternative_key(key);
        }

        let path = self.path_for(&actual_key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;

        debug!("Stored blob: {} ({} bytes)", actual_key, content.len());
        Ok(actual_key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read blob {}: {}", key, e))?;
        Ok(data)
    }

    async fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open blob {}: {}", key, e))?;

        let total = file.metadata().await?.len();
        if offset >= total {
            return Ok(Vec::new());
        }
        let to_read = length.min(total - offset) as usize;

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; to_read];
        file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let src = self.path_for(src_key)?;
        let dst = self.path_for(dst_key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src, &dst)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to copy blob {} -> {}: {}", src_key, dst_key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete blob {}: {}", key, e))?;
        debug!("Deleted blob: {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let root = PathBuf::from(&self.root_path);
        let mut keys = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (LocalBlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().to_string_lossy().to_string());
        store.initialize().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _dir) = store().await;
        let key = store.put("7/docs/a.txt", b"hello").await.unwrap();
        assert_eq!(key, "7/docs/a.txt");
        assert_eq!(store.get(&key).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_put_collision_gets_suffixed_key() {
        let (store, _dir) = store().await;
        let first = store.put("7/a.txt", b"one").await.unwrap();
        let second = store.put("7/a.txt", b"two").await.unwrap();
        assert_eq!(first, "7/a.txt");
        assert_ne!(second, "7/a.txt");
        assert_eq!(store.get(&first).await.unwrap(), b"one");
        assert_eq!(store.get(&second).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_get_range() {
        let (store, _dir) = store().await;
        store.put("7/r.bin", b"0123456789").await.unwrap();
        assert_eq!(store.get_range("7/r.bin", 2, 4).await.unwrap(), b"2345");
        // Range past the end is clamped.
        assert_eq!(store.get_range("7/r.bin", 8, 10).await.unwrap(), b"89");
        assert!(store.get_range("7/r.bin", 20, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_and_delete() {
        let (store, _dir) = store().await;
        store.put("7/src.txt", b"data").await.unwrap();
        store.copy("7/src.txt", "7/dst/copy.txt").await.unwrap();
        assert_eq!(store.get("7/dst/copy.txt").await.unwrap(), b"data");

        store.delete("7/src.txt").await.unwrap();
        assert!(!store.exists("7/src.txt").await.unwrap());
        assert!(store.exists("7/dst/copy.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_rollback_swallows_missing_blob() {
        let (store, _dir) = store().await;
        // Never put; rollback must not panic or error.
        store.rollback("7/ghost.txt").await;
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let (store, _dir) = store().await;
        store.put("7/docs/a.txt", b"a").await.unwrap();
        store.put("7/docs/sub/b.txt", b"b").await.unwrap();
        store.put("8/other.txt", b"c").await.unwrap();

        let keys = store.list_prefix("7/").await.unwrap();
        assert_eq!(keys, vec!["7/docs/a.txt", "7/docs/sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (store, _dir) = store().await;
        assert!(store.get("../outside").await.is_err());
        assert!(store.put("7/../../x", b"x").await.is_err());
    }
}
