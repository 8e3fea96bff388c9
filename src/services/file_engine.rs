//! File mutation protocols.
//!
//! The blob store is not part of the metadata transaction, so every mutator
//! follows the same envelope: reserve quota, write the blob, commit the
//! record, and compensate (roll back the blob, release the reservation) when
//! the commit fails. The blob store is authoritative for bytes; the metadata
//! store is authoritative for visibility.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::Database;
use crate::errors::{GatewayError, GatewayResult};
use crate::metadata::{enforce_owner_prefix, sha256_hex, sniff_mime};
use crate::models::FileRecord;
use crate::services::quota::QuotaEngine;
use crate::storage::BlobStore;

/// Marker file that keeps an otherwise-empty folder visible.
pub const FOLDER_MARKER_NAME: &str = ".folder";

/// Names hidden from directory listings: the folder marker plus the macOS
/// metadata droppings Finder leaves behind.
pub fn is_hidden_name(name: &str) -> bool {
    name == FOLDER_MARKER_NAME || name.starts_with(".DS_Store") || name.starts_with("._")
}

/// A direct child of a folder, as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_folder: bool,
}

#[derive(Clone)]
pub struct FileEngine {
    db: Database,
    blob: Arc<dyn BlobStore>,
    quota: QuotaEngine,
}

impl FileEngine {
    pub fn new(db: Database, blob: Arc<dyn BlobStore>, quota: QuotaEngine) -> Self {
        Self { db, blob, quota }
    }

    pub fn quota(&self) -> &QuotaEngine {
        &self.quota
    }

    pub fn blob(&self) -> &Arc<dyn BlobStore> {
        &self.blob
    }

    /// Upload a new file.
    ///
    /// Quota is reserved before the blob is written; the record insert is
    /// the commit point. The backend may hand back a suffixed key on
    /// collision, and that returned key is what the record stores.
    pub async fn upload(
        &self,
        user_id: i64,
        storage_key: &str,
        content: &[u8],
    ) -> GatewayResult<FileRecord> {
        enforce_owner_prefix(user_id, storage_key)?;

        if self.db.file_exists(user_id, storage_key).await? {
            return Err(GatewayError::Conflict(format!(
                "file already exists: {}",
                storage_key
            )));
        }

        let filename = storage_key.rsplit('/').next().unwrap_or(storage_key);
        let size = content.len() as i64;
        let checksum = sha256_hex(content);
        let mime_type = sniff_mime(filename);

        self.quota.reserve(user_id, size).await?;

        let actual_key = match self.blob.put(storage_key, content).await {
            Ok(key) => key,
            Err(e) => {
                if let Err(release_err) = self.quota.release(user_id, size).await {
                    warn!("Failed to release reservation after put failure: {}", release_err);
                }
                return Err(GatewayError::Transient(e));
            }
        };

        match self
            .db
            .create_file(user_id, &actual_key, size, &mime_type, &checksum)
            .await
        {
            Ok(record) => {
                info!(
                    "Uploaded file: {} ({} bytes, id: {})",
                    actual_key, size, record.id
                );
                Ok(record)
            }
            Err(e) => {
                self.blob.rollback(&actual_key).await;
                if let Err(release_err) = self.quota.release(user_id, size).await {
                    warn!("Failed to release reservation after insert failure: {}", release_err);
                }
                Err(e)
            }
        }
    }

    /// Replace the content of an existing file atomically.
    ///
    /// New content goes to a `.tmp` sibling key first; the record swings over
    /// in a single update, so readers see the old file until the new one is
    /// durable. Once committed, the content is moved back onto the canonical
    /// key best-effort so the path keeps resolving.
    pub async fn overwrite(&self, file_id: i64, content: &[u8]) -> GatewayResult<FileRecord> {
        let record = self
            .db
            .get_file_by_id(file_id)
            .await?
            .filter(|r| !r.is_deleted)
            .ok_or(GatewayError::NotFound)?;

        let old_key = record.storage_key.clone();
        let old_size = record.size_bytes;

        let new_size = content.len() as i64;
        let checksum = sha256_hex(content);
        let mime_type = sniff_mime(record.filename());

        self.quota.adjust(record.user_id, old_size, new_size).await?;

        let temp_key = format!("{}.tmp", old_key);
        let actual_temp = match self.blob.put(&temp_key, content).await {
            Ok(key) => key,
            Err(e) => {
                self.reverse_adjust(record.user_id, old_size, new_size).await;
                return Err(GatewayError::Transient(e));
            }
        };

        let updated = match self
            .db
            .update_file_content(file_id, &actual_temp, new_size, &mime_type, &checksum)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                self.blob.rollback(&actual_temp).await;
                self.reverse_adjust(record.user_id, old_size, new_size).await;
                return Err(e);
            }
        };

        // New content is durable and visible; everything from here on is
        // best-effort cleanup. Swing the blob back onto the canonical key so
        // the path keeps resolving; the record stays on the temp key only if
        // that fails, and the reaper handles the leftovers.
        let updated = match self.restore_canonical_key(&updated, &old_key).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(
                    "Failed to restore canonical key {} (content stays at {}): {}",
                    old_key, actual_temp, e
                );
                return Ok(updated);
            }
        };

        info!(
            "Updated file content: {} ({} bytes)",
            updated.storage_key, new_size
        );
        Ok(updated)
    }

    /// Move freshly committed content from its temp key back to the
    /// canonical key. The copy replaces the superseded old blob in place.
    async fn restore_canonical_key(
        &self,
        record: &FileRecord,
        canonical_key: &str,
    ) -> GatewayResult<FileRecord> {
        let temp_key = record.storage_key.clone();

        self.blob
            .copy(&temp_key, canonical_key)
            .await
            .map_err(GatewayError::Transient)?;

        let updated = self.db.update_file_key(record.id, canonical_key).await?;

        if let Err(e) = self.blob.delete(&temp_key).await {
            warn!("Failed to delete temp content (orphaned): {}: {}", temp_key, e);
        }

        Ok(updated)
    }

    async fn reverse_adjust(&self, user_id: i64, old_size: i64, new_size: i64) {
        if let Err(e) = self.quota.adjust(user_id, new_size, old_size).await {
            warn!("Failed to reverse quota adjustment for user {}: {}", user_id, e);
        }
    }

    /// Copy a file to a new key, duplicating metadata and tags.
    pub async fn copy(
        &self,
        user_id: i64,
        src_key: &str,
        dst_key: &str,
    ) -> GatewayResult<FileRecord> {
        enforce_owner_prefix(user_id, dst_key)?;

        let src = self
            .db
            .get_file_by_key(user_id, src_key)
            .await?
            .ok_or(GatewayError::NotFound)?;

        if self.db.file_exists(user_id, dst_key).await? {
            return Err(GatewayError::Conflict(format!(
                "file already exists: {}",
                dst_key
            )));
        }

        self.quota.reserve(user_id, src.size_bytes).await?;

        if let Err(e) = self.blob.copy(&src.storage_key, dst_key).await {
            if let Err(release_err) = self.quota.release(user_id, src.size_bytes).await {
                warn!("Failed to release reservation after copy failure: {}", release_err);
            }
            return Err(GatewayError::Transient(e));
        }

        match self
            .db
            .create_file_copy(
                src.id,
                user_id,
                dst_key,
                src.size_bytes,
                &src.mime_type,
                &src.checksum_sha256,
            )
            .await
        {
            Ok(record) => {
                info!("Copied file: {} -> {} (id: {})", src_key, dst_key, record.id);
                Ok(record)
            }
            Err(e) => {
                self.blob.rollback(dst_key).await;
                if let Err(release_err) = self.quota.release(user_id, src.size_bytes).await {
                    warn!("Failed to release reservation after insert failure: {}", release_err);
                }
                Err(e)
            }
        }
    }

    /// Move a file to a new key.
    ///
    /// Copy-then-delete under the hood; the record update is the commit
    /// point, so the caller observes an atomic move. Quota is untouched.
    pub async fn move_file(
        &self,
        user_id: i64,
        src_key: &str,
        dst_key: &str,
    ) -> GatewayResult<FileRecord> {
        enforce_owner_prefix(user_id, dst_key)?;

        let record = self
            .db
            .get_file_by_key(user_id, src_key)
            .await?
            .ok_or(GatewayError::NotFound)?;

        if self.db.file_exists(user_id, dst_key).await? {
            return Err(GatewayError::Conflict(format!(
                "file already exists: {}",
                dst_key
            )));
        }

        self.blob
            .copy(&record.storage_key, dst_key)
            .await
            .map_err(GatewayError::Transient)?;

        let updated = match self.db.update_file_key(record.id, dst_key).await {
            Ok(updated) => updated,
            Err(e) => {
                self.blob.rollback(dst_key).await;
                return Err(e);
            }
        };

        // The record already points at the destination; a failed source
        // delete leaves an orphan, not an error.
        if let Err(e) = self.blob.delete(&record.storage_key).await {
            warn!(
                "Failed to delete moved file source (orphaned): {}: {}",
                record.storage_key, e
            );
        }

        info!("Moved file: {} -> {}", src_key, dst_key);
        Ok(updated)
    }

    /// Move every live file under `src_prefix` to `dst_prefix`.
    ///
    /// Per-file moves with no cross-file rollback: the first failure aborts
    /// the walk, leaving earlier files at the destination. Returns the
    /// number of files moved.
    pub async fn move_folder(
        &self,
        user_id: i64,
        src_prefix: &str,
        dst_prefix: &str,
    ) -> GatewayResult<usize> {
        enforce_owner_prefix(user_id, dst_prefix)?;

        let src_prefix = format!("{}/", src_prefix.trim_end_matches('/'));
        let dst_prefix = format!("{}/", dst_prefix.trim_end_matches('/'));

        let records = self.db.list_files_with_prefix(user_id, &src_prefix).await?;

        let mut moved = 0;
        for record in &records {
            let relative = &record.storage_key[src_prefix.len()..];
            let new_key = format!("{}{}", dst_prefix, relative);

            if let Err(e) = self.move_file(user_id, &record.storage_key, &new_key).await {
                warn!(
                    "Folder move aborted at {} after {} files: {}",
                    record.storage_key, moved, e
                );
                return Err(e);
            }
            moved += 1;
        }

        info!("Moved {} files: {} -> {}", moved, src_prefix, dst_prefix);
        Ok(moved)
    }

    /// Hard-delete a file: record and quota go in one transaction, then the
    /// blob is removed best-effort.
    pub async fn delete_file(&self, file_id: i64) -> GatewayResult<FileRecord> {
        let record = self.db.delete_file_and_release_quota(file_id).await?;

        if let Err(e) = self.blob.delete(&record.storage_key).await {
            warn!(
                "Failed to delete blob after record removal (orphaned): {}: {}",
                record.storage_key, e
            );
        }

        info!("Deleted file: {} (id: {})", record.storage_key, file_id);
        Ok(record)
    }

    /// Recursively hard-delete everything under a folder prefix. Folder
    /// contents do not pass through the trash.
    pub async fn delete_folder(&self, user_id: i64, prefix: &str) -> GatewayResult<usize> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let records = self.db.list_files_with_prefix(user_id, &prefix).await?;

        let mut deleted = 0;
        for record in &records {
            self.delete_file(record.id).await?;
            deleted += 1;
        }

        info!("Deleted folder {} ({} files)", prefix, deleted);
        Ok(deleted)
    }

    /// Live records under a folder prefix (flat, recursive).
    pub async fn list_directory(
        &self,
        user_id: i64,
        prefix: &str,
    ) -> GatewayResult<Vec<FileRecord>> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.db.list_files_with_prefix(user_id, &prefix).await
    }

    /// Direct children of a folder, hidden names filtered out.
    pub async fn direct_children(
        &self,
        user_id: i64,
        prefix: &str,
    ) -> GatewayResult<Vec<DirEntry>> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let records = self.db.list_files_with_prefix(user_id, &prefix).await?;
        let keys: Vec<String> = records.into_iter().map(|r| r.storage_key).collect();
        Ok(group_direct_children(&keys, &prefix))
    }

    /// Create the hidden `.folder` marker for the parent of `storage_key`
    /// when the parent folder would otherwise not exist. No-op at the user
    /// root.
    pub async fn ensure_parent_marker(
        &self,
        user_id: i64,
        storage_key: &str,
    ) -> GatewayResult<()> {
        let parent = match storage_key.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => return Ok(()),
        };

        if parent == user_id.to_string() {
            return Ok(());
        }

        let marker_key = format!("{}/{}", parent, FOLDER_MARKER_NAME);
        if self.db.file_exists(user_id, &marker_key).await? {
            return Ok(());
        }

        if self.db.folder_exists(user_id, &format!("{}/", parent)).await? {
            return Ok(());
        }

        debug!("Creating folder marker: {}", marker_key);
        self.upload(user_id, &marker_key, b"").await?;
        Ok(())
    }
}

/// Group flat keys under `prefix` into direct children: the first path
/// component after the prefix, marked as a folder when more components
/// follow. Hidden names are dropped.
pub fn group_direct_children(keys: &[String], prefix: &str) -> Vec<DirEntry> {
    let mut entries: Vec<DirEntry> = Vec::new();

    for key in keys {
        let Some(remainder) = key.strip_prefix(prefix) else {
            continue;
        };
        if remainder.is_empty() {
            continue;
        }

        let (name, is_folder) = match remainder.split_once('/') {
            Some((first, _)) => (first, true),
            None => (remainder, false),
        };

        if is_hidden_name(name) {
            continue;
        }

        match entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.is_folder |= is_folder,
            None => entries.push(DirEntry {
                name: name.to_string(),
                is_folder,
            }),
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hidden_name() {
        assert!(is_hidden_name(".folder"));
        assert!(is_hidden_name(".DS_Store"));
        assert!(is_hidden_name(".DS_Store_backup"));
        assert!(is_hidden_name("._resource_fork"));
        assert!(!is_hidden_name("report.pdf"));
        assert!(!is_hidden_name(".hidden_but_allowed"));
    }

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_group_direct_children_files_and_folders() {
        let keys = keys(&[
            "7/docs/a.txt",
            "7/docs/reports/q1.pdf",
            "7/docs/reports/q2.pdf",
            "7/docs/z.txt",
        ]);
        let entries = group_direct_children(&keys, "7/docs/");
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "a.txt".to_string(), is_folder: false },
                DirEntry { name: "reports".to_string(), is_folder: true },
                DirEntry { name: "z.txt".to_string(), is_folder: false },
            ]
        );
    }

    #[test]
    fn test_group_direct_children_filters_hidden() {
        let keys = keys(&[
            "7/docs/.folder",
            "7/docs/.DS_Store",
            "7/docs/._shadow",
            "7/docs/visible.txt",
            "7/docs/sub/.folder",
        ]);
        let entries = group_direct_children(&keys, "7/docs/");
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "sub".to_string(), is_folder: true },
                DirEntry { name: "visible.txt".to_string(), is_folder: false },
            ]
        );
    }

    #[test]
    fn test_group_direct_children_marker_keeps_empty_folder_visible() {
        // A folder holding only its marker still shows up in the parent.
        let keys = keys(&["7/photos/.folder"]);
        let entries = group_direct_children(&keys, "7/");
        assert_eq!(
            entries,
            vec![DirEntry { name: "photos".to_string(), is_folder: true }]
        );
    }

    #[test]
    fn test_group_direct_children_ignores_foreign_prefix() {
        let keys = keys(&["8/other.txt"]);
        assert!(group_direct_children(&keys, "7/").is_empty());
    }
}
