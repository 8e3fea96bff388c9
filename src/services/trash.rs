//! Two-stage deletion.
//!
//! Soft delete flips a record into the trash view without touching the blob;
//! restore brings it back (renaming on conflict); permanent delete is the
//! only point where bytes are released. Trash retention is enforced by
//! `purge_expired`, driven from the scheduler and the CLI.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::db::Database;
use crate::errors::{GatewayError, GatewayResult};
use crate::metadata::enforce_owner_prefix;
use crate::models::FileRecord;
use crate::services::file_engine::FileEngine;
use crate::storage::BlobStore;

/// Attempts at generating a unique trash name before giving up. Microsecond
/// timestamps make a second collision all but impossible.
const TRASH_NAME_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct TrashEngine {
    db: Database,
    blob: Arc<dyn BlobStore>,
    files: FileEngine,
    retention_days: i64,
}

impl TrashEngine {
    pub fn new(
        db: Database,
        blob: Arc<dyn BlobStore>,
        files: FileEngine,
        retention_days: i64,
    ) -> Self {
        Self {
            db,
            blob,
            files,
            retention_days,
        }
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    /// Move a file to trash.
    ///
    /// The blob relocates to a per-user trash key so the visible key is free
    /// for new uploads while the file sits in the trash; `original_key`
    /// remembers where restore should put it back. Quota is unchanged —
    /// trash still counts.
    pub async fn soft_delete(&self, file_id: i64) -> GatewayResult<FileRecord> {
        let record = self
            .db
            .get_file_by_id(file_id)
            .await?
            .filter(|r| !r.is_deleted)
            .ok_or(GatewayError::NotFound)?;

        let mut last_err = None;
        for _ in 0..TRASH_NAME_ATTEMPTS {
            let trash_name = generate_trash_name(&record.storage_key, Utc::now());
            let trash_key = trash_storage_key(record.user_id, &trash_name);

            self.blob
                .copy(&record.storage_key, &trash_key)
                .await
                .map_err(GatewayError::Transient)?;

            match self
                .db
                .mark_file_deleted(file_id, &trash_name, &trash_key)
                .await
            {
                Ok(updated) => {
                    // Source blob goes last, best-effort; a failure leaves
                    // an orphan for the reaper.
                    if let Err(e) = self.blob.delete(&record.storage_key).await {
                        warn!(
                            "Failed to delete trashed file source (orphaned): {}: {}",
                            record.storage_key, e
                        );
                    }

                    info!(
                        "File moved to trash: {} -> {} (id: {})",
                        record.storage_key, trash_name, file_id
                    );
                    return Ok(updated);
                }
                Err(GatewayError::Conflict(msg)) => {
                    self.blob.rollback(&trash_key).await;
                    warn!("Trash name collision, regenerating: {}", msg);
                    last_err = Some(GatewayError::Conflict(msg));
                }
                Err(e) => {
                    self.blob.rollback(&trash_key).await;
                    return Err(e);
                }
            }
        }

        Err(last_err.unwrap_or(GatewayError::NotFound))
    }

    /// Restore a trashed file, to its original key or to `dest_key`.
    ///
    /// A live file already holding the target key forces a rename to
    /// `"{stem} (restored){ext}"` in the same parent. The parent folder
    /// marker is recreated when the parent would otherwise not exist.
    pub async fn restore(
        &self,
        file_id: i64,
        dest_key: Option<&str>,
    ) -> GatewayResult<FileRecord> {
        let record = self
            .db
            .get_file_by_id(file_id)
            .await?
            .filter(|r| r.is_deleted)
            .ok_or(GatewayError::NotFound)?;

        let mut target = dest_key.unwrap_or(&record.original_key).to_string();
        enforce_owner_prefix(record.user_id, &target)?;

        if self.db.file_exists(record.user_id, &target).await? {
            target = restored_variant(&target);
            info!("Restore conflict, renamed to: {}", target);
        }

        self.files
            .ensure_parent_marker(record.user_id, &target)
            .await?;

        let trash_name = record.trash_name.clone();
        let current_key = record.storage_key.clone();

        // The record goes live already pointing at the target key, so the
        // blob has to be there first. Same copy/commit/compensate envelope
        // as a file move, fused with the un-delete.
        let restored = if current_key != target {
            self.blob
                .copy(&current_key, &target)
                .await
                .map_err(GatewayError::Transient)?;

            let restored = match self.db.restore_file_record(file_id, &target).await {
                Ok(restored) => restored,
                Err(e) => {
                    self.blob.rollback(&target).await;
                    return Err(e);
                }
            };

            // The record already reflects the target; a failed source
            // delete leaves an orphan, not an error.
            if let Err(e) = self.blob.delete(&current_key).await {
                warn!(
                    "Failed to delete restored file source (orphaned): {}: {}",
                    current_key, e
                );
            }

            restored
        } else {
            // Blob already sits at the target key; only the record flips.
            self.db.restore_file_record(file_id, &target).await?
        };

        info!(
            "File restored: {} -> {} (id: {})",
            trash_name, target, file_id
        );
        Ok(restored)
    }

    /// Remove a trashed file for good: record and quota in one transaction,
    /// then the blob best-effort.
    pub async fn permanent_delete(&self, file_id: i64) -> GatewayResult<FileRecord> {
        let record = self
            .db
            .get_file_by_id(file_id)
            .await?
            .filter(|r| r.is_deleted)
            .ok_or(GatewayError::NotFound)?;

        let removed = self.db.delete_file_and_release_quota(record.id).await?;

        if let Err(e) = self.blob.delete(&removed.storage_key).await {
            warn!(
                "Failed to delete blob after permanent delete (orphaned): {}: {}",
                removed.storage_key, e
            );
        }

        info!(
            "File permanently deleted: {} (id: {}, size: {})",
            removed.trash_name, file_id, removed.size_bytes
        );
        Ok(removed)
    }

    /// Trashed files, newest deletion first.
    pub async fn list_trash(&self, user_id: i64) -> GatewayResult<Vec<FileRecord>> {
        self.db.list_trash_files(user_id).await
    }

    /// Trash lookup by original display name. The first match wins when two
    /// trashed files shared a name.
    pub async fn find_by_original_name(
        &self,
        user_id: i64,
        name: &str,
    ) -> GatewayResult<Option<FileRecord>> {
        let trashed = self.db.list_trash_files(user_id).await?;
        Ok(trashed
            .into_iter()
            .find(|record| record.original_filename() == name))
    }

    /// Permanently delete everything in the user's trash. Stops and
    /// propagates on the first failure; already-deleted items stay deleted.
    pub async fn empty_trash(&self, user_id: i64) -> GatewayResult<usize> {
        let trashed = self.db.list_trash_files(user_id).await?;

        let mut count = 0;
        for record in &trashed {
            self.permanent_delete(record.id).await?;
            count += 1;
        }

        info!("Trash emptied for user {}: {} files deleted", user_id, count);
        Ok(count)
    }

    /// Purge trashed files older than the retention window, oldest first, up
    /// to `batch_size` items. Aborts on the first failure; re-running
    /// resumes where it stopped.
    pub async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> GatewayResult<usize> {
        let cutoff = now - Duration::days(self.retention_days);
        let expired = self.db.list_expired_trash(cutoff, batch_size).await?;

        let mut count = 0;
        for record in &expired {
            self.permanent_delete(record.id).await?;
            count += 1;
        }

        if count > 0 {
            info!("Purged {} expired files from trash", count);
        }
        Ok(count)
    }

    /// Records the next purge run would remove, without removing them.
    pub async fn list_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> GatewayResult<Vec<FileRecord>> {
        let cutoff = now - Duration::days(self.retention_days);
        self.db.list_expired_trash(cutoff, batch_size).await
    }
}

/// Unique trash name for a storage key: `{stem}__{timestamp}{ext}` with
/// microsecond precision.
pub fn generate_trash_name(storage_key: &str, now: DateTime<Utc>) -> String {
    let name = storage_key.rsplit('/').next().unwrap_or(storage_key);
    let (stem, ext) = split_stem(name);
    let timestamp = now.format("%Y%m%dT%H%M%S%6f");
    format!("{}__{}{}", stem, timestamp, ext)
}

/// Storage key a trashed blob parks at: a hidden per-user segment keyed by
/// the unique trash name, out of the way of live uploads.
pub fn trash_storage_key(user_id: i64, trash_name: &str) -> String {
    format!("{}/.trash/{}", user_id, trash_name)
}

/// `"{stem} (restored){ext}"` variant of a storage key, in the same parent.
fn restored_variant(storage_key: &str) -> String {
    match storage_key.rsplit_once('/') {
        Some((parent, name)) => {
            let (stem, ext) = split_stem(name);
            format!("{}/{} (restored){}", parent, stem, ext)
        }
        None => {
            let (stem, ext) = split_stem(storage_key);
            format!("{} (restored){}", stem, ext)
        }
    }
}

/// Split a filename into stem and extension (dot included). Dotfiles like
/// `.folder` count as all stem, matching `Path::file_stem`.
fn split_stem(name: &str) -> (&str, String) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
        _ => (name, String::new()),
    }
}
