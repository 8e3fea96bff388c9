//! File record queries.
//!
//! Most queries operate on the live view (`is_deleted = false`); trash
//! operations explicitly opt into the all view.

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{escape_like, Database};
use crate::errors::GatewayResult;
use crate::models::FileRecord;

const FILE_COLUMNS: &str = "id, user_id, storage_key, size_bytes, mime_type, checksum_sha256, \
     uploaded_at, modified_at, is_deleted, deleted_at, original_key, trash_name";

impl Database {
    pub async fn create_file(
        &self,
        user_id: i64,
        storage_key: &str,
        size_bytes: i64,
        mime_type: &str,
        checksum_sha256: &str,
    ) -> GatewayResult<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            INSERT INTO files (user_id, storage_key, size_bytes, mime_type, checksum_sha256)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {FILE_COLUMNS}
            "#,
        ))
        .bind(user_id)
        .bind(storage_key)
        .bind(size_bytes)
        .bind(mime_type)
        .bind(checksum_sha256)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert a record duplicating another file's metadata and tag set, in
    /// one transaction. Used by copy so the duplicate never appears without
    /// its tags.
    pub async fn create_file_copy(
        &self,
        src_file_id: i64,
        user_id: i64,
        storage_key: &str,
        size_bytes: i64,
        mime_type: &str,
        checksum_sha256: &str,
    ) -> GatewayResult<FileRecord> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            INSERT INTO files (user_id, storage_key, size_bytes, mime_type, checksum_sha256)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {FILE_COLUMNS}
            "#,
        ))
        .bind(user_id)
        .bind(storage_key)
        .bind(size_bytes)
        .bind(mime_type)
        .bind(checksum_sha256)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO file_tags (file_id, tag_id)
             SELECT $2, tag_id FROM file_tags WHERE file_id = $1",
        )
        .bind(src_file_id)
        .bind(record.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    /// All-view lookup by primary key.
    pub async fn get_file_by_id(&self, id: i64) -> GatewayResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Live-view lookup by exact storage key.
    pub async fn get_file_by_key(
        &self,
        user_id: i64,
        storage_key: &str,
    ) -> GatewayResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE user_id = $1 AND storage_key = $2 AND NOT is_deleted",
        ))
        .bind(user_id)
        .bind(storage_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn file_exists(&self, user_id: i64, storage_key: &str) -> GatewayResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(
                 SELECT 1 FROM files
                 WHERE user_id = $1 AND storage_key = $2 AND NOT is_deleted
             ) AS found",
        )
        .bind(user_id)
        .bind(storage_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<bool, _>("found"))
    }

    /// A folder exists when any live file sits under its prefix.
    pub async fn folder_exists(&self, user_id: i64, prefix: &str) -> GatewayResult<bool> {
        let pattern = format!("{}%", escape_like(prefix));
        let row = sqlx::query(
            "SELECT EXISTS(
                 SELECT 1 FROM files
                 WHERE user_id = $1 AND storage_key LIKE $2 AND NOT is_deleted
             ) AS found",
        )
        .bind(user_id)
        .bind(pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<bool, _>("found"))
    }

    /// Live records whose key starts with the prefix, ordered by key.
    pub async fn list_files_with_prefix(
        &self,
        user_id: i64,
        prefix: &str,
    ) -> GatewayResult<Vec<FileRecord>> {
        let pattern = format!("{}%", escape_like(prefix));
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE user_id = $1 AND storage_key LIKE $2 AND NOT is_deleted
             ORDER BY storage_key",
        ))
        .bind(user_id)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Most recent modification under a prefix, live view. Used for
    /// collection timestamps.
    pub async fn latest_modified_under_prefix(
        &self,
        user_id: i64,
        prefix: &str,
    ) -> GatewayResult<Option<DateTime<Utc>>> {
        let pattern = format!("{}%", escape_like(prefix));
        let row = sqlx::query(
            "SELECT MAX(modified_at) AS latest FROM files
             WHERE user_id = $1 AND storage_key LIKE $2 AND NOT is_deleted",
        )
        .bind(user_id)
        .bind(pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<DateTime<Utc>>, _>("latest"))
    }

    /// All storage keys for a user across both views. Used by the orphan
    /// reaper to decide which blobs are still referenced.
    pub async fn list_all_keys(&self, user_id: i64) -> GatewayResult<Vec<String>> {
        let rows = sqlx::query("SELECT storage_key FROM files WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("storage_key"))
            .collect())
    }

    pub async fn list_trash_files(&self, user_id: i64) -> GatewayResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE user_id = $1 AND is_deleted
             ORDER BY deleted_at DESC",
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_trash_file_by_name(
        &self,
        user_id: i64,
        trash_name: &str,
    ) -> GatewayResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE user_id = $1 AND is_deleted AND trash_name = $2",
        ))
        .bind(user_id)
        .bind(trash_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Trashed records past the retention cutoff, oldest first, across all
    /// users. Feeds the purge job.
    pub async fn list_expired_trash(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> GatewayResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE is_deleted AND deleted_at <= $1
             ORDER BY deleted_at ASC
             LIMIT $2",
        ))
        .bind(cutoff)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Total bytes for a user, trash included: trashed files keep counting
    /// against quota until permanently deleted.
    pub async fn sum_file_sizes(&self, user_id: i64) -> GatewayResult<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(size_bytes), 0)::BIGINT AS total
             FROM files WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("total"))
    }

    pub async fn update_file_key(&self, id: i64, new_key: &str) -> GatewayResult<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "UPDATE files SET storage_key = $2, modified_at = NOW()
             WHERE id = $1
             RETURNING {FILE_COLUMNS}",
        ))
        .bind(id)
        .bind(new_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Swing a record to freshly uploaded content in one statement. Readers
    /// see either the old key/metadata or the new, never a mix.
    pub async fn update_file_content(
        &self,
        id: i64,
        new_key: &str,
        size_bytes: i64,
        mime_type: &str,
        checksum_sha256: &str,
    ) -> GatewayResult<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "UPDATE files
             SET storage_key = $2, size_bytes = $3, mime_type = $4,
                 checksum_sha256 = $5, modified_at = NOW()
             WHERE id = $1
             RETURNING {FILE_COLUMNS}",
        ))
        .bind(id)
        .bind(new_key)
        .bind(size_bytes)
        .bind(mime_type)
        .bind(checksum_sha256)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Flip a live record into the trash view. `original_key` captures the
    /// pre-update key (SET expressions see the old row), while the record
    /// moves onto the trash storage key, freeing the visible key for new
    /// uploads.
    pub async fn mark_file_deleted(
        &self,
        id: i64,
        trash_name: &str,
        trash_key: &str,
    ) -> GatewayResult<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "UPDATE files
             SET is_deleted = TRUE, deleted_at = NOW(), original_key = storage_key,
                 trash_name = $2, storage_key = $3, modified_at = NOW()
             WHERE id = $1 AND NOT is_deleted
             RETURNING {FILE_COLUMNS}",
        ))
        .bind(id)
        .bind(trash_name)
        .bind(trash_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Bring a trashed record back to the live view at `storage_key`, in one
    /// statement. Key and deletion flag flip together so the live-unique
    /// index never sees the record at a conflicting key, not even
    /// transiently.
    pub async fn restore_file_record(
        &self,
        id: i64,
        storage_key: &str,
    ) -> GatewayResult<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "UPDATE files
             SET is_deleted = FALSE, deleted_at = NULL, original_key = '',
                 trash_name = '', storage_key = $2, modified_at = NOW()
             WHERE id = $1
             RETURNING {FILE_COLUMNS}",
        ))
        .bind(id)
        .bind(storage_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Remove a record and release its quota in one transaction. Returns the
    /// removed record so the caller can clean up the blob afterwards.
    pub async fn delete_file_and_release_quota(&self, id: i64) -> GatewayResult<FileRecord> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "DELETE FROM files WHERE id = $1 RETURNING {FILE_COLUMNS}",
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE user_quotas SET used_bytes = GREATEST(used_bytes - $2, 0)
             WHERE user_id = $1",
        )
        .bind(record.user_id)
        .bind(record.size_bytes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(record)
    }
}
