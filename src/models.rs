use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An authenticated account. Storage keys are namespaced by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
}

/// A file stored in the blob backend.
///
/// `storage_key` follows the pattern `{user_id}/folder/file.ext` and doubles
/// as the hierarchical organization structure; there is no folder table.
/// Trash attributes (`deleted_at`, `original_key`, `trash_name`) are only
/// meaningful while `is_deleted` is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub user_id: i64,
    pub storage_key: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub checksum_sha256: String,
    pub uploaded_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub original_key: String,
    pub trash_name: String,
}

impl FileRecord {
    /// Filename component of the current storage key.
    pub fn filename(&self) -> &str {
        basename(&self.storage_key)
    }

    /// Filename the file had before it was moved to trash.
    pub fn original_filename(&self) -> &str {
        basename(&self.original_key)
    }
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// User-defined tag, scoped per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tag {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// Storage quota for a user. Usage includes files in trash.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserQuota {
    pub user_id: i64,
    pub quota_bytes: i64,
    pub used_bytes: i64,
}

impl UserQuota {
    pub fn available_bytes(&self) -> i64 {
        (self.quota_bytes - self.used_bytes).max(0)
    }

    pub fn has_space_for(&self, size_bytes: i64) -> bool {
        self.used_bytes + size_bytes <= self.quota_bytes
    }
}

/// Active WebDAV session, used to enforce per-user connection limits.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DavSession {
    pub id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
