//! `DavMetaData` implementations for files and collections.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use dav_server::fs::{DavMetaData, FsError, FsResult};

use crate::models::FileRecord;

/// Metadata for a regular file or a trashed file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    len: u64,
    modified: SystemTime,
    created: SystemTime,
    etag: String,
}

impl FileMeta {
    pub fn from_record(record: &FileRecord) -> Self {
        // A trashed file reports its deletion time as the modification time.
        let modified = record
            .deleted_at
            .filter(|_| record.is_deleted)
            .unwrap_or(record.modified_at);

        Self {
            len: record.size_bytes.max(0) as u64,
            modified: SystemTime::from(modified),
            created: SystemTime::from(record.uploaded_at),
            etag: record.checksum_sha256.clone(),
        }
    }

    /// Metadata for content buffered in a writer before commit.
    pub fn pending(len: u64) -> Self {
        let now = SystemTime::now();
        Self {
            len,
            modified: now,
            created: now,
            etag: String::new(),
        }
    }
}

impl DavMetaData for FileMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        false
    }

    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.created)
    }

    fn etag(&self) -> Option<String> {
        if self.etag.is_empty() {
            None
        } else {
            // The content checksum; the frontend adds quoting.
            Some(self.etag.clone())
        }
    }
}

/// Metadata for the root, folders and the trash root.
///
/// Collections are implicit, so there is no stored creation time and no
/// stable ETag.
#[derive(Debug, Clone)]
pub struct DirMeta {
    modified: SystemTime,
}

impl DirMeta {
    pub fn new(modified: Option<DateTime<Utc>>) -> Self {
        Self {
            modified: modified.map(SystemTime::from).unwrap_or_else(SystemTime::now),
        }
    }
}

impl DavMetaData for DirMeta {
    fn len(&self) -> u64 {
        0
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        true
    }

    fn created(&self) -> FsResult<SystemTime> {
        // Implicit collections have no recorded creation time.
        Ok(UNIX_EPOCH)
    }

    fn etag(&self) -> Option<String> {
        None
    }
}

/// Map an engine error onto the filesystem error the frontend translates to
/// a status code.
pub fn fs_error(err: crate::errors::GatewayError) -> FsError {
    use crate::errors::GatewayError;

    match err {
        GatewayError::InvalidPath(_) | GatewayError::NotFound => FsError::NotFound,
        GatewayError::Conflict(_) => FsError::Exists,
        GatewayError::Forbidden(_) => FsError::Forbidden,
        GatewayError::QuotaExceeded { .. } => FsError::InsufficientStorage,
        GatewayError::SessionLimitExceeded { .. } => FsError::Forbidden,
        GatewayError::Transient(e) => {
            tracing::error!("Backend failure surfaced to WebDAV layer: {:#}", e);
            FsError::GeneralFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GatewayError;

    fn record(is_deleted: bool) -> FileRecord {
        FileRecord {
            id: 1,
            user_id: 7,
            storage_key: "7/a.txt".to_string(),
            size_bytes: 5,
            mime_type: "text/plain".to_string(),
            checksum_sha256: "ab".repeat(32),
            uploaded_at: Utc::now() - chrono::Duration::hours(2),
            modified_at: Utc::now() - chrono::Duration::hours(1),
            is_deleted,
            deleted_at: is_deleted.then(Utc::now),
            original_key: String::new(),
            trash_name: String::new(),
        }
    }

    #[test]
    fn test_file_meta_uses_checksum_as_etag() {
        let meta = FileMeta::from_record(&record(false));
        assert_eq!(meta.len(), 5);
        assert!(!meta.is_dir());
        assert_eq!(meta.etag(), Some("ab".repeat(32)));
    }

    #[test]
    fn test_trashed_file_reports_deletion_time() {
        let rec = record(true);
        let meta = FileMeta::from_record(&rec);
        assert_eq!(
            meta.modified().unwrap(),
            SystemTime::from(rec.deleted_at.unwrap())
        );
    }

    #[test]
    fn test_dir_meta_has_no_etag() {
        let meta = DirMeta::new(None);
        assert!(meta.is_dir());
        assert_eq!(meta.etag(), None);
    }

    #[test]
    fn test_fs_error_mapping() {
        assert_eq!(
            fs_error(GatewayError::QuotaExceeded { limit: 1, used: 1, need: 1 }),
            FsError::InsufficientStorage
        );
        assert_eq!(fs_error(GatewayError::NotFound), FsError::NotFound);
        assert_eq!(fs_error(GatewayError::Forbidden("x")), FsError::Forbidden);
        assert_eq!(
            fs_error(GatewayError::Conflict("dup".to_string())),
            FsError::Exists
        );
    }
}
