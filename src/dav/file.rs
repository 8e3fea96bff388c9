//! `DavFile` implementations: range-capable reads straight from the blob
//! store, and a write buffer that dispatches upload or overwrite when the
//! frontend closes the body.

use std::fmt::{self, Debug, Formatter};
use std::io::SeekFrom;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use dav_server::fs::{DavFile, DavMetaData, FsError, FsFuture};
use tracing::debug;

use crate::dav::meta::{fs_error, FileMeta};
use crate::models::FileRecord;
use crate::services::file_engine::FileEngine;
use crate::storage::BlobStore;

/// Read handle over a stored blob. Each `read_bytes` is a range request, so
/// GET with `Range` headers never pulls the whole object.
pub struct BlobDavFile {
    blob: Arc<dyn BlobStore>,
    record: FileRecord,
    position: u64,
}

impl BlobDavFile {
    pub fn new(blob: Arc<dyn BlobStore>, record: FileRecord) -> Self {
        Self {
            blob,
            record,
            position: 0,
        }
    }
}

impl Debug for BlobDavFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobDavFile")
            .field("key", &self.record.storage_key)
            .field("position", &self.position)
            .finish()
    }
}

impl DavFile for BlobDavFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = FileMeta::from_record(&self.record);
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let total = self.record.size_bytes.max(0) as u64;
            let remaining = total.saturating_sub(self.position);
            let to_read = remaining.min(count as u64);

            if to_read == 0 {
                return Ok(Bytes::new());
            }

            let data = self
                .blob
                .get_range(&self.record.storage_key, self.position, to_read)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to read blob {}: {}",
                        self.record.storage_key,
                        e
                    );
                    FsError::GeneralFailure
                })?;

            self.position += data.len() as u64;
            Ok(Bytes::from(data))
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        let len = self.record.size_bytes.max(0);
        let new_pos = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.position as i64 + n,
        };

        if new_pos < 0 {
            return Box::pin(async { Err(FsError::GeneralFailure) });
        }

        self.position = new_pos as u64;
        let position = self.position;
        Box::pin(async move { Ok(position) })
    }

    fn write_buf(&mut self, _buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// What a completed write buffer turns into.
enum WriteTarget {
    /// Create a new file at this key.
    Create { storage_key: String },
    /// Replace the content of an existing record.
    Overwrite { record: FileRecord },
}

/// Collects a PUT body in memory and commits on flush.
///
/// Until the commit succeeds nothing is visible: a dropped connection leaves
/// no blob and no record behind. Quota overflow surfaces here as
/// `InsufficientStorage`.
pub struct WriteDavFile {
    files: FileEngine,
    user_id: i64,
    target: WriteTarget,
    buffer: Vec<u8>,
    committed: Option<FileRecord>,
}

impl WriteDavFile {
    pub fn for_new_file(files: FileEngine, user_id: i64, storage_key: String) -> Self {
        Self {
            files,
            user_id,
            target: WriteTarget::Create { storage_key },
            buffer: Vec::new(),
            committed: None,
        }
    }

    pub fn for_overwrite(files: FileEngine, user_id: i64, record: FileRecord) -> Self {
        Self {
            files,
            user_id,
            target: WriteTarget::Overwrite { record },
            buffer: Vec::new(),
            committed: None,
        }
    }
}

impl Debug for WriteDavFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            WriteTarget::Create { storage_key } => storage_key.as_str(),
            WriteTarget::Overwrite { record } => record.storage_key.as_str(),
        };
        f.debug_struct("WriteDavFile")
            .field("target", &target)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl DavFile for WriteDavFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = match &self.committed {
            Some(record) => FileMeta::from_record(record),
            None => FileMeta::pending(self.buffer.len() as u64),
        };
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        while buf.has_remaining() {
            let chunk = buf.chunk();
            self.buffer.extend_from_slice(chunk);
            let advance = chunk.len();
            buf.advance(advance);
        }
        Box::pin(async { Ok(()) })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        self.buffer.extend_from_slice(&buf);
        Box::pin(async { Ok(()) })
    }

    fn read_bytes(&mut self, _count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn seek(&mut self, _pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            if self.committed.is_some() {
                return Ok(());
            }

            let result = match &self.target {
                WriteTarget::Create { storage_key } => {
                    debug!(
                        "Creating file via WebDAV: {} ({} bytes)",
                        storage_key,
                        self.buffer.len()
                    );
                    // Empty PUTs are real: Finder probes with a zero-byte PUT
                    // before sending content.
                    self.files
                        .upload(self.user_id, storage_key, &self.buffer)
                        .await
                }
                WriteTarget::Overwrite { record } => {
                    if self.buffer.is_empty() {
                        // Nothing arrived; keep the existing content.
                        self.committed = Some(record.clone());
                        return Ok(());
                    }
                    debug!(
                        "Overwriting file via WebDAV: {} ({} bytes)",
                        record.storage_key,
                        self.buffer.len()
                    );
                    self.files.overwrite(record.id, &self.buffer).await
                }
            };

            match result {
                Ok(record) => {
                    self.committed = Some(record);
                    Ok(())
                }
                Err(e) => Err(fs_error(e)),
            }
        })
    }
}
