//! The `DavFileSystem` implementation dispatched by the `dav-server`
//! frontend. One instance is scoped to one authenticated user; every path it
//! sees is resolved through [`Resolver`] first.
//!
//! Delete semantics differ by resource kind: a file DELETE goes to the
//! trash, a trash item DELETE is permanent, DELETE on `/.Trash` empties it,
//! and a folder DELETE hard-deletes the subtree.

use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use futures_util::stream;
use tracing::debug;

use crate::dav::file::{BlobDavFile, WriteDavFile};
use crate::dav::meta::{fs_error, DirMeta, FileMeta};
use crate::dav::resolver::{Resolver, Resource};
use crate::models::FileRecord;
use crate::services::file_engine::{group_direct_children, FOLDER_MARKER_NAME};
use crate::Engines;

#[derive(Clone)]
pub struct DavFs {
    engines: Engines,
    user_id: i64,
}

impl DavFs {
    pub fn new(engines: Engines, user_id: i64) -> Self {
        Self { engines, user_id }
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.engines, self.user_id)
    }
}

/// User-visible path for a request path.
fn to_webdav_path(path: &DavPath) -> String {
    let rel = path.as_rel_ospath().to_string_lossy().to_string();
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rel)
    }
}

/// A listed child, with metadata precomputed from the parent's prefix scan.
struct GatewayDirEntry {
    name: String,
    meta: EntryMeta,
}

#[derive(Clone)]
enum EntryMeta {
    File(FileMeta),
    Dir(DirMeta),
}

impl EntryMeta {
    fn boxed(&self) -> Box<dyn DavMetaData> {
        match self {
            EntryMeta::File(meta) => Box::new(meta.clone()),
            EntryMeta::Dir(meta) => Box::new(meta.clone()),
        }
    }
}

impl DavDirEntry for GatewayDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.boxed();
        Box::pin(async move { Ok(meta) })
    }
}

/// Turn a flat prefix scan into direct-child entries. Subfolder timestamps
/// come from the files already fetched, so listing a folder costs one query.
fn build_folder_entries(records: &[FileRecord], prefix: &str) -> Vec<Box<dyn DavDirEntry>> {
    let keys: Vec<String> = records.iter().map(|r| r.storage_key.clone()).collect();
    let children = group_direct_children(&keys, prefix);

    children
        .into_iter()
        .map(|child| {
            let meta = if child.is_folder {
                let sub_prefix = format!("{}{}/", prefix, child.name);
                let latest = records
                    .iter()
                    .filter(|r| r.storage_key.starts_with(&sub_prefix))
                    .map(|r| r.modified_at)
                    .max();
                EntryMeta::Dir(DirMeta::new(latest))
            } else {
                let key = format!("{}{}", prefix, child.name);
                let record = records.iter().find(|r| r.storage_key == key);
                match record {
                    Some(record) => EntryMeta::File(FileMeta::from_record(record)),
                    None => EntryMeta::Dir(DirMeta::new(None)),
                }
            };

            Box::new(GatewayDirEntry {
                name: child.name,
                meta,
            }) as Box<dyn DavDirEntry>
        })
        .collect()
}

impl DavFileSystem for DavFs {
    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let webdav = to_webdav_path(path);
            debug!("open({}, write: {})", webdav, options.write);

            let resolver = self.resolver();
            let wants_write = options.write
                || options.append
                || options.truncate
                || options.create
                || options.create_new;

            match resolver.resolve(&webdav).await.map_err(fs_error)? {
                Some(Resource::File(record)) => {
                    if options.create_new {
                        return Err(FsError::Exists);
                    }
                    if wants_write {
                        Ok(Box::new(WriteDavFile::for_overwrite(
                            self.engines.files.clone(),
                            self.user_id,
                            record,
                        )) as Box<dyn DavFile>)
                    } else {
                        Ok(Box::new(BlobDavFile::new(self.engines.blob.clone(), record))
                            as Box<dyn DavFile>)
                    }
                }
                Some(Resource::TrashItem(record)) => {
                    if wants_write {
                        // Trashed files are read-only until restored.
                        return Err(FsError::Forbidden);
                    }
                    Ok(Box::new(BlobDavFile::new(self.engines.blob.clone(), record))
                        as Box<dyn DavFile>)
                }
                Some(Resource::Root)
                | Some(Resource::Folder { .. })
                | Some(Resource::TrashRoot) => Err(FsError::Forbidden),
                Some(Resource::NewFile { .. }) => Err(FsError::NotFound),
                None => {
                    if !(options.create || options.create_new) {
                        return Err(FsError::NotFound);
                    }
                    if resolver.mapper().is_under_trash(&webdav) {
                        return Err(FsError::Forbidden);
                    }
                    match resolver.resolve_for_create(&webdav).await.map_err(fs_error)? {
                        Some(Resource::NewFile { storage_key }) => {
                            Ok(Box::new(WriteDavFile::for_new_file(
                                self.engines.files.clone(),
                                self.user_id,
                                storage_key,
                            )) as Box<dyn DavFile>)
                        }
                        _ => Err(FsError::NotFound),
                    }
                }
            }
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let webdav = to_webdav_path(path);
            debug!("read_dir({})", webdav);

            let resolver = self.resolver();
            match resolver.resolve(&webdav).await.map_err(fs_error)? {
                Some(Resource::Root) | Some(Resource::Folder { .. }) => {
                    let key = resolver.mapper().to_storage_key(&webdav);
                    let prefix = format!("{}/", key.trim_end_matches('/'));
                    let records = self
                        .engines
                        .db
                        .list_files_with_prefix(self.user_id, &prefix)
                        .await
                        .map_err(fs_error)?;

                    let entries = build_folder_entries(&records, &prefix);
                    let stream = stream::iter(entries.into_iter().map(Ok));
                    Ok(Box::pin(stream) as FsStream<Box<dyn DavDirEntry>>)
                }
                Some(Resource::TrashRoot) => {
                    // Trash lists original names, not internal trash names.
                    let trashed = self
                        .engines
                        .trash
                        .list_trash(self.user_id)
                        .await
                        .map_err(fs_error)?;

                    let entries: Vec<Box<dyn DavDirEntry>> = trashed
                        .iter()
                        .map(|record| {
                            Box::new(GatewayDirEntry {
                                name: record.original_filename().to_string(),
                                meta: EntryMeta::File(FileMeta::from_record(record)),
                            }) as Box<dyn DavDirEntry>
                        })
                        .collect();

                    let stream = stream::iter(entries.into_iter().map(Ok));
                    Ok(Box::pin(stream) as FsStream<Box<dyn DavDirEntry>>)
                }
                Some(_) => Err(FsError::Forbidden),
                None => Err(FsError::NotFound),
            }
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let webdav = to_webdav_path(path);
            let resolver = self.resolver();

            match resolver.resolve(&webdav).await.map_err(fs_error)? {
                Some(Resource::File(record)) | Some(Resource::TrashItem(record)) => {
                    Ok(Box::new(FileMeta::from_record(&record)) as Box<dyn DavMetaData>)
                }
                Some(Resource::Root) | Some(Resource::Folder { .. }) => {
                    let key = resolver.mapper().to_storage_key(&webdav);
                    let prefix = format!("{}/", key.trim_end_matches('/'));
                    let latest = self
                        .engines
                        .db
                        .latest_modified_under_prefix(self.user_id, &prefix)
                        .await
                        .map_err(fs_error)?;
                    Ok(Box::new(DirMeta::new(latest)) as Box<dyn DavMetaData>)
                }
                Some(Resource::TrashRoot) => {
                    let trashed = self
                        .engines
                        .trash
                        .list_trash(self.user_id)
                        .await
                        .map_err(fs_error)?;
                    let latest = trashed.first().and_then(|r| r.deleted_at);
                    Ok(Box::new(DirMeta::new(latest)) as Box<dyn DavMetaData>)
                }
                Some(Resource::NewFile { .. }) | None => Err(FsError::NotFound),
            }
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let webdav = to_webdav_path(path);
            debug!("create_dir({})", webdav);

            let resolver = self.resolver();
            if !resolver.mapper().validate(&webdav) {
                return Err(FsError::NotFound);
            }
            if resolver.mapper().is_under_trash(&webdav) {
                return Err(FsError::Forbidden);
            }

            if resolver.resolve(&webdav).await.map_err(fs_error)?.is_some() {
                return Err(FsError::Exists);
            }

            let parent = resolver.mapper().parent(&webdav);
            match resolver.resolve(&parent).await.map_err(fs_error)? {
                Some(Resource::Root) | Some(Resource::Folder { .. }) => {}
                _ => return Err(FsError::NotFound),
            }

            // The marker file is what makes an empty folder survive.
            let marker_path = resolver.mapper().join(&webdav, FOLDER_MARKER_NAME);
            let marker_key = resolver.mapper().to_storage_key(&marker_path);
            self.engines
                .files
                .upload(self.user_id, &marker_key, b"")
                .await
                .map_err(fs_error)?;

            Ok(())
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let webdav = to_webdav_path(path);
            debug!("remove_file({})", webdav);

            let resolver = self.resolver();
            match resolver.resolve(&webdav).await.map_err(fs_error)? {
                Some(Resource::File(record)) => {
                    self.engines
                        .trash
                        .soft_delete(record.id)
                        .await
                        .map_err(fs_error)?;
                    Ok(())
                }
                Some(Resource::TrashItem(record)) => {
                    self.engines
                        .trash
                        .permanent_delete(record.id)
                        .await
                        .map_err(fs_error)?;
                    Ok(())
                }
                Some(_) => Err(FsError::Forbidden),
                None => Err(FsError::NotFound),
            }
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let webdav = to_webdav_path(path);
            debug!("remove_dir({})", webdav);

            let resolver = self.resolver();
            match resolver.resolve(&webdav).await.map_err(fs_error)? {
                Some(Resource::TrashRoot) => {
                    let count = self
                        .engines
                        .trash
                        .empty_trash(self.user_id)
                        .await
                        .map_err(fs_error)?;
                    debug!("Emptied trash: {} files", count);
                    Ok(())
                }
                Some(Resource::Folder { .. }) => {
                    // Folder contents do not go through the trash.
                    let key = resolver.mapper().to_storage_key(&webdav);
                    self.engines
                        .files
                        .delete_folder(self.user_id, &key)
                        .await
                        .map_err(fs_error)?;
                    Ok(())
                }
                Some(_) => Err(FsError::Forbidden),
                None => Err(FsError::NotFound),
            }
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_path = to_webdav_path(from);
            let to_path = to_webdav_path(to);
            debug!("rename({} -> {})", from_path, to_path);

            let resolver = self.resolver();
            let mapper = resolver.mapper();
            if !mapper.validate(&to_path) {
                return Err(FsError::NotFound);
            }

            match resolver.resolve(&from_path).await.map_err(fs_error)? {
                Some(Resource::TrashItem(record)) => {
                    if mapper.is_under_trash(&to_path) {
                        return Err(FsError::Forbidden);
                    }
                    // MOVE out of the trash is a restore.
                    let dest_key = mapper.to_storage_key(&to_path);
                    self.engines
                        .trash
                        .restore(record.id, Some(&dest_key))
                        .await
                        .map_err(fs_error)?;
                    Ok(())
                }
                Some(Resource::File(record)) => {
                    if mapper.is_under_trash(&to_path) {
                        // Finder deletes by moving into /.Trash.
                        self.engines
                            .trash
                            .soft_delete(record.id)
                            .await
                            .map_err(fs_error)?;
                        return Ok(());
                    }

                    // Replacing an existing destination sends it to trash
                    // first, so nothing is lost if the move fails.
                    if let Some(Resource::File(existing)) =
                        resolver.resolve(&to_path).await.map_err(fs_error)?
                    {
                        self.engines
                            .trash
                            .soft_delete(existing.id)
                            .await
                            .map_err(fs_error)?;
                    }

                    let dest_key = mapper.to_storage_key(&to_path);
                    self.engines
                        .files
                        .move_file(self.user_id, &record.storage_key, &dest_key)
                        .await
                        .map_err(fs_error)?;
                    Ok(())
                }
                Some(Resource::Folder { .. }) => {
                    if mapper.is_under_trash(&to_path) {
                        return Err(FsError::Forbidden);
                    }
                    let src_prefix = mapper.to_storage_key(&from_path);
                    let dst_prefix = mapper.to_storage_key(&to_path);
                    let moved = self
                        .engines
                        .files
                        .move_folder(self.user_id, &src_prefix, &dst_prefix)
                        .await
                        .map_err(fs_error)?;
                    debug!("Recursive move finished: {} files", moved);
                    Ok(())
                }
                Some(Resource::Root) | Some(Resource::TrashRoot) => Err(FsError::Forbidden),
                Some(Resource::NewFile { .. }) | None => Err(FsError::NotFound),
            }
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_path = to_webdav_path(from);
            let to_path = to_webdav_path(to);
            debug!("copy({} -> {})", from_path, to_path);

            let resolver = self.resolver();
            let mapper = resolver.mapper();
            if !mapper.validate(&to_path) {
                return Err(FsError::NotFound);
            }
            if mapper.is_under_trash(&to_path) {
                return Err(FsError::Forbidden);
            }

            match resolver.resolve(&from_path).await.map_err(fs_error)? {
                Some(Resource::File(record)) => {
                    if let Some(Resource::File(existing)) =
                        resolver.resolve(&to_path).await.map_err(fs_error)?
                    {
                        self.engines
                            .trash
                            .soft_delete(existing.id)
                            .await
                            .map_err(fs_error)?;
                    }

                    let dest_key = mapper.to_storage_key(&to_path);
                    self.engines
                        .files
                        .copy(self.user_id, &record.storage_key, &dest_key)
                        .await
                        .map_err(fs_error)?;
                    Ok(())
                }
                // Copying out of the trash requires a restore first.
                Some(Resource::TrashItem(_)) | Some(Resource::TrashRoot) => {
                    Err(FsError::Forbidden)
                }
                Some(_) => Err(FsError::Forbidden),
                None => Err(FsError::NotFound),
            }
        })
    }
}
