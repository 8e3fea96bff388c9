//! Path resolution: map `(user, webdav path)` to the kind of resource the
//! path denotes. Every verb handler starts here, so invalid paths uniformly
//! resolve to nothing.

use crate::errors::GatewayResult;
use crate::models::FileRecord;
use crate::path_mapper::PathMapper;
use crate::Engines;

/// What a WebDAV path points at for a given user.
#[derive(Debug, Clone)]
pub enum Resource {
    /// The user's root collection `/`.
    Root,
    /// The virtual `/.Trash` collection.
    TrashRoot,
    /// A trashed file, addressed by its original filename.
    TrashItem(FileRecord),
    /// An implicit folder: live files (or a marker) exist under its prefix.
    Folder { webdav_path: String },
    /// A live file.
    File(FileRecord),
    /// A not-yet-existing file a PUT may create; parent already verified.
    NewFile { storage_key: String },
}

pub struct Resolver<'a> {
    engines: &'a Engines,
    mapper: PathMapper,
}

impl<'a> Resolver<'a> {
    pub fn new(engines: &'a Engines, user_id: i64) -> Self {
        Self {
            engines,
            mapper: PathMapper::new(user_id),
        }
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    /// Resolve a path to an existing resource. `None` for invalid paths and
    /// for paths nothing matches.
    pub async fn resolve(&self, webdav_path: &str) -> GatewayResult<Option<Resource>> {
        if !self.mapper.validate(webdav_path) {
            tracing::warn!("Invalid path rejected: {}", webdav_path);
            return Ok(None);
        }

        if self.mapper.is_root(webdav_path) {
            return Ok(Some(Resource::Root));
        }

        if self.mapper.is_trash_root(webdav_path) {
            return Ok(Some(Resource::TrashRoot));
        }

        if self.mapper.is_under_trash(webdav_path) {
            let name = self.mapper.trash_item_name(webdav_path);
            if name.is_empty() || name.contains('/') {
                return Ok(None);
            }
            let item = self
                .engines
                .trash
                .find_by_original_name(self.mapper.user_id(), name)
                .await?;
            return Ok(item.map(Resource::TrashItem));
        }

        let storage_key = self.mapper.to_storage_key(webdav_path);

        if let Some(record) = self
            .engines
            .db
            .get_file_by_key(self.mapper.user_id(), &storage_key)
            .await?
        {
            return Ok(Some(Resource::File(record)));
        }

        // Implicit folder: anything live under the prefix, marker included.
        let prefix = format!("{}/", storage_key);
        if self
            .engines
            .db
            .folder_exists(self.mapper.user_id(), &prefix)
            .await?
        {
            return Ok(Some(Resource::Folder {
                webdav_path: webdav_path.to_string(),
            }));
        }

        Ok(None)
    }

    /// Resolve the target of a creating PUT. The path must be free and its
    /// parent must be an existing collection.
    pub async fn resolve_for_create(&self, webdav_path: &str) -> GatewayResult<Option<Resource>> {
        if !self.mapper.validate(webdav_path) || self.mapper.is_under_trash(webdav_path) {
            return Ok(None);
        }

        let parent = self.mapper.parent(webdav_path);
        let parent_ok = match self.resolve(&parent).await? {
            Some(Resource::Root) | Some(Resource::Folder { .. }) => true,
            _ => false,
        };
        if !parent_ok {
            return Ok(None);
        }

        Ok(Some(Resource::NewFile {
            storage_key: self.mapper.to_storage_key(webdav_path),
        }))
    }
}
