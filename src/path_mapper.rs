//! Path translation between WebDAV paths and storage keys.
//!
//! WebDAV paths are what users see: `/documents/report.pdf`. Storage keys
//! carry the user id prefix: `{user_id}/documents/report.pdf`. Every key the
//! engines write is built here from a validated WebDAV path, which is what
//! guarantees per-user isolation at the storage layer.

const SEPARATOR: char = '/';

/// Special trash path.
const TRASH_PATH: &str = "/.Trash";

#[derive(Debug, Clone, Copy)]
pub struct PathMapper {
    user_id: i64,
}

impl PathMapper {
    pub fn new(user_id: i64) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Convert a WebDAV path to a storage key.
    pub fn to_storage_key(&self, webdav_path: &str) -> String {
        let normalized = webdav_path.trim_matches(SEPARATOR);

        if normalized.is_empty() {
            return self.user_id.to_string();
        }

        format!("{}/{}", self.user_id, normalized)
    }

    /// Convert a storage key back to a WebDAV path.
    ///
    /// Keys outside this user's namespace come back unchanged apart from the
    /// leading slash.
    pub fn to_webdav_path(&self, storage_key: &str) -> String {
        let normalized = storage_key.trim_matches(SEPARATOR);

        if normalized == self.user_id.to_string() {
            return SEPARATOR.to_string();
        }

        let prefix = format!("{}/", self.user_id);
        if let Some(rest) = normalized.strip_prefix(&prefix) {
            return format!("/{}", rest);
        }

        format!("/{}", normalized)
    }

    /// Parent directory of a WebDAV path. `/` for root-level items and root.
    pub fn parent(&self, webdav_path: &str) -> String {
        let normalized = webdav_path.trim_matches(SEPARATOR);

        match normalized.rsplit_once(SEPARATOR) {
            Some((parent, _)) => format!("/{}", parent),
            None => SEPARATOR.to_string(),
        }
    }

    /// Filename or folder name component. Empty for the root path.
    pub fn basename<'a>(&self, webdav_path: &'a str) -> &'a str {
        let normalized = webdav_path.trim_matches(SEPARATOR);
        normalized.rsplit(SEPARATOR).next().unwrap_or("")
    }

    /// Join a parent WebDAV path and a name.
    pub fn join(&self, parent: &str, name: &str) -> String {
        let parent = parent.trim_matches(SEPARATOR);
        let name = name.trim_matches(SEPARATOR);

        if parent.is_empty() {
            format!("/{}", name)
        } else {
            format!("/{}/{}", parent, name)
        }
    }

    pub fn is_root(&self, webdav_path: &str) -> bool {
        webdav_path.trim_matches(SEPARATOR).is_empty()
    }

    /// True for exactly `/.Trash` (trailing slashes ignored).
    pub fn is_trash_root(&self, webdav_path: &str) -> bool {
        webdav_path.trim_end_matches(SEPARATOR) == TRASH_PATH
    }

    /// True for `/.Trash` and anything below it.
    pub fn is_under_trash(&self, webdav_path: &str) -> bool {
        let normalized = webdav_path.trim_end_matches(SEPARATOR);
        normalized == TRASH_PATH || normalized.starts_with("/.Trash/")
    }

    /// Item name from a trash path like `/.Trash/report.pdf`.
    /// Empty when the path is not a trash member.
    pub fn trash_item_name<'a>(&self, webdav_path: &'a str) -> &'a str {
        let normalized = webdav_path.trim_matches(SEPARATOR);
        normalized.strip_prefix(".Trash/").unwrap_or("")
    }

    /// Validate a WebDAV path for traversal attempts and NUL bytes.
    ///
    /// Invalid paths must resolve to "not found", never to an error page.
    pub fn validate(&self, webdav_path: &str) -> bool {
        if webdav_path.contains('\0') {
            return false;
        }

        !webdav_path.split(SEPARATOR).any(|segment| segment == "..")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_storage_key_root() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.to_storage_key("/"), "123");
        assert_eq!(mapper.to_storage_key(""), "123");
    }

    #[test]
    fn test_to_storage_key_simple_and_nested() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.to_storage_key("/file.txt"), "123/file.txt");
        assert_eq!(
            mapper.to_storage_key("/documents/reports/file.pdf"),
            "123/documents/reports/file.pdf"
        );
    }

    #[test]
    fn test_to_storage_key_normalizes_slashes() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.to_storage_key("///file.txt"), "123/file.txt");
        assert_eq!(mapper.to_storage_key("/folder/"), "123/folder");
    }

    #[test]
    fn test_to_webdav_path_root() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.to_webdav_path("123"), "/");
    }

    #[test]
    fn test_to_webdav_path_strips_prefix() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.to_webdav_path("123/file.txt"), "/file.txt");
        assert_eq!(
            mapper.to_webdav_path("123/documents/reports/file.pdf"),
            "/documents/reports/file.pdf"
        );
    }

    #[test]
    fn test_to_webdav_path_foreign_key_kept() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.to_webdav_path("456/file.txt"), "/456/file.txt");
    }

    #[test]
    fn test_round_trips() {
        let mapper = PathMapper::new(7);
        for path in ["/", "/a.txt", "/docs/b.pdf", "/docs/sub/c"] {
            let key = mapper.to_storage_key(path);
            assert_eq!(mapper.to_webdav_path(&key), *path);
            assert_eq!(mapper.to_storage_key(&mapper.to_webdav_path(&key)), key);
        }
    }

    #[test]
    fn test_parent() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.parent("/file.txt"), "/");
        assert_eq!(mapper.parent("/documents/file.txt"), "/documents");
        assert_eq!(mapper.parent("/documents/reports/file.pdf"), "/documents/reports");
        assert_eq!(mapper.parent("/"), "/");
        assert_eq!(mapper.parent(""), "/");
    }

    #[test]
    fn test_basename() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.basename("/file.txt"), "file.txt");
        assert_eq!(mapper.basename("/documents/report.pdf"), "report.pdf");
        assert_eq!(mapper.basename("/documents"), "documents");
        assert_eq!(mapper.basename("/"), "");
    }

    #[test]
    fn test_join() {
        let mapper = PathMapper::new(123);
        assert_eq!(mapper.join("/", "file.txt"), "/file.txt");
        assert_eq!(mapper.join("/documents", "file.txt"), "/documents/file.txt");
    }

    #[test]
    fn test_is_root() {
        let mapper = PathMapper::new(123);
        assert!(mapper.is_root("/"));
        assert!(mapper.is_root(""));
        assert!(!mapper.is_root("/documents"));
    }

    #[test]
    fn test_trash_paths() {
        let mapper = PathMapper::new(123);
        assert!(mapper.is_trash_root("/.Trash"));
        assert!(mapper.is_trash_root("/.Trash/"));
        assert!(!mapper.is_trash_root("/.Trash/file.txt"));

        assert!(mapper.is_under_trash("/.Trash"));
        assert!(mapper.is_under_trash("/.Trash/file.txt"));
        assert!(!mapper.is_under_trash("/documents"));

        assert_eq!(mapper.trash_item_name("/.Trash/report.pdf"), "report.pdf");
        assert_eq!(mapper.trash_item_name("/documents/report.pdf"), "");
    }

    #[test]
    fn test_validate_normal_paths() {
        let mapper = PathMapper::new(123);
        assert!(mapper.validate("/file.txt"));
        assert!(mapper.validate("/documents/report.pdf"));
        // Dots inside a name are fine; only ".." segments are traversal.
        assert!(mapper.validate("/archive..2024.tar"));
    }

    #[test]
    fn test_validate_rejects_traversal() {
        let mapper = PathMapper::new(123);
        assert!(!mapper.validate("/.."));
        assert!(!mapper.validate("/../etc/passwd"));
        assert!(!mapper.validate("/documents/../../../etc/passwd"));
    }

    #[test]
    fn test_validate_rejects_null_bytes() {
        let mapper = PathMapper::new(123);
        assert!(!mapper.validate("/file\0.txt"));
    }
}
