//! WebDAV surface: path resolution, the `DavFileSystem` implementation the
//! `dav-server` crate dispatches verbs to, and the HTTP wiring.

pub mod file;
pub mod fs;
pub mod meta;
pub mod resolver;
pub mod server;
