pub mod file_engine;
pub mod quota;
pub mod sessions;
pub mod trash;
