pub mod auth;
pub mod config;
pub mod dav;
pub mod db;
pub mod errors;
pub mod metadata;
pub mod models;
pub mod path_mapper;
pub mod scheduling;
pub mod seed;
pub mod services;
pub mod storage;

use std::sync::Arc;

use axum::{http::StatusCode, Json};

use config::Config;
use db::Database;
use services::file_engine::FileEngine;
use services::quota::QuotaEngine;
use services::sessions::SessionManager;
use services::trash::TrashEngine;
use storage::BlobStore;

/// The engine stack shared by the WebDAV layer, the schedulers and the CLI.
#[derive(Clone)]
pub struct Engines {
    pub db: Database,
    pub blob: Arc<dyn BlobStore>,
    pub quota: QuotaEngine,
    pub files: FileEngine,
    pub trash: TrashEngine,
    pub sessions: SessionManager,
}

impl Engines {
    pub fn new(db: Database, blob: Arc<dyn BlobStore>, config: &Config) -> Self {
        let quota = QuotaEngine::new(db.clone(), config.default_quota_bytes);
        let files = FileEngine::new(db.clone(), blob.clone(), quota.clone());
        let trash = TrashEngine::new(
            db.clone(),
            blob.clone(),
            files.clone(),
            config.trash_retention_days,
        );
        let sessions = SessionManager::new(
            db.clone(),
            config.webdav_session_limit,
            config.webdav_session_timeout,
        );
        Self {
            db,
            blob,
            quota,
            files,
            trash,
            sessions,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engines: Engines,
}

/// Health check endpoint for monitoring
pub async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({"status": "ok"})))
}
