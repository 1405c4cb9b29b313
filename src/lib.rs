pub mod access;
pub mod agent;
pub mod api;
pub mod cli;
pub mod db;
pub mod error;
pub mod files;
pub mod metadata;
pub mod pathsafe;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod time;
pub mod users;

use access::PermissionEngine;
use api::ApiState;
use axum::Router;
use db::Database;
use error::ApiResult;
use files::FileStore;
use metadata::MetadataStore;
use session::SessionRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use users::UserManager;

/// Server wiring: where state lives on disk and how long sessions idle.
pub struct ServerConfig {
    pub database: PathBuf,
    pub users_root: PathBuf,
    pub shared_root: PathBuf,
    pub session_idle_timeout: Duration,
}

/// Build the shared handler state from a config.
pub fn build_state(config: &ServerConfig) -> ApiResult<ApiState> {
    std::fs::create_dir_all(&config.users_root)?;
    std::fs::create_dir_all(&config.shared_root)?;
    let users_root = config.users_root.canonicalize()?;
    let shared_root = config.shared_root.canonicalize()?;

    let db = Database::open(&config.database)?;
    let metadata = MetadataStore::new(db.clone());
    Ok(ApiState {
        users: UserManager::new(db.clone(), users_root.clone()),
        permissions: PermissionEngine::new(db, users_root, shared_root),
        files: FileStore::new(metadata),
        sessions: Arc::new(SessionRegistry::new(config.session_idle_timeout)),
    })
}

pub fn create_router(state: ApiState) -> Router {
    api::router(state).layer(CorsLayer::permissive())
}
