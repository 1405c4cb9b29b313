//! HTTP request routing and handlers.
//!
//! Routes split into a public table (register, login) and an authenticated
//! table; every authenticated handler starts by resolving the session from
//! the token header. Handlers stay thin: validate, check permission,
//! delegate to the stores, translate the result. All error-to-status
//! mapping lives in [`crate::error::ApiError`].

use crate::access::{AccessLevel, PermissionEngine};
use crate::error::{ApiError, ApiResult};
use crate::files::FileStore;
use crate::metadata::MetadataStore;
use crate::pathsafe::resolve_safe;
use crate::protocol::{
    CreateStorageRequest, Envelope, GrantAccessRequest, ListingResponse, LoginData, LoginRequest,
    ManifestRequest, ManifestResponse, MeData, MkdirRequest, RegisterData, RegisterRequest,
    RenameRequest, SyncAction, AUTH_TOKEN_HEADER, FILE_RELATIVE_PATH_HEADER,
};
use crate::reconcile::Reconciler;
use crate::session::{Session, SessionRegistry};
use crate::users::UserManager;
use axum::extract::{Multipart, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub users: UserManager,
    pub permissions: PermissionEngine,
    pub files: FileStore,
    pub sessions: Arc<SessionRegistry>,
}

impl ApiState {
    fn metadata(&self) -> &MetadataStore {
        self.files.metadata()
    }
}

pub fn router(state: ApiState) -> Router {
    // Public routes first, then everything that requires a session token.
    Router::new()
        .route("/api/v1/users/register", post(register))
        .route("/api/v1/users/login", post(login))
        .route("/api/v1/users/logout", post(logout))
        .route("/api/v1/users/me", get(me))
        .route("/api/v1/files/upload", post(upload))
        .route("/api/v1/files/download", get(download))
        .route("/api/v1/files/list", get(list))
        .route("/api/v1/files/mkdir", post(mkdir))
        .route("/api/v1/files/delete", delete(delete_path))
        .route("/api/v1/files/rename", post(rename))
        .route("/api/v1/sync/manifest", post(sync_manifest))
        .route("/api/v1/shared/storage", post(create_shared_storage))
        .route("/api/v1/shared/access", post(grant_shared_access))
        .with_state(state)
}

/// Resolve the session from the token header; the auth gate for every
/// non-public route.
fn authenticate(state: &ApiState, headers: &HeaderMap) -> ApiResult<Session> {
    let token = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Auth)?;
    state.sessions.resolve(token)
}

fn require(level: AccessLevel, have: AccessLevel, what: &str) -> ApiResult<()> {
    if have >= level {
        Ok(())
    } else {
        Err(ApiError::permission(what.to_string()))
    }
}

#[derive(Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

async fn register(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Envelope<RegisterData>>)> {
    let record = state.users.register(&req.username, &req.password)?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::success(RegisterData {
            user_id: record.user_id,
            username: record.username,
        })),
    ))
}

async fn login(
    State(state): State<ApiState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<Envelope<LoginData>>> {
    let record = state.users.login(&req.username, &req.password)?;
    let token = state
        .sessions
        .create(record.user_id, &record.username, record.home_dir.clone())?;
    info!(username = %record.username, "login");
    Ok(Json(Envelope::success(LoginData {
        user_id: record.user_id,
        username: record.username,
        token,
        home_dir: record.home_dir.to_string_lossy().to_string(),
    })))
}

async fn logout(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Envelope<()>>> {
    let _session = authenticate(&state, &headers)?;
    if let Some(token) = headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        state.sessions.remove(token);
    }
    Ok(Json(Envelope::message("logged out")))
}

async fn me(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Json<Envelope<MeData>>> {
    let session = authenticate(&state, &headers)?;
    Ok(Json(Envelope::success(MeData {
        user_id: session.user_id,
        username: session.username,
        home_dir: session.home_dir.to_string_lossy().to_string(),
    })))
}

async fn upload(
    State(state): State<ApiState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Envelope<()>>)> {
    let session = authenticate(&state, &headers)?;
    let relative = headers
        .get(FILE_RELATIVE_PATH_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::validation(format!("missing {} header", FILE_RELATIVE_PATH_HEADER))
        })?
        .to_string();

    let target = resolve_safe(&session.home_dir, &relative)?;
    let parent = target
        .parent()
        .ok_or_else(|| ApiError::validation("upload target has no parent"))?;
    let level = state.permissions.permission_for(session.user_id, parent)?;
    require(AccessLevel::ReadWrite, level, "write to target location")?;

    let mut bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("bad multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::validation(format!("bad multipart body: {}", e)))?;
            bytes = Some(data.to_vec());
            break;
        }
    }
    let bytes = bytes.ok_or_else(|| ApiError::validation("missing 'file' multipart part"))?;

    state
        .files
        .upload(&session.home_dir, &relative, &bytes, session.user_id)?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::message(format!("uploaded {}", relative))),
    ))
}

async fn download(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let session = authenticate(&state, &headers)?;
    if query.path.is_empty() {
        return Err(ApiError::validation("missing 'path' query parameter"));
    }

    let target = resolve_safe(&session.home_dir, &query.path)?;
    let level = state.permissions.permission_for(session.user_id, &target)?;
    require(AccessLevel::Read, level, "read this file")?;

    let (bytes, checksum) = state.files.download(&session.home_dir, &query.path)?;
    let filename = Path::new(&query.path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| query.path.clone());

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
            (
                header::HeaderName::from_static("x-file-checksum"),
                checksum,
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn list(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<ListingResponse>> {
    let session = authenticate(&state, &headers)?;
    let target = resolve_safe(&session.home_dir, &query.path)?;
    let level = state.permissions.permission_for(session.user_id, &target)?;
    require(AccessLevel::Read, level, "list directory contents")?;

    let listing = state.files.list(&session.home_dir, &query.path)?;
    Ok(Json(ListingResponse {
        status: "success".to_string(),
        listing,
    }))
}

async fn mkdir(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<MkdirRequest>,
) -> ApiResult<(StatusCode, Json<Envelope<()>>)> {
    let session = authenticate(&state, &headers)?;
    if req.path.is_empty() {
        return Err(ApiError::validation("missing 'path' in body"));
    }
    let target = resolve_safe(&session.home_dir, &req.path)?;
    let parent = target
        .parent()
        .ok_or_else(|| ApiError::validation("mkdir target has no parent"))?;
    let level = state.permissions.permission_for(session.user_id, parent)?;
    require(AccessLevel::ReadWrite, level, "create directory here")?;

    state.files.mkdir(&session.home_dir, &req.path, session.user_id)?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::message(format!("created {}", req.path))),
    ))
}

async fn delete_path(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Envelope<()>>> {
    let session = authenticate(&state, &headers)?;
    if query.path.is_empty() {
        return Err(ApiError::validation("missing 'path' query parameter"));
    }
    let target = resolve_safe(&session.home_dir, &query.path)?;
    let level = state.permissions.permission_for(session.user_id, &target)?;
    require(AccessLevel::ReadWrite, level, "delete this path")?;

    state.files.delete(&session.home_dir, &query.path)?;
    Ok(Json(Envelope::message(format!("deleted {}", query.path))))
}

async fn rename(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    let session = authenticate(&state, &headers)?;
    if req.old_path.is_empty() || req.new_path.is_empty() {
        return Err(ApiError::validation("old_path and new_path are required"));
    }
    if req.old_path == req.new_path {
        return Err(ApiError::validation("old_path and new_path are identical"));
    }

    let source = resolve_safe(&session.home_dir, &req.old_path)?;
    let dest = resolve_safe(&session.home_dir, &req.new_path)?;
    for path in [&source, &dest] {
        let parent = path
            .parent()
            .ok_or_else(|| ApiError::validation("rename path has no parent"))?;
        let level = state.permissions.permission_for(session.user_id, parent)?;
        require(AccessLevel::ReadWrite, level, "rename in this location")?;
    }

    state
        .files
        .rename(&session.home_dir, &req.old_path, &req.new_path)?;
    Ok(Json(Envelope::message(format!(
        "renamed {} to {}",
        req.old_path, req.new_path
    ))))
}

async fn sync_manifest(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<ManifestRequest>,
) -> ApiResult<Json<ManifestResponse>> {
    let session = authenticate(&state, &headers)?;
    let level = state
        .permissions
        .permission_for(session.user_id, &session.home_dir)?;
    require(AccessLevel::ReadWrite, level, "sync this directory")?;

    let reconciler = Reconciler::new(state.metadata(), &state.permissions);
    let operations = reconciler.plan(session.user_id, &session.home_dir, &req.client_files)?;

    // Client-reported deletions are applied here; the operation in the
    // response only tells the agent to forget the path.
    for op in &operations {
        if op.sync_action_type == SyncAction::DeleteOnServer {
            if let Err(e) = state.files.delete(&session.home_dir, &op.relative_path) {
                warn!(path = %op.relative_path, error = %e, "manifest delete failed");
            }
        }
    }

    info!(
        username = %session.username,
        items = req.client_files.len(),
        operations = operations.len(),
        "manifest reconciled"
    );
    Ok(Json(ManifestResponse {
        status: "success".to_string(),
        sync_operations: operations,
    }))
}

async fn create_shared_storage(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateStorageRequest>,
) -> ApiResult<(StatusCode, Json<Envelope<serde_json::Value>>)> {
    let session = authenticate(&state, &headers)?;
    let path = state
        .permissions
        .create_shared_storage(&req.storage_name, session.user_id)?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::success(serde_json::json!({
            "storage_name": req.storage_name,
            "path": path.to_string_lossy(),
        }))),
    ))
}

async fn grant_shared_access(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<GrantAccessRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    let session = authenticate(&state, &headers)?;
    let level = AccessLevel::parse(&req.permission)
        .ok_or_else(|| ApiError::validation(format!("invalid permission: {}", req.permission)))?;

    let storage_path = state
        .permissions
        .shared_storage_path(&req.storage_name)?
        .ok_or_else(|| ApiError::not_found(format!("shared storage: {}", req.storage_name)))?;
    let granter_level = state
        .permissions
        .permission_for(session.user_id, &storage_path)?;
    require(
        AccessLevel::ReadWrite,
        granter_level,
        "manage access for this storage",
    )?;

    let target = state
        .users
        .find_by_username(&req.target_user)?
        .ok_or_else(|| ApiError::not_found(format!("user: {}", req.target_user)))?;
    state
        .permissions
        .grant_shared(target.user_id, &req.storage_name, level)?;
    Ok(Json(Envelope::message(format!(
        "access to {} for {} set to {}",
        req.storage_name, req.target_user, req.permission
    ))))
}
