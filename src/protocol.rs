//! Wire protocol: header names, JSON payloads, sync actions.
//!
//! Both the server handlers and the agent's HTTP client speak these types;
//! keeping them in one module is what keeps the two sides honest.

use serde::{Deserialize, Serialize};

/// All endpoints live under this prefix.
pub const API_BASE: &str = "/api/v1";

/// Session token request header.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
/// Target path for multipart uploads.
pub const FILE_RELATIVE_PATH_HEADER: &str = "X-File-Relative-Path";
/// SHA-256 checksum attached to download responses.
pub const FILE_CHECKSUM_HEADER: &str = "X-File-Checksum";

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterData {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginData {
    pub user_id: i64,
    pub username: String,
    pub token: String,
    pub home_dir: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeData {
    pub user_id: i64,
    pub username: String,
    pub home_dir: String,
}

/// Generic success envelope: `{status, message?, data?}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: None,
            data: Some(data),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.into()),
            data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameRequest {
    pub old_path: String,
    pub new_path: String,
}

/// One directory entry in a listing response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListingEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub last_modified: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListingResponse {
    pub status: String,
    pub listing: Vec<ListingEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateStorageRequest {
    pub storage_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GrantAccessRequest {
    pub storage_name: String,
    pub target_user: String,
    pub permission: String,
}

/// One entry of the client manifest.
///
/// Deletion tombstones carry only `relative_path` and `is_deleted`; the
/// remaining fields default so both shapes parse from the same struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestItem {
    pub relative_path: String,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub is_directory: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestRequest {
    pub client_files: Vec<ManifestItem>,
}

/// Server-to-client instruction produced by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    NoAction,
    UploadToServer,
    DownloadToClient,
    DeleteOnServer,
    /// Declared for protocol completeness; the reconciler as written never
    /// emits it, but the agent knows how to apply it.
    DeleteOnClient,
    ConflictServerWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    pub sync_action_type: SyncAction,
    pub relative_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestResponse {
    pub status: String,
    pub sync_operations: Vec<SyncOperation>,
}
