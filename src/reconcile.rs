//! Server-side manifest reconciliation.
//!
//! Three-way comparison of the client's manifest, the persisted metadata,
//! and the caller's permissions, producing one operation per path. The
//! comparison runs at second precision to match the wire format; equal
//! checksums self-heal timestamp drift without transferring bytes.

use crate::access::{AccessLevel, PermissionEngine};
use crate::error::ApiResult;
use crate::metadata::{MetadataRow, MetadataStore};
use crate::protocol::{ManifestItem, SyncAction, SyncOperation};
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest-diff engine over the metadata store and permission engine.
pub struct Reconciler<'a> {
    pub metadata: &'a MetadataStore,
    pub permissions: &'a PermissionEngine,
}

impl<'a> Reconciler<'a> {
    pub fn new(metadata: &'a MetadataStore, permissions: &'a PermissionEngine) -> Self {
        Self {
            metadata,
            permissions,
        }
    }

    /// The server's view of `sync_root` as the user is allowed to see it,
    /// indexed by forward-slash relative path.
    fn server_view(
        &self,
        user_id: i64,
        sync_root: &Path,
    ) -> ApiResult<BTreeMap<String, MetadataRow>> {
        let root_str = sync_root.to_string_lossy();
        let prefix = format!("{}/", root_str.trim_end_matches('/'));
        let mut view = BTreeMap::new();
        for row in self.metadata.query_live_under(root_str.trim_end_matches('/'))? {
            let level = self
                .permissions
                .permission_for(user_id, Path::new(&row.file_path))?;
            if level < AccessLevel::Read {
                continue;
            }
            let relative = row.file_path[prefix.len()..].replace('\\', "/");
            view.insert(relative, row);
        }
        Ok(view)
    }

    /// Produce the operation plan for one client manifest.
    ///
    /// Every path in the union of client manifest and visible server state
    /// appears in exactly one returned operation.
    pub fn plan(
        &self,
        user_id: i64,
        sync_root: &Path,
        client_items: &[ManifestItem],
    ) -> ApiResult<Vec<SyncOperation>> {
        let server_view = self.server_view(user_id, sync_root)?;
        let mut operations = Vec::with_capacity(client_items.len() + server_view.len());
        let mut seen = std::collections::HashSet::new();

        for item in client_items {
            let relative = item.relative_path.trim_matches('/').to_string();
            if relative.is_empty() || !seen.insert(relative.clone()) {
                continue;
            }
            let server_row = server_view.get(&relative);

            let action = if item.is_deleted {
                if server_row.is_some() {
                    SyncAction::DeleteOnServer
                } else {
                    SyncAction::NoAction
                }
            } else if item.is_directory {
                if server_row.is_some() {
                    SyncAction::NoAction
                } else {
                    SyncAction::UploadToServer
                }
            } else if let Some(server) = server_row {
                if item.checksum == server.checksum {
                    // Same content; timestamp differences are drift, not change.
                    SyncAction::NoAction
                } else if item.last_modified == server.last_modified {
                    SyncAction::ConflictServerWins
                } else if item.last_modified > server.last_modified {
                    SyncAction::UploadToServer
                } else {
                    SyncAction::DownloadToClient
                }
            } else {
                SyncAction::UploadToServer
            };

            operations.push(SyncOperation {
                sync_action_type: action,
                relative_path: relative,
            });
        }

        // Anything the server holds that the manifest never mentioned goes
        // down to the client.
        for relative in server_view.keys() {
            if !seen.contains(relative) {
                operations.push(SyncOperation {
                    sync_action_type: SyncAction::DownloadToClient,
                    relative_path: relative.clone(),
                });
            }
        }

        Ok(operations)
    }
}
