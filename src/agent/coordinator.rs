//! The sync loop: pace, manifest, apply.
//!
//! Watcher events only mark the tree dirty; the coordinator syncs at most
//! once per interval, plus immediately once a burst has been quiet for a
//! second. Each cycle scans the tree, adds deletion tombstones from
//! AppData, posts the manifest, and applies the returned operations,
//! suppressing the watcher events its own writes will cause. A failure on
//! one path is logged and never aborts the cycle.

use crate::agent::app_data::AppData;
use crate::agent::auth::AuthManager;
use crate::agent::error::{AgentError, AgentResult};
use crate::agent::http::ApiClient;
use crate::agent::scanner::scan_local;
use crate::agent::watcher::{IgnoreSet, WatchEvent};
use crate::protocol::{ManifestItem, SyncAction, SyncOperation};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default pause between periodic syncs.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);
/// A burst counts as settled after this long without events.
const BURST_QUIET: Duration = Duration::from_secs(1);
/// Events drained per loop turn.
const DRAIN_LIMIT: usize = 10;

pub struct SyncCoordinator {
    root: PathBuf,
    client: Arc<ApiClient>,
    auth: AuthManager,
    app_data: AppData,
    ignored: Arc<IgnoreSet>,
    sync_interval: Duration,
}

/// Compose the conflict-copy name: `<stem>_conflict_local_<ts><ext>`.
fn conflict_name(relative: &str, timestamp: &str) -> String {
    let path = Path::new(relative);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| relative.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => format!(
            "{}/{}_conflict_local_{}{}",
            parent.to_string_lossy().replace('\\', "/"),
            stem,
            timestamp,
            ext
        ),
        None => format!("{}_conflict_local_{}{}", stem, timestamp, ext),
    }
}

/// Directory-creating uploads must run before anything beneath them:
/// fewer separators first.
fn separator_count(path: &str) -> usize {
    path.matches('/').count()
}

impl SyncCoordinator {
    pub fn new(
        root: PathBuf,
        client: Arc<ApiClient>,
        auth: AuthManager,
        app_data: AppData,
        ignored: Arc<IgnoreSet>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            root,
            client,
            auth,
            app_data,
            ignored,
            sync_interval,
        }
    }

    /// Event-processing loop; returns when `running` clears or the watcher
    /// channel closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<WatchEvent>, running: Arc<AtomicBool>) {
        let mut dirty = true; // first cycle reconciles whatever state we woke up to
        let mut last_event = Instant::now();
        let mut last_sync: Option<Instant> = None;

        loop {
            if !running.load(Ordering::Relaxed) {
                break;
            }

            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(event)) => {
                    debug!("watch event: {:?}", event);
                    dirty = true;
                    last_event = Instant::now();
                    let mut drained = 1;
                    while drained < DRAIN_LIMIT {
                        match rx.try_recv() {
                            Ok(event) => {
                                debug!("watch event: {:?}", event);
                                drained += 1;
                            }
                            Err(_) => break,
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {} // quiet second
            }

            let interval_elapsed = last_sync
                .map(|t| t.elapsed() >= self.sync_interval)
                .unwrap_or(true);
            let burst_settled = last_event.elapsed() >= BURST_QUIET;
            if dirty && (interval_elapsed || burst_settled) {
                self.sync_cycle().await;
                last_sync = Some(Instant::now());
                dirty = false;
            }
        }
        self.auth.logout().await;
    }

    /// One manifest round-trip. Per-path failures are logged; only a failed
    /// POST (after the single re-auth retry) abandons the cycle.
    pub async fn sync_cycle(&mut self) {
        let manifest = match self.build_manifest() {
            Ok(m) => m,
            Err(e) => {
                warn!("scan failed, skipping sync: {}", e);
                return;
            }
        };

        let operations = match self.post_manifest_with_retry(manifest).await {
            Ok(ops) => ops,
            Err(e) => {
                warn!("manifest sync failed: {}", e);
                return;
            }
        };
        info!("applying {} sync operations", operations.len());

        for op in order_operations(&self.root, operations) {
            if let Err(e) = self.apply_operation(&op).await {
                warn!(
                    "operation {:?} for '{}' failed: {}",
                    op.sync_action_type, op.relative_path, e
                );
            }
        }
    }

    /// Scan the tree and append a tombstone for every AppData path the
    /// scan no longer sees.
    fn build_manifest(&self) -> AgentResult<Vec<ManifestItem>> {
        let mut items = scan_local(&self.root)?;
        let seen: HashSet<String> = items.iter().map(|i| i.relative_path.clone()).collect();
        for path in self.app_data.paths() {
            if !seen.contains(&path) {
                debug!("detected local deletion: {}", path);
                items.push(ManifestItem {
                    relative_path: path,
                    last_modified: 0,
                    checksum: String::new(),
                    is_directory: false,
                    is_deleted: true,
                });
            }
        }
        Ok(items)
    }

    /// POST the manifest; on AUTH_FAILED invalidate the token, log in
    /// again, and retry exactly once.
    async fn post_manifest_with_retry(
        &self,
        items: Vec<ManifestItem>,
    ) -> AgentResult<Vec<SyncOperation>> {
        let token = self.auth.ensure_authenticated().await?;
        match self.client.post_manifest(&token, items.clone()).await {
            Err(AgentError::AuthFailed) => {
                info!("session expired, logging in again");
                self.auth.invalidate();
                let token = self.auth.ensure_authenticated().await?;
                self.client.post_manifest(&token, items).await
            }
            result => result,
        }
    }

    async fn apply_operation(&mut self, op: &SyncOperation) -> AgentResult<()> {
        let relative = op.relative_path.as_str();
        let local = self.root.join(relative);
        match op.sync_action_type {
            SyncAction::NoAction => {
                // Keep AppData truthful either way: the path is on the
                // server iff it is also here.
                if local.exists() {
                    self.app_data.insert(relative)?;
                } else {
                    self.app_data.remove(relative)?;
                }
            }
            SyncAction::UploadToServer => {
                let token = self.auth.ensure_authenticated().await?;
                if local.is_dir() {
                    match self.client.mkdir(&token, relative).await {
                        // An already existing directory is fine.
                        Err(AgentError::Server { status: 409, .. }) | Ok(()) => {}
                        Err(e) => return Err(e),
                    }
                } else if local.is_file() {
                    let bytes = std::fs::read(&local)?;
                    self.client.upload(&token, relative, bytes).await?;
                } else {
                    warn!("server requested upload of missing local path: {}", relative);
                    return Ok(());
                }
                self.app_data.insert(relative)?;
            }
            SyncAction::DownloadToClient => {
                self.download_to(relative, relative).await?;
                self.app_data.insert(relative)?;
            }
            SyncAction::ConflictServerWins => {
                if local.exists() {
                    let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
                    let renamed = conflict_name(relative, &timestamp);
                    info!("conflict on {}: keeping local copy as {}", relative, renamed);
                    // Both the rename-away and the incoming download are
                    // self-induced; the watcher must not see either.
                    self.ignored.add(relative);
                    self.ignored.add(&renamed);
                    std::fs::rename(&local, self.root.join(&renamed))?;
                }
                self.download_to(relative, relative).await?;
                self.app_data.insert(relative)?;
            }
            SyncAction::DeleteOnServer => {
                // The server already applied the tombstone; just forget it.
                self.app_data.remove(relative)?;
            }
            SyncAction::DeleteOnClient => {
                self.ignored.add(relative);
                if local.is_dir() {
                    std::fs::remove_dir_all(&local)?;
                } else if local.exists() {
                    std::fs::remove_file(&local)?;
                }
                self.app_data.remove(relative)?;
            }
        }
        Ok(())
    }

    /// Fetch a server file into the tree, atomically, with the watcher
    /// suppressed for the target path. Retries once on AUTH_FAILED.
    async fn download_to(&self, server_relative: &str, local_relative: &str) -> AgentResult<()> {
        let token = self.auth.ensure_authenticated().await?;
        let (bytes, checksum) = match self.client.download(&token, server_relative).await {
            Err(AgentError::AuthFailed) => {
                self.auth.invalidate();
                let token = self.auth.ensure_authenticated().await?;
                self.client.download(&token, server_relative).await?
            }
            result => result?,
        };
        if let Some(expected) = checksum {
            let actual = crate::files::bytes_checksum(&bytes);
            if actual != expected {
                return Err(AgentError::Server {
                    status: 200,
                    message: format!(
                        "checksum mismatch for {}: expected {}, got {}",
                        server_relative, expected, actual
                    ),
                });
            }
        }

        let target = self.root.join(local_relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.ignored.add(local_relative);
        let parent = target.parent().unwrap_or_else(|| self.root.as_path());
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        if let Err(e) = tmp.persist(&target) {
            self.ignored.take(local_relative);
            return Err(AgentError::Io(e.error));
        }
        debug!("downloaded {}", server_relative);
        Ok(())
    }
}

/// Directory-creating uploads first (shallowest first), everything else in
/// server order.
fn order_operations(root: &Path, operations: Vec<SyncOperation>) -> Vec<SyncOperation> {
    let (mut dir_uploads, rest): (Vec<SyncOperation>, Vec<SyncOperation>) =
        operations.into_iter().partition(|op| {
            op.sync_action_type == SyncAction::UploadToServer
                && root.join(&op.relative_path).is_dir()
        });
    dir_uploads.sort_by_key(|op| separator_count(&op.relative_path));
    dir_uploads.extend(rest);
    dir_uploads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(action: SyncAction, path: &str) -> SyncOperation {
        SyncOperation {
            sync_action_type: action,
            relative_path: path.to_string(),
        }
    }

    #[test]
    fn test_conflict_name_shapes() {
        assert_eq!(
            conflict_name("a.txt", "20250102030405"),
            "a_conflict_local_20250102030405.txt"
        );
        assert_eq!(
            conflict_name("docs/report.pdf", "20250102030405"),
            "docs/report_conflict_local_20250102030405.pdf"
        );
        assert_eq!(
            conflict_name("noext", "20250102030405"),
            "noext_conflict_local_20250102030405"
        );
    }

    #[test]
    fn test_directory_uploads_run_shallow_to_deep_before_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("a/b/c")).unwrap();
        std::fs::write(root.path().join("a/file.txt"), b"x").unwrap();

        let ops = vec![
            op(SyncAction::UploadToServer, "a/b/c"),
            op(SyncAction::UploadToServer, "a/file.txt"),
            op(SyncAction::DownloadToClient, "other.txt"),
            op(SyncAction::UploadToServer, "a"),
            op(SyncAction::UploadToServer, "a/b"),
        ];
        let ordered = order_operations(root.path(), ops);
        let paths: Vec<&str> = ordered.iter().map(|o| o.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a", "a/b", "a/b/c", "a/file.txt", "other.txt"]);
    }
}
