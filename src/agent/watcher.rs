//! Filesystem watching with rename correlation.
//!
//! A `notify` watcher observes the root recursively and feeds raw events
//! into a classifier that pairs MOVED_FROM/MOVED_TO by their rename
//! tracker (the inotify cookie), suppresses one-shot ignored paths, and
//! forwards a small event vocabulary to the coordinator over a bounded
//! channel. A reaper expires unpaired rename stashes after two seconds.
//!
//! MODIFY events are observed but never forwarded; CLOSE_WRITE is the
//! content-change signal.

use crate::agent::error::{AgentError, AgentResult};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Unpaired rename stashes expire into MOVED_FROM after this long.
pub const PENDING_RENAME_TTL: Duration = Duration::from_secs(2);

/// Events handed to the coordinator. Paths are relative to the watch root,
/// forward-slash form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared (directory creations are not forwarded; the scanner
    /// surfaces those).
    Created(String),
    /// A file or directory was removed.
    Removed(String),
    /// A writer closed the file; the content-change signal.
    Written(String),
    /// A correlated rename inside the watched tree.
    Renamed { from: String, to: String },
    /// Rename source whose destination never showed up (moved out of the
    /// tree, or the pair window expired).
    MovedFrom(String),
    /// Rename destination with no matching source (moved into the tree).
    MovedTo(String),
    /// The kernel queue overflowed; the next sync must rescan everything.
    RescanNeeded,
}

/// One-shot suppression of self-induced events.
///
/// The coordinator adds a path just before it writes, renames or deletes
/// locally on the server's behalf; the watcher consumes the entry the
/// first time that path shows up and drops the event.
#[derive(Default)]
pub struct IgnoreSet {
    paths: Mutex<HashSet<String>>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, relative: &str) {
        self.paths.lock().expect("ignore mutex").insert(relative.to_string());
    }

    /// Remove and report whether the path was present.
    pub fn take(&self, relative: &str) -> bool {
        self.paths.lock().expect("ignore mutex").remove(relative)
    }
}

struct PendingRename {
    old_relative: String,
    stashed_at: Instant,
}

/// Classifier state: the rename-cookie stash plus the shared ignore set.
pub(crate) struct WatcherState {
    root: PathBuf,
    ignored: Arc<IgnoreSet>,
    pending: HashMap<usize, PendingRename>,
}

impl WatcherState {
    fn new(root: PathBuf, ignored: Arc<IgnoreSet>) -> Self {
        Self {
            root,
            ignored,
            pending: HashMap::new(),
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .filter(|rel| !rel.is_empty())
    }

    /// Classify one raw event into zero or more watch events.
    fn classify(&mut self, event: Event, out: &mut Vec<WatchEvent>) {
        if event.need_rescan() {
            warn!("event queue overflowed, requesting rescan");
            out.push(WatchEvent::RescanNeeded);
            return;
        }

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // The backend paired the rename itself: paths are [from, to].
                if event.paths.len() == 2 {
                    let from = self.relative(&event.paths[0]);
                    let to = self.relative(&event.paths[1]);
                    if let (Some(from), Some(to)) = (from, to) {
                        let ignored_from = self.ignored.take(&from);
                        let ignored_to = self.ignored.take(&to);
                        if ignored_from || ignored_to {
                            debug!("suppressed self-induced rename {} -> {}", from, to);
                        } else {
                            out.push(WatchEvent::Renamed { from, to });
                        }
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    let Some(rel) = self.relative(path) else { continue };
                    if self.ignored.take(&rel) {
                        debug!("suppressed self-induced move-from {}", rel);
                        continue;
                    }
                    match event.attrs.tracker() {
                        Some(cookie) => {
                            self.pending.insert(
                                cookie,
                                PendingRename {
                                    old_relative: rel,
                                    stashed_at: Instant::now(),
                                },
                            );
                        }
                        None => out.push(WatchEvent::MovedFrom(rel)),
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    let Some(rel) = self.relative(path) else { continue };
                    if self.ignored.take(&rel) {
                        debug!("suppressed self-induced move-to {}", rel);
                        continue;
                    }
                    let paired = event
                        .attrs
                        .tracker()
                        .and_then(|cookie| self.pending.remove(&cookie));
                    match paired {
                        Some(pending) => out.push(WatchEvent::Renamed {
                            from: pending.old_relative,
                            to: rel,
                        }),
                        None => out.push(WatchEvent::MovedTo(rel)),
                    }
                }
            }
            EventKind::Create(kind) => {
                for path in &event.paths {
                    let Some(rel) = self.relative(path) else { continue };
                    if self.ignored.take(&rel) {
                        debug!("suppressed self-induced create {}", rel);
                        continue;
                    }
                    let is_dir = matches!(kind, CreateKind::Folder) || path.is_dir();
                    if !is_dir {
                        out.push(WatchEvent::Created(rel));
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    let Some(rel) = self.relative(path) else { continue };
                    if self.ignored.take(&rel) {
                        debug!("suppressed self-induced remove {}", rel);
                        continue;
                    }
                    out.push(WatchEvent::Removed(rel));
                }
            }
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                for path in &event.paths {
                    let Some(rel) = self.relative(path) else { continue };
                    if self.ignored.take(&rel) {
                        debug!("suppressed self-induced write {}", rel);
                        continue;
                    }
                    out.push(WatchEvent::Written(rel));
                }
            }
            // Plain modifications are noise between open and close-write.
            EventKind::Modify(_) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
    }

    /// Expire rename stashes older than the TTL into MOVED_FROM events.
    fn reap(&mut self, now: Instant, out: &mut Vec<WatchEvent>) {
        let expired: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.stashed_at) >= PENDING_RENAME_TTL)
            .map(|(cookie, _)| *cookie)
            .collect();
        for cookie in expired {
            if let Some(pending) = self.pending.remove(&cookie) {
                debug!("rename cookie {} expired: {}", cookie, pending.old_relative);
                out.push(WatchEvent::MovedFrom(pending.old_relative));
            }
        }
    }
}

/// Watch `root` recursively until `running` clears or the receiver drops.
///
/// Returns an error only when the watcher cannot attach to the root, which
/// callers treat as fatal.
pub async fn watcher_task(
    root: PathBuf,
    tx: mpsc::Sender<WatchEvent>,
    ignored: Arc<IgnoreSet>,
    running: Arc<AtomicBool>,
) -> AgentResult<()> {
    let (notify_tx, mut notify_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = notify_tx.blocking_send(res);
        },
        notify::Config::default(),
    )
    .map_err(|e| AgentError::watcher(format!("create watcher: {}", e)))?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| AgentError::watcher(format!("watch {}: {}", root.display(), e)))?;
    info!("watching {}", root.display());

    let mut state = WatcherState::new(root, ignored);
    // Ticking every second keeps the shutdown flag responsive; stash
    // expiry itself is governed by PENDING_RENAME_TTL.
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut out = Vec::new();

    loop {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        out.clear();
        tokio::select! {
            maybe = notify_rx.recv() => match maybe {
                Some(Ok(event)) => state.classify(event, &mut out),
                Some(Err(e)) => warn!("watcher error: {}", e),
                None => break,
            },
            _ = tick.tick() => state.reap(Instant::now(), &mut out),
        }
        for event in out.drain(..) {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}
