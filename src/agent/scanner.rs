//! Local tree scan producing manifest entries.

use crate::agent::error::AgentResult;
use crate::files::file_checksum;
use crate::protocol::ManifestItem;
use crate::time::mtime_epoch_seconds;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Walk `root` and describe every live file and directory.
///
/// Files carry their SHA-256 digest and mtime; directories carry
/// `is_directory` and no checksum. Entries that vanish or error mid-scan
/// are skipped with a warning so one bad path never aborts a sync cycle.
pub fn scan_local(root: &Path) -> AgentResult<Vec<ManifestItem>> {
    let mut items = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("scan skipping entry: {}", e);
                continue;
            }
        };
        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("scan skipping {}: {}", relative, e);
                continue;
            }
        };

        if meta.is_dir() {
            items.push(ManifestItem {
                relative_path: relative,
                last_modified: mtime_epoch_seconds(&meta),
                checksum: String::new(),
                is_directory: true,
                is_deleted: false,
            });
        } else if meta.is_file() {
            let checksum = match file_checksum(entry.path()) {
                Ok(c) => c,
                Err(e) => {
                    warn!("scan skipping {}: {}", relative, e);
                    continue;
                }
            };
            items.push(ManifestItem {
                relative_path: relative,
                last_modified: mtime_epoch_seconds(&meta),
                checksum,
                is_directory: false,
                is_deleted: false,
            });
        }
        // Symlinks and other special files are not synchronized.
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::bytes_checksum;
    use tempfile::TempDir;

    #[test]
    fn test_scan_lists_files_and_directories() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("proj/sub")).unwrap();
        std::fs::write(root.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(root.path().join("proj/readme.md"), b"readme").unwrap();

        let mut items = scan_local(root.path()).unwrap();
        items.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let paths: Vec<&str> = items.iter().map(|i| i.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["notes.txt", "proj", "proj/readme.md", "proj/sub"]);

        let notes = &items[0];
        assert!(!notes.is_directory);
        assert_eq!(notes.checksum, bytes_checksum(b"hello"));
        assert!(notes.last_modified > 0);

        let proj = &items[1];
        assert!(proj.is_directory);
        assert_eq!(proj.checksum, "");
    }

    #[test]
    fn test_scan_excludes_root_itself() {
        let root = TempDir::new().unwrap();
        let items = scan_local(root.path()).unwrap();
        assert!(items.is_empty());
    }
}
