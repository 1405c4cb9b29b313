//! The persisted "known to the server" path set.
//!
//! `app_data.json` holds every relative path the agent believes exists on
//! the server. It is the sole input for detecting local deletions: a path
//! present here but absent from the scan becomes a deletion tombstone in
//! the next manifest. Saves are atomic (temp file + rename).

use crate::agent::error::AgentResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct AppDataFile {
    paths_on_server: Vec<String>,
}

pub struct AppData {
    path: PathBuf,
    paths: BTreeSet<String>,
}

impl AppData {
    /// Load from disk; a missing file starts empty, a corrupt file is
    /// logged and replaced on the next save.
    pub fn load(path: &Path) -> Self {
        let paths = match std::fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => {
                match serde_json::from_str::<AppDataFile>(&content) {
                    Ok(file) => file.paths_on_server.into_iter().collect(),
                    Err(e) => {
                        warn!("unparseable {}: {}; starting empty", path.display(), e);
                        BTreeSet::new()
                    }
                }
            }
            _ => BTreeSet::new(),
        };
        Self {
            path: path.to_path_buf(),
            paths,
        }
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.paths.contains(relative)
    }

    /// Snapshot of all recorded paths.
    pub fn paths(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }

    /// Record a path and persist. No-op when already present.
    pub fn insert(&mut self, relative: &str) -> AgentResult<()> {
        if self.paths.insert(relative.to_string()) {
            self.save()?;
        }
        Ok(())
    }

    /// Forget a path and persist. No-op when absent.
    pub fn remove(&mut self, relative: &str) -> AgentResult<()> {
        if self.paths.remove(relative) {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> AgentResult<()> {
        let file = AppDataFile {
            paths_on_server: self.paths.iter().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let data = AppData::load(&dir.path().join("app_data.json"));
        assert!(data.paths().is_empty());
    }

    #[test]
    fn test_insert_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app_data.json");
        let mut data = AppData::load(&path);
        data.insert("docs/a.txt").unwrap();
        data.insert("b.txt").unwrap();

        let reloaded = AppData::load(&path);
        assert_eq!(reloaded.paths(), vec!["b.txt", "docs/a.txt"]);
        assert!(reloaded.contains("docs/a.txt"));
    }

    #[test]
    fn test_remove_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app_data.json");
        let mut data = AppData::load(&path);
        data.insert("a.txt").unwrap();
        data.remove("a.txt").unwrap();
        let reloaded = AppData::load(&path);
        assert!(!reloaded.contains("a.txt"));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app_data.json");
        std::fs::write(&path, "{ not json").unwrap();
        let data = AppData::load(&path);
        assert!(data.paths().is_empty());
    }

    #[test]
    fn test_file_is_pretty_printed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app_data.json");
        let mut data = AppData::load(&path);
        data.insert("a.txt").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"paths_on_server\""));
        assert!(content.contains('\n'), "expected pretty-printed output");
    }
}
