//! Line-oriented `key=value` agent configuration.
//!
//! Recognized keys: `server_url`, `username`, `password`, `watcher_root`.
//! The watcher root must be an absolute, existing directory the agent can
//! both read and write; anything less is fatal at startup.

use crate::agent::error::{AgentError, AgentResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub watcher_root: PathBuf,
}

fn parse_lines(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

fn required(map: &HashMap<String, String>, key: &str) -> AgentResult<String> {
    map.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| AgentError::config(format!("missing '{}' in config", key)))
}

impl AgentConfig {
    /// Load and validate the config file.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let map = parse_lines(&content);

        let watcher_root = PathBuf::from(required(&map, "watcher_root")?);
        if !watcher_root.is_absolute() {
            return Err(AgentError::config("watcher_root must be an absolute path"));
        }
        if !watcher_root.is_dir() {
            return Err(AgentError::config(format!(
                "watcher_root does not exist or is not a directory: {}",
                watcher_root.display()
            )));
        }
        // Probe readability and writability up front; losing either later
        // is also fatal, but this catches the common misconfiguration.
        std::fs::read_dir(&watcher_root).map_err(|e| {
            AgentError::config(format!(
                "watcher_root is not readable: {}: {}",
                watcher_root.display(),
                e
            ))
        })?;
        tempfile::tempfile_in(&watcher_root).map_err(|e| {
            AgentError::config(format!(
                "watcher_root is not writable: {}: {}",
                watcher_root.display(),
                e
            ))
        })?;

        Ok(Self {
            server_url: required(&map, "server_url")?,
            username: required(&map, "username")?,
            password: required(&map, "password")?,
            watcher_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, root: &Path) -> PathBuf {
        let path = dir.path().join("config");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# agent settings").unwrap();
        writeln!(f, "server_url = http://localhost:3000").unwrap();
        writeln!(f, "username=alice").unwrap();
        writeln!(f, "password=secret").unwrap();
        writeln!(f, "watcher_root={}", root.display()).unwrap();
        path
    }

    #[test]
    fn test_load_parses_and_trims() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, dir.path());
        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.server_url, "http://localhost:3000");
        assert_eq!(config.username, "alice");
        assert_eq!(config.password, "secret");
        assert_eq!(config.watcher_root, dir.path());
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "server_url=http://x\nusername=a\n").unwrap();
        let err = AgentConfig::load(&path).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = AgentConfig::load(Path::new("/nonexistent/config")).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_relative_watcher_root_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "server_url=http://x\nusername=a\npassword=b\nwatcher_root=relative/dir\n",
        )
        .unwrap();
        let err = AgentConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_missing_watcher_root_dir_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            format!(
                "server_url=http://x\nusername=a\npassword=b\nwatcher_root={}\n",
                dir.path().join("gone").display()
            ),
        )
        .unwrap();
        assert!(AgentConfig::load(&path).is_err());
    }
}
