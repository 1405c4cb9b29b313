//! SQLite database handle and schema.
//!
//! The connection is shared behind a mutex; callers hold it only across the
//! statements of a single logical operation, never across other I/O.
//! Composite updates run inside one transaction.

use crate::error::{ApiError, ApiResult};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        home_dir TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS permissions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        access TEXT NOT NULL,
        UNIQUE (user_id, path),
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS shared_storage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        storage_name TEXT UNIQUE NOT NULL,
        storage_path TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS shared_access (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        shared_storage_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        access TEXT NOT NULL,
        UNIQUE (shared_storage_id, user_id),
        FOREIGN KEY (shared_storage_id) REFERENCES shared_storage(id) ON DELETE CASCADE,
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS file_metadata (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path TEXT UNIQUE NOT NULL,
        checksum TEXT NOT NULL DEFAULT '',
        last_modified INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 1,
        owner_user_id INTEGER,
        is_directory INTEGER NOT NULL DEFAULT 0,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        deleted_timestamp INTEGER,
        FOREIGN KEY (owner_user_id) REFERENCES users(id) ON DELETE SET NULL
    );

    CREATE INDEX IF NOT EXISTS idx_file_metadata_path_deleted
        ON file_metadata (file_path, is_deleted);
";

/// Shared handle to the server database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open(path: &Path) -> ApiResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> ApiResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> ApiResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection for one logical operation.
    pub fn lock(&self) -> ApiResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ApiError::internal("database mutex poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initializes_and_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        // Re-running the schema must not fail.
        conn.execute_batch(SCHEMA).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('users', 'permissions', 'shared_storage', 'shared_access', 'file_metadata')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/nested/meta.db");
        let _db = Database::open(&path).unwrap();
        assert!(path.exists());
    }
}
