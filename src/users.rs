//! User accounts: registration, login, home directories.

use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// One row of the `users` table.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub home_dir: PathBuf,
}

/// Account management over the `users` table and the per-user home
/// directories beneath the configured users root.
#[derive(Clone)]
pub struct UserManager {
    db: Database,
    users_root: PathBuf,
}

fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    format!("{:x}", digest)
}

fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

impl UserManager {
    pub fn new(db: Database, users_root: PathBuf) -> Self {
        Self { db, users_root }
    }

    pub fn users_root(&self) -> &Path {
        &self.users_root
    }

    /// Create an account and its home directory.
    ///
    /// The home directory is created before the row is inserted so a failed
    /// insert never leaves an account without a directory.
    pub fn register(&self, username: &str, password: &str) -> ApiResult<UserRecord> {
        if !valid_username(username) {
            return Err(ApiError::validation(format!(
                "invalid username: {:?}",
                username
            )));
        }
        if password.is_empty() {
            return Err(ApiError::validation("password must not be empty"));
        }

        if self.find_by_username(username)?.is_some() {
            return Err(ApiError::conflict(format!(
                "username already taken: {}",
                username
            )));
        }

        let home_dir = self.users_root.join(username);
        std::fs::create_dir_all(&home_dir)?;
        let home_dir = home_dir.canonicalize()?;

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO users (username, password_hash, home_dir) VALUES (?1, ?2, ?3)",
            params![
                username,
                hash_password(password),
                home_dir.to_string_lossy()
            ],
        )?;
        let user_id = conn.last_insert_rowid();
        tracing::info!(user_id, username, "registered user");
        Ok(UserRecord {
            user_id,
            username: username.to_string(),
            home_dir,
        })
    }

    /// Verify credentials; `ApiError::Auth` on any mismatch.
    pub fn login(&self, username: &str, password: &str) -> ApiResult<UserRecord> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT id, password_hash, home_dir FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((user_id, stored_hash, home_dir)) if stored_hash == hash_password(password) => {
                Ok(UserRecord {
                    user_id,
                    username: username.to_string(),
                    home_dir: PathBuf::from(home_dir),
                })
            }
            _ => Err(ApiError::Auth),
        }
    }

    pub fn find_by_username(&self, username: &str) -> ApiResult<Option<UserRecord>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT id, home_dir FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(user_id, home_dir)| UserRecord {
            user_id,
            username: username.to_string(),
            home_dir: PathBuf::from(home_dir),
        }))
    }

    /// Remove an account. Permissions and shared grants cascade; metadata
    /// ownership is nulled by the schema's foreign keys.
    pub fn delete(&self, user_id: i64) -> ApiResult<()> {
        let conn = self.db.lock()?;
        conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (UserManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        (UserManager::new(db, dir.path().to_path_buf()), dir)
    }

    #[test]
    fn test_register_creates_home_dir() {
        let (users, _dir) = manager();
        let rec = users.register("alice", "secret").unwrap();
        assert!(rec.home_dir.is_dir());
        assert!(rec.home_dir.ends_with("alice"));
    }

    #[test]
    fn test_duplicate_username_conflicts() {
        let (users, _dir) = manager();
        users.register("alice", "secret").unwrap();
        let err = users.register("alice", "other").unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn test_login_checks_password() {
        let (users, _dir) = manager();
        users.register("alice", "secret").unwrap();
        assert!(users.login("alice", "secret").is_ok());
        assert!(matches!(users.login("alice", "wrong"), Err(ApiError::Auth)));
        assert!(matches!(users.login("bob", "secret"), Err(ApiError::Auth)));
    }

    #[test]
    fn test_deleted_account_cannot_log_in() {
        let (users, _dir) = manager();
        let rec = users.register("alice", "secret").unwrap();
        users.delete(rec.user_id).unwrap();
        assert!(matches!(users.login("alice", "secret"), Err(ApiError::Auth)));
    }

    #[test]
    fn test_rejects_path_shaped_usernames() {
        let (users, _dir) = manager();
        assert!(users.register("../evil", "x").is_err());
        assert!(users.register("a/b", "x").is_err());
        assert!(users.register("", "x").is_err());
    }
}
