//! Access control: home-directory inheritance, explicit grants, shared
//! storage membership.
//!
//! Resolution order for [`PermissionEngine::permission_for`]: the user's
//! home seeds READ_WRITE; an explicit grant on the path or any ancestor
//! short-circuits and wins (so an explicit `none` revokes inherited
//! access); shared-storage membership merges in as a maximum.

use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::pathsafe::weak_canonicalize;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};

/// Ordered access level: `None < Read < ReadWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    None,
    Read,
    ReadWrite,
}

impl AccessLevel {
    /// Parse the persisted/wire form (`"r"`, `"rw"`, `"none"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rw" => Some(Self::ReadWrite),
            "r" => Some(Self::Read),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadWrite => "rw",
            Self::Read => "r",
            Self::None => "none",
        }
    }
}

/// Permission lookups and grants against the `permissions`,
/// `shared_storage` and `shared_access` tables.
#[derive(Clone)]
pub struct PermissionEngine {
    db: Database,
    users_root: PathBuf,
    shared_root: PathBuf,
}

impl PermissionEngine {
    pub fn new(db: Database, users_root: PathBuf, shared_root: PathBuf) -> Self {
        Self {
            db,
            users_root,
            shared_root,
        }
    }

    pub fn shared_root(&self) -> &Path {
        &self.shared_root
    }

    /// Effective access level of `user_id` on an absolute server path.
    pub fn permission_for(&self, user_id: i64, absolute_path: &Path) -> ApiResult<AccessLevel> {
        let resolved = weak_canonicalize(absolute_path)
            .map_err(|e| ApiError::validation(format!("bad path {}: {}", absolute_path.display(), e)))?;

        let home = self.home_dir(user_id)?;
        let mut highest = AccessLevel::None;
        if let Some(home) = &home {
            if resolved.starts_with(home) {
                highest = AccessLevel::ReadWrite;
            }
        }

        // Explicit grants override inheritance: the first hit walking from
        // the path toward the root is final.
        let mut current = resolved.clone();
        loop {
            if let Some(level) = self.explicit_grant(user_id, &current)? {
                return Ok(level);
            }
            let at_boundary = home.as_deref() == Some(current.as_path())
                || current == self.users_root
                || current == self.shared_root;
            match current.parent() {
                Some(parent) if !at_boundary => current = parent.to_path_buf(),
                _ => break,
            }
        }

        if resolved.starts_with(&self.shared_root) {
            if let Some(level) = self.shared_grant(user_id, &resolved)? {
                highest = highest.max(level);
            }
        }

        Ok(highest)
    }

    fn home_dir(&self, user_id: i64) -> ApiResult<Option<PathBuf>> {
        let conn = self.db.lock()?;
        let dir = conn
            .query_row(
                "SELECT home_dir FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        drop(conn);
        match dir {
            Some(d) => Ok(weak_canonicalize(Path::new(&d)).ok()),
            None => Ok(None),
        }
    }

    fn explicit_grant(&self, user_id: i64, path: &Path) -> ApiResult<Option<AccessLevel>> {
        let conn = self.db.lock()?;
        let access = conn
            .query_row(
                "SELECT access FROM permissions WHERE user_id = ?1 AND path = ?2",
                params![user_id, path.to_string_lossy()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(access.and_then(|s| AccessLevel::parse(&s)))
    }

    /// Walk from `path` up to the shared root looking for a storage the
    /// user is a member of.
    fn shared_grant(&self, user_id: i64, path: &Path) -> ApiResult<Option<AccessLevel>> {
        let conn = self.db.lock()?;
        let mut current = path.to_path_buf();
        while current != self.shared_root {
            let access = conn
                .query_row(
                    "SELECT sa.access FROM shared_access sa \
                     JOIN shared_storage ss ON sa.shared_storage_id = ss.id \
                     WHERE sa.user_id = ?1 AND ss.storage_path = ?2",
                    params![user_id, current.to_string_lossy()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            if let Some(s) = access {
                return Ok(AccessLevel::parse(&s));
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
        Ok(None)
    }

    /// Record an explicit grant, overwriting any previous one. Granting
    /// `AccessLevel::None` is an explicit revocation, not a deletion.
    pub fn grant_explicit(
        &self,
        user_id: i64,
        absolute_path: &Path,
        level: AccessLevel,
    ) -> ApiResult<()> {
        let resolved = weak_canonicalize(absolute_path)
            .map_err(|e| ApiError::validation(format!("bad path: {}", e)))?;
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO permissions (user_id, path, access) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id, path) DO UPDATE SET access = excluded.access",
            params![user_id, resolved.to_string_lossy(), level.as_str()],
        )?;
        Ok(())
    }

    /// Create a shared storage: physical directory, registry row, and an
    /// initial READ_WRITE grant for the creator.
    pub fn create_shared_storage(&self, name: &str, creator_user_id: i64) -> ApiResult<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(ApiError::validation(format!(
                "invalid storage name: {:?}",
                name
            )));
        }
        let dir = self.shared_root.join(name);
        std::fs::create_dir_all(&dir)?;
        let canonical = dir.canonicalize()?;

        {
            let conn = self.db.lock()?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO shared_storage (storage_name, storage_path) VALUES (?1, ?2)",
                params![name, canonical.to_string_lossy()],
            )?;
            if inserted == 0 {
                return Err(ApiError::conflict(format!(
                    "shared storage already exists: {}",
                    name
                )));
            }
        }
        self.grant_shared(creator_user_id, name, AccessLevel::ReadWrite)?;
        tracing::info!(name, path = %canonical.display(), "created shared storage");
        Ok(canonical)
    }

    pub fn shared_storage_path(&self, name: &str) -> ApiResult<Option<PathBuf>> {
        let conn = self.db.lock()?;
        let path = conn
            .query_row(
                "SELECT storage_path FROM shared_storage WHERE storage_name = ?1",
                params![name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(path.map(PathBuf::from))
    }

    /// Set a user's access level on a shared storage.
    pub fn grant_shared(&self, user_id: i64, storage_name: &str, level: AccessLevel) -> ApiResult<()> {
        let conn = self.db.lock()?;
        let storage_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM shared_storage WHERE storage_name = ?1",
                params![storage_name],
                |row| row.get(0),
            )
            .optional()?;
        let storage_id = storage_id.ok_or_else(|| {
            ApiError::not_found(format!("shared storage: {}", storage_name))
        })?;
        conn.execute(
            "INSERT INTO shared_access (shared_storage_id, user_id, access) VALUES (?1, ?2, ?3) \
             ON CONFLICT(shared_storage_id, user_id) DO UPDATE SET access = excluded.access",
            params![storage_id, user_id, level.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserManager;
    use tempfile::TempDir;

    struct Fixture {
        engine: PermissionEngine,
        users: UserManager,
        _root: TempDir,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let users_root = root.path().join("users");
        let shared_root = root.path().join("shared");
        std::fs::create_dir_all(&users_root).unwrap();
        std::fs::create_dir_all(&shared_root).unwrap();
        let users_root = users_root.canonicalize().unwrap();
        let shared_root = shared_root.canonicalize().unwrap();
        let db = Database::open_in_memory().unwrap();
        Fixture {
            engine: PermissionEngine::new(db.clone(), users_root.clone(), shared_root),
            users: UserManager::new(db, users_root),
            _root: root,
        }
    }

    #[test]
    fn test_home_directory_seeds_read_write() {
        let f = fixture();
        let alice = f.users.register("alice", "pw").unwrap();
        let level = f
            .engine
            .permission_for(alice.user_id, &alice.home_dir.join("docs/a.txt"))
            .unwrap();
        assert_eq!(level, AccessLevel::ReadWrite);
    }

    #[test]
    fn test_foreign_home_is_none() {
        let f = fixture();
        let alice = f.users.register("alice", "pw").unwrap();
        let bob = f.users.register("bob", "pw").unwrap();
        let level = f
            .engine
            .permission_for(alice.user_id, &bob.home_dir.join("secret.txt"))
            .unwrap();
        assert_eq!(level, AccessLevel::None);
    }

    #[test]
    fn test_explicit_none_revokes_inherited_access() {
        let f = fixture();
        let alice = f.users.register("alice", "pw").unwrap();
        let sub = alice.home_dir.join("frozen");
        std::fs::create_dir_all(&sub).unwrap();
        f.engine
            .grant_explicit(alice.user_id, &sub, AccessLevel::None)
            .unwrap();
        let level = f
            .engine
            .permission_for(alice.user_id, &sub.join("file.txt"))
            .unwrap();
        assert_eq!(level, AccessLevel::None);
        // Outside the revoked subtree, home inheritance still applies.
        let level = f
            .engine
            .permission_for(alice.user_id, &alice.home_dir.join("other.txt"))
            .unwrap();
        assert_eq!(level, AccessLevel::ReadWrite);
    }

    #[test]
    fn test_explicit_grant_on_foreign_path() {
        let f = fixture();
        let alice = f.users.register("alice", "pw").unwrap();
        let bob = f.users.register("bob", "pw").unwrap();
        let shared_docs = bob.home_dir.join("docs");
        std::fs::create_dir_all(&shared_docs).unwrap();
        f.engine
            .grant_explicit(alice.user_id, &shared_docs, AccessLevel::Read)
            .unwrap();
        let level = f
            .engine
            .permission_for(alice.user_id, &shared_docs.join("report.pdf"))
            .unwrap();
        assert_eq!(level, AccessLevel::Read);
    }

    #[test]
    fn test_shared_storage_membership() {
        let f = fixture();
        let alice = f.users.register("alice", "pw").unwrap();
        let bob = f.users.register("bob", "pw").unwrap();
        let storage = f
            .engine
            .create_shared_storage("project_alpha", alice.user_id)
            .unwrap();

        // Creator gets READ_WRITE, members what they are granted, everyone
        // else nothing.
        assert_eq!(
            f.engine
                .permission_for(alice.user_id, &storage.join("plan.md"))
                .unwrap(),
            AccessLevel::ReadWrite
        );
        assert_eq!(
            f.engine
                .permission_for(bob.user_id, &storage.join("plan.md"))
                .unwrap(),
            AccessLevel::None
        );
        f.engine
            .grant_shared(bob.user_id, "project_alpha", AccessLevel::Read)
            .unwrap();
        assert_eq!(
            f.engine
                .permission_for(bob.user_id, &storage.join("plan.md"))
                .unwrap(),
            AccessLevel::Read
        );
    }

    #[test]
    fn test_duplicate_storage_name_conflicts() {
        let f = fixture();
        let alice = f.users.register("alice", "pw").unwrap();
        f.engine
            .create_shared_storage("project_alpha", alice.user_id)
            .unwrap();
        let err = f
            .engine
            .create_shared_storage("project_alpha", alice.user_id)
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn test_grant_on_unknown_storage_is_not_found() {
        let f = fixture();
        let alice = f.users.register("alice", "pw").unwrap();
        let err = f
            .engine
            .grant_shared(alice.user_id, "nope", AccessLevel::Read)
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
