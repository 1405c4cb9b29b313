//! Persistent file metadata with tombstones.
//!
//! The metadata table is the server's authoritative view of every path it
//! has ever hosted. Deletions tombstone rows instead of removing them so
//! the `version` sequence survives delete/re-upload cycles; live queries
//! must never see a tombstoned row.

use crate::db::Database;
use crate::error::ApiResult;
use crate::time::now_epoch_seconds;
use rusqlite::{params, OptionalExtension, Row};

/// One live or tombstoned metadata row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    pub file_path: String,
    pub checksum: String,
    pub last_modified: i64,
    pub version: i64,
    pub owner_user_id: Option<i64>,
    pub is_directory: bool,
    pub is_deleted: bool,
}

impl MetadataRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file_path: row.get(0)?,
            checksum: row.get(1)?,
            last_modified: row.get(2)?,
            version: row.get(3)?,
            owner_user_id: row.get(4)?,
            is_directory: row.get::<_, i64>(5)? != 0,
            is_deleted: row.get::<_, i64>(6)? != 0,
        })
    }
}

const ROW_COLUMNS: &str =
    "file_path, checksum, last_modified, version, owner_user_id, is_directory, is_deleted";

/// Store for the `file_metadata` table.
#[derive(Clone)]
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a row with `version = 1`, or on conflict bump the version,
    /// refresh content columns and clear any tombstone.
    pub fn upsert(
        &self,
        path: &str,
        checksum: &str,
        last_modified: i64,
        owner_user_id: Option<i64>,
        is_directory: bool,
    ) -> ApiResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO file_metadata \
                 (file_path, checksum, last_modified, version, owner_user_id, is_directory, is_deleted, deleted_timestamp) \
             VALUES (?1, ?2, ?3, 1, ?4, ?5, 0, NULL) \
             ON CONFLICT(file_path) DO UPDATE SET \
                 checksum = excluded.checksum, \
                 last_modified = excluded.last_modified, \
                 owner_user_id = excluded.owner_user_id, \
                 is_directory = excluded.is_directory, \
                 version = version + 1, \
                 is_deleted = 0, \
                 deleted_timestamp = NULL",
            params![path, checksum, last_modified, owner_user_id, is_directory as i64],
        )?;
        Ok(())
    }

    /// Tombstone a single live row. Idempotent: a missing or already
    /// tombstoned path is not an error.
    pub fn tombstone(&self, path: &str) -> ApiResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE file_metadata SET is_deleted = 1, deleted_timestamp = ?2 \
             WHERE file_path = ?1 AND is_deleted = 0",
            params![path, now_epoch_seconds()],
        )?;
        Ok(())
    }

    /// Tombstone `path` and every row beneath it, in one transaction.
    pub fn tombstone_subtree(&self, path: &str) -> ApiResult<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let prefix = format!("{}/", path);
        tx.execute(
            "UPDATE file_metadata SET is_deleted = 1, deleted_timestamp = ?3 \
             WHERE is_deleted = 0 \
               AND (file_path = ?1 OR substr(file_path, 1, length(?2)) = ?2)",
            params![path, prefix, now_epoch_seconds()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Rewrite the path prefix of every live row under `old` to `new`,
    /// bumping each affected row's version once.
    pub fn rename_subtree(&self, old: &str, new: &str) -> ApiResult<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let old_prefix = format!("{}/", old);
        let new_prefix = format!("{}/", new);
        // Tombstoned rows already sitting at destination paths would collide
        // with the UNIQUE(file_path) constraint; the move supersedes them.
        tx.execute(
            "DELETE FROM file_metadata \
             WHERE is_deleted = 1 \
               AND (file_path = ?1 OR substr(file_path, 1, length(?2)) = ?2)",
            params![new, new_prefix],
        )?;
        tx.execute(
            "UPDATE file_metadata \
             SET file_path = ?2 || substr(file_path, length(?1) + 1), \
                 version = version + 1 \
             WHERE is_deleted = 0 \
               AND (file_path = ?1 OR substr(file_path, 1, length(?3)) = ?3)",
            params![old, new, old_prefix],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All live rows strictly beneath `prefix`.
    pub fn query_live_under(&self, prefix: &str) -> ApiResult<Vec<MetadataRow>> {
        let conn = self.db.lock()?;
        let with_sep = format!("{}/", prefix.trim_end_matches('/'));
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_metadata \
             WHERE substr(file_path, 1, length(?1)) = ?1 AND is_deleted = 0 \
             ORDER BY file_path",
            ROW_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![with_sep], MetadataRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Look up a single live row.
    pub fn get_live(&self, path: &str) -> ApiResult<Option<MetadataRow>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM file_metadata WHERE file_path = ?1 AND is_deleted = 0",
                    ROW_COLUMNS
                ),
                params![path],
                MetadataRow::from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Look up a row regardless of tombstone state.
    pub fn get_any(&self, path: &str) -> ApiResult<Option<MetadataRow>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM file_metadata WHERE file_path = ?1", ROW_COLUMNS),
                params![path],
                MetadataRow::from_row,
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MetadataStore {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO users (username, password_hash, home_dir) VALUES ('u1', 'x', '/data/u')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO users (username, password_hash, home_dir) VALUES ('u2', 'x', '/data/user2')",
                [],
            )
            .unwrap();
        }
        MetadataStore::new(db)
    }

    #[test]
    fn test_upsert_then_overwrite_bumps_version() {
        let store = store();
        store.upsert("/data/u/a.txt", "aa", 100, Some(1), false).unwrap();
        store.upsert("/data/u/a.txt", "bb", 200, Some(1), false).unwrap();
        let row = store.get_live("/data/u/a.txt").unwrap().unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(row.checksum, "bb");
        assert_eq!(row.last_modified, 200);
    }

    #[test]
    fn test_version_survives_tombstone_resurrect() {
        let store = store();
        store.upsert("/data/u/a.txt", "aa", 100, Some(1), false).unwrap();
        store.tombstone("/data/u/a.txt").unwrap();
        assert!(store.get_live("/data/u/a.txt").unwrap().is_none());
        store.upsert("/data/u/a.txt", "cc", 300, Some(1), false).unwrap();
        let row = store.get_live("/data/u/a.txt").unwrap().unwrap();
        assert!(row.version >= 2, "resurrection must not reuse version 1");
        assert!(!row.is_deleted);
    }

    #[test]
    fn test_tombstone_is_idempotent() {
        let store = store();
        store.upsert("/data/u/a.txt", "aa", 100, None, false).unwrap();
        store.tombstone("/data/u/a.txt").unwrap();
        store.tombstone("/data/u/a.txt").unwrap();
        store.tombstone("/data/u/missing.txt").unwrap();
        let row = store.get_any("/data/u/a.txt").unwrap().unwrap();
        assert!(row.is_deleted);
    }

    #[test]
    fn test_tombstone_subtree_spares_siblings() {
        let store = store();
        store.upsert("/data/u/proj", "", 100, Some(1), true).unwrap();
        store.upsert("/data/u/proj/a.txt", "aa", 100, Some(1), false).unwrap();
        store.upsert("/data/u/proj/sub/b.txt", "bb", 100, Some(1), false).unwrap();
        store.upsert("/data/u/project.txt", "cc", 100, Some(1), false).unwrap();
        store.tombstone_subtree("/data/u/proj").unwrap();

        assert!(store.get_live("/data/u/proj").unwrap().is_none());
        assert!(store.get_live("/data/u/proj/a.txt").unwrap().is_none());
        assert!(store.get_live("/data/u/proj/sub/b.txt").unwrap().is_none());
        // A sibling sharing the string prefix but not the path prefix stays.
        assert!(store.get_live("/data/u/project.txt").unwrap().is_some());
    }

    #[test]
    fn test_query_live_under_returns_strict_descendants_only() {
        let store = store();
        store.upsert("/data/u/a.txt", "aa", 100, Some(1), false).unwrap();
        store.upsert("/data/u/sub/b.txt", "bb", 100, Some(1), false).unwrap();
        store.upsert("/data/user2/c.txt", "cc", 100, Some(2), false).unwrap();
        store.tombstone("/data/u/a.txt").unwrap();

        let rows = store.query_live_under("/data/u").unwrap();
        let paths: Vec<&str> = rows.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["/data/u/sub/b.txt"]);
        for row in &rows {
            assert!(row.file_path.starts_with("/data/u/"));
            assert!(!row.is_deleted);
        }
    }

    #[test]
    fn test_rename_subtree_rewrites_prefix_and_bumps_versions() {
        let store = store();
        store.upsert("/data/u/old", "", 100, Some(1), true).unwrap();
        store.upsert("/data/u/old/a.txt", "aa", 100, Some(1), false).unwrap();
        store.upsert("/data/u/old/a.txt", "ab", 150, Some(1), false).unwrap();
        store.rename_subtree("/data/u/old", "/data/u/new").unwrap();

        assert!(store.get_live("/data/u/old").unwrap().is_none());
        let dir = store.get_live("/data/u/new").unwrap().unwrap();
        assert!(dir.is_directory);
        assert_eq!(dir.version, 2);
        let file = store.get_live("/data/u/new/a.txt").unwrap().unwrap();
        assert_eq!(file.checksum, "ab");
        assert_eq!(file.version, 3);
    }

    #[test]
    fn test_rename_subtree_over_tombstoned_destination() {
        let store = store();
        store.upsert("/data/u/b.txt", "old", 100, Some(1), false).unwrap();
        store.tombstone("/data/u/b.txt").unwrap();
        store.upsert("/data/u/a.txt", "aa", 200, Some(1), false).unwrap();
        store.rename_subtree("/data/u/a.txt", "/data/u/b.txt").unwrap();
        let row = store.get_live("/data/u/b.txt").unwrap().unwrap();
        assert_eq!(row.checksum, "aa");
    }
}
