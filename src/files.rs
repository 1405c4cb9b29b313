//! Disk operations with metadata hooks.
//!
//! Every mutating operation resolves its target through
//! [`crate::pathsafe::resolve_safe`] first, touches the filesystem, and
//! keeps the metadata store in step. Uploads publish atomically: the bytes
//! land in a temp file in the target directory and are renamed over the
//! destination, so a concurrent reader never observes a partial file.

use crate::error::{ApiError, ApiResult};
use crate::metadata::MetadataStore;
use crate::pathsafe::resolve_safe;
use crate::protocol::ListingEntry;
use crate::time::mtime_epoch_seconds;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;

/// SHA-256 hex digest of a file's bytes, read in chunks.
pub fn file_checksum(path: &Path) -> ApiResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 hex digest of an in-memory buffer.
pub fn bytes_checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Filesystem operations beneath a per-request base directory.
#[derive(Clone)]
pub struct FileStore {
    metadata: MetadataStore,
}

impl FileStore {
    pub fn new(metadata: MetadataStore) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Write `bytes` to `base/relative` atomically and upsert metadata.
    pub fn upload(
        &self,
        base: &Path,
        relative: &str,
        bytes: &[u8],
        owner_user_id: i64,
    ) -> ApiResult<()> {
        let target = resolve_safe(base, relative)?;
        let parent = target
            .parent()
            .ok_or_else(|| ApiError::validation(format!("no parent for {}", relative)))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(&target)
            .map_err(|e| ApiError::internal(format!("publish {}: {}", target.display(), e)))?;

        let mtime = mtime_epoch_seconds(&std::fs::metadata(&target)?);
        self.metadata.upsert(
            &target.to_string_lossy(),
            &bytes_checksum(bytes),
            mtime,
            Some(owner_user_id),
            false,
        )?;
        tracing::debug!(path = %target.display(), "uploaded file");
        Ok(())
    }

    /// Read a file back; directories and missing paths are NotFound.
    pub fn download(&self, base: &Path, relative: &str) -> ApiResult<(Vec<u8>, String)> {
        let target = resolve_safe(base, relative)?;
        if !target.is_file() {
            return Err(ApiError::not_found(relative.to_string()));
        }
        let bytes = std::fs::read(&target)?;
        let checksum = bytes_checksum(&bytes);
        Ok((bytes, checksum))
    }

    /// Recursive directory creation; an existing directory is success.
    pub fn mkdir(&self, base: &Path, relative: &str, owner_user_id: i64) -> ApiResult<()> {
        let target = resolve_safe(base, relative)?;
        if target.exists() && !target.is_dir() {
            return Err(ApiError::conflict(format!(
                "path exists and is not a directory: {}",
                relative
            )));
        }
        std::fs::create_dir_all(&target)?;
        let mtime = mtime_epoch_seconds(&std::fs::metadata(&target)?);
        self.metadata.upsert(
            &target.to_string_lossy(),
            "",
            mtime,
            Some(owner_user_id),
            true,
        )?;
        Ok(())
    }

    /// Delete a file or a whole directory tree.
    ///
    /// Metadata is tombstoned before the physical removal so a crash in
    /// between leaves tombstones (re-uploadable) rather than orphan rows.
    /// Deleting a path that does not exist is success; deleting the base
    /// itself is refused.
    pub fn delete(&self, base: &Path, relative: &str) -> ApiResult<()> {
        let target = resolve_safe(base, relative)?;
        let canonical_base = base
            .canonicalize()
            .map_err(|e| ApiError::internal(format!("canonicalize base: {}", e)))?;
        if target == canonical_base {
            return Err(ApiError::validation("refusing to delete the sync root"));
        }

        let key = target.to_string_lossy().to_string();
        if target.is_dir() {
            self.metadata.tombstone_subtree(&key)?;
            std::fs::remove_dir_all(&target)?;
        } else if target.exists() {
            self.metadata.tombstone(&key)?;
            std::fs::remove_file(&target)?;
        } else {
            // Already gone on disk; make sure metadata agrees.
            self.metadata.tombstone_subtree(&key)?;
        }
        tracing::debug!(path = %target.display(), "deleted path");
        Ok(())
    }

    /// Rename within the base. The destination must not exist; its parent
    /// is created when missing.
    pub fn rename(&self, base: &Path, old_relative: &str, new_relative: &str) -> ApiResult<()> {
        let source = resolve_safe(base, old_relative)?;
        let dest = resolve_safe(base, new_relative)?;
        if !source.exists() {
            return Err(ApiError::not_found(old_relative.to_string()));
        }
        if dest.exists() {
            return Err(ApiError::conflict(format!(
                "rename destination exists: {}",
                new_relative
            )));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&source, &dest)?;
        self.metadata
            .rename_subtree(&source.to_string_lossy(), &dest.to_string_lossy())?;
        Ok(())
    }

    /// Non-recursive listing of a directory.
    pub fn list(&self, base: &Path, relative: &str) -> ApiResult<Vec<ListingEntry>> {
        let target = resolve_safe(base, relative)?;
        if !target.is_dir() {
            return Err(ApiError::not_found(relative.to_string()));
        }
        let canonical_base = base
            .canonicalize()
            .map_err(|e| ApiError::internal(format!("canonicalize base: {}", e)))?;

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&target)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let rel = entry
                .path()
                .strip_prefix(&canonical_base)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| entry.file_name().to_string_lossy().to_string());
            entries.push(ListingEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: rel,
                is_directory: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                last_modified: mtime_epoch_seconds(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
