//! Path confinement.
//!
//! Every file operation takes a base directory plus an untrusted relative
//! path and must never touch anything outside the base. [`resolve_safe`] is
//! the single place that rule is enforced; no other module calls OS path
//! APIs with user-supplied input.

use crate::error::{ApiError, ApiResult};
use std::path::{Component, Path, PathBuf};

/// Canonicalize a path whose final segments may not exist yet.
///
/// The deepest existing ancestor is resolved through the filesystem (so
/// symlinks cannot smuggle the result outside the base) and the remaining
/// segments are appended lexically. Callers must have rejected `..`
/// segments beforehand.
pub fn weak_canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }

    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match existing.parent() {
            Some(parent) => {
                if let Some(name) = existing.file_name() {
                    tail.push(name.to_os_string());
                }
                existing = parent.to_path_buf();
                if existing.exists() {
                    break;
                }
            }
            None => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for segment in tail.iter().rev() {
        resolved.push(segment);
    }
    Ok(resolved)
}

/// Resolve `relative` beneath `base`, rejecting anything that escapes.
///
/// Rejects absolute paths, any `..` segment, and any resolution whose
/// canonical form is not `base` itself or a strict descendant of it.
/// `base` must exist and be a directory; the final segments of `relative`
/// may not exist yet (upload and mkdir targets).
pub fn resolve_safe(base: &Path, relative: &str) -> ApiResult<PathBuf> {
    let rel = Path::new(relative);
    if rel.is_absolute() {
        return Err(ApiError::validation(format!(
            "path must be relative: {}",
            relative
        )));
    }
    for component in rel.components() {
        match component {
            Component::ParentDir => {
                return Err(ApiError::validation(format!(
                    "path traversal rejected: {}",
                    relative
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ApiError::validation(format!(
                    "path must be relative: {}",
                    relative
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    if !base.is_dir() {
        return Err(ApiError::validation(format!(
            "base directory missing: {}",
            base.display()
        )));
    }

    let canonical_base = base
        .canonicalize()
        .map_err(|e| ApiError::internal(format!("canonicalize {}: {}", base.display(), e)))?;
    let resolved = weak_canonicalize(&canonical_base.join(rel))
        .map_err(|e| ApiError::validation(format!("unresolvable path {}: {}", relative, e)))?;

    if resolved == canonical_base || resolved.starts_with(&canonical_base) {
        Ok(resolved)
    } else {
        Err(ApiError::validation(format!(
            "path escapes base: {}",
            relative
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolves_nested_nonexistent_target() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_safe(dir.path(), "docs/report.pdf").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        assert!(resolved.ends_with("docs/report.pdf"));
    }

    #[test]
    fn test_empty_relative_is_base_itself() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_safe(dir.path(), "").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_rejects_parent_segments() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_safe(dir.path(), "../../etc/passwd").is_err());
        assert!(resolve_safe(dir.path(), "a/../../b").is_err());
    }

    #[test]
    fn test_rejects_absolute_path() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_safe(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn test_rejects_symlink_escape() {
        let base = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let link = base.path().join("exit");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        // The symlink resolves outside the base, so anything through it is
        // rejected even though the relative path looks innocent.
        assert!(resolve_safe(base.path(), "exit/file.txt").is_err());
    }

    #[test]
    fn test_rejects_missing_base() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        assert!(resolve_safe(&gone, "a.txt").is_err());
    }

    #[test]
    fn test_sibling_prefix_is_not_a_descendant() {
        let parent = TempDir::new().unwrap();
        let base = parent.path().join("user");
        let sibling = parent.path().join("username");
        std::fs::create_dir(&base).unwrap();
        std::fs::create_dir(&sibling).unwrap();
        // "user" is a string prefix of "username" but not a path ancestor,
        // so a symlink into the sibling must still be rejected.
        std::os::unix::fs::symlink(&sibling, base.join("s")).unwrap();
        assert!(resolve_safe(&base, "s/f.txt").is_err());
    }
}
