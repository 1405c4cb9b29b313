//! Filesystem time conversions.
//!
//! All timestamps on the wire and in the metadata store are integer epoch
//! seconds; comparisons happen at second precision. Every conversion from a
//! platform file time goes through here.

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// Convert a `SystemTime` to whole epoch seconds.
///
/// Times before the epoch clamp to zero; sub-second precision is dropped.
pub fn epoch_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Current wall-clock time in epoch seconds.
pub fn now_epoch_seconds() -> i64 {
    epoch_seconds(SystemTime::now())
}

/// Modification time of a file, in epoch seconds.
///
/// Falls back to the current time when the platform cannot report one.
pub fn mtime_epoch_seconds(meta: &Metadata) -> i64 {
    meta.modified()
        .map(epoch_seconds)
        .unwrap_or_else(|_| now_epoch_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_epoch_seconds_truncates_subsecond() {
        let t = UNIX_EPOCH + Duration::from_millis(1_500_000_999);
        assert_eq!(epoch_seconds(t), 1_500_000);
    }

    #[test]
    fn test_pre_epoch_clamps_to_zero() {
        let t = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(epoch_seconds(t), 0);
    }

    #[test]
    fn test_mtime_matches_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "x").unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        let now = now_epoch_seconds();
        let mtime = mtime_epoch_seconds(&meta);
        assert!((now - mtime).abs() <= 2, "mtime {} vs now {}", mtime, now);
    }
}
