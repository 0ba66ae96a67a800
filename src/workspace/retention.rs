//! Retention for extracted destinations
//!
//! Each archive stem owns one destination subtree under the extraction root.
//! After a successful extraction the other subtrees are evicted oldest-first
//! beyond `max_destinations`, and any older than `max_age_hours` are removed.
//! The destination just extracted is never touched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Largest accepted `max_age_hours` (100 years)
pub const MAX_AGE_HOURS: u64 = 876_000;

/// Retention policy for destination subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum number of destinations kept besides the current one (0 = unlimited)
    #[serde(default)]
    pub max_destinations: usize,
    /// Maximum age in hours (0 = unlimited)
    #[serde(default)]
    pub max_age_hours: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_destinations: 16,
            max_age_hours: 0,
        }
    }
}

impl RetentionPolicy {
    pub fn unlimited() -> Self {
        Self {
            max_destinations: 0,
            max_age_hours: 0,
        }
    }

    pub fn keep_last_n(count: usize) -> Self {
        Self {
            max_destinations: count,
            max_age_hours: 0,
        }
    }

    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            max_destinations: settings.retention.max_destinations,
            max_age_hours: settings.retention.max_age_hours,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_destinations == 0 && self.max_age_hours == 0
    }

    /// Apply the policy to the destinations under `extract_root`.
    ///
    /// `current` is exempt and does not count toward `max_destinations`.
    /// Failures to remove one destination are recorded and do not stop the
    /// pass.
    pub fn apply(&self, extract_root: &Path, current: Option<&Path>) -> io::Result<RetentionReport> {
        let mut report = RetentionReport::default();

        if !extract_root.exists() {
            return Ok(report);
        }

        let mut candidates = Vec::new();
        for entry in fs::read_dir(extract_root)? {
            let entry = entry?;
            let path = entry.path();
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            if current.is_some_and(|c| c == path) {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((path, modified));
        }
        report.scanned = candidates.len();

        if self.is_unlimited() {
            report.kept = candidates.len();
            return Ok(report);
        }

        // Newest first; ties by path for a stable order
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let now = SystemTime::now();
        let max_age = Duration::from_secs(self.max_age_hours.saturating_mul(60 * 60));

        for (index, (path, modified)) in candidates.into_iter().enumerate() {
            let over_count = self.max_destinations > 0 && index >= self.max_destinations;
            let too_old = self.max_age_hours > 0
                && now
                    .duration_since(modified)
                    .map(|age| age > max_age)
                    .unwrap_or(false);

            if !over_count && !too_old {
                report.kept += 1;
                continue;
            }

            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "evicted destination");
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to evict destination");
                    report.errors.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        Ok(report)
    }
}

/// Outcome of a retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Destinations considered (excluding the current one)
    pub scanned: usize,
    pub kept: usize,
    pub removed: Vec<PathBuf>,
    /// Non-fatal removal errors
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn make_dest(root: &Path, name: &str, age: Duration) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.txt"), name).unwrap();
        let mtime = SystemTime::now() - age;
        File::open(&dir).unwrap().set_modified(mtime).unwrap();
        dir
    }

    #[test]
    fn test_missing_root_is_empty_report() {
        let tmp = TempDir::new().unwrap();
        let report = RetentionPolicy::keep_last_n(1)
            .apply(&tmp.path().join("absent"), None)
            .unwrap();
        assert_eq!(report, RetentionReport::default());
    }

    #[test]
    fn test_count_evicts_oldest() {
        let tmp = TempDir::new().unwrap();
        let old = make_dest(tmp.path(), "old", Duration::from_secs(3000));
        let mid = make_dest(tmp.path(), "mid", Duration::from_secs(2000));
        let new = make_dest(tmp.path(), "new", Duration::from_secs(1000));
        let current = make_dest(tmp.path(), "current", Duration::from_secs(5000));

        let report = RetentionPolicy::keep_last_n(2)
            .apply(tmp.path(), Some(&current))
            .unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.kept, 2);
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(mid.exists());
        assert!(new.exists());
        assert!(current.exists());
    }

    #[test]
    fn test_age_evicts_expired() {
        let tmp = TempDir::new().unwrap();
        let stale = make_dest(tmp.path(), "stale", Duration::from_secs(3 * 3600));
        let fresh = make_dest(tmp.path(), "fresh", Duration::from_secs(60));

        let report = RetentionPolicy {
            max_destinations: 0,
            max_age_hours: 1,
        }
        .apply(tmp.path(), None).unwrap();

        assert_eq!(report.removed, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_huge_max_age_keeps_everything() {
        let tmp = TempDir::new().unwrap();
        let old = make_dest(tmp.path(), "old", Duration::from_secs(10 * 3600));

        let report = RetentionPolicy {
            max_destinations: 0,
            max_age_hours: u64::MAX,
        }
        .apply(tmp.path(), None)
        .unwrap();

        assert_eq!(report.kept, 1);
        assert!(report.removed.is_empty());
        assert!(old.exists());
    }

    #[test]
    fn test_unlimited_keeps_everything() {
        let tmp = TempDir::new().unwrap();
        make_dest(tmp.path(), "a", Duration::from_secs(10 * 3600));
        make_dest(tmp.path(), "b", Duration::from_secs(0));

        let report = RetentionPolicy::unlimited().apply(tmp.path(), None).unwrap();
        assert_eq!(report.kept, 2);
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_plain_files_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("stray.txt"), "x").unwrap();

        let report = RetentionPolicy::keep_last_n(1).apply(tmp.path(), None).unwrap();
        assert_eq!(report.scanned, 0);
        assert!(tmp.path().join("stray.txt").exists());
    }
}
