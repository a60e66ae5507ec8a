//! Staging-area housekeeping: age-based purge of staged artifacts with a
//! whitelist of files that are never reclaimed.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use coldstage_core::Result;

/// Outcome counters for one housekeeping pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: u64,
    pub removed: u64,
    pub whitelisted: u64,
    pub errors: u64,
    pub bytes_reclaimed: u64,
}

/// Remove staged files older than `ttl`, skipping whitelisted basenames.
///
/// Age is judged by modified time; access time is not reliably maintained on
/// the staging mount. Per-file errors are logged and counted but never abort
/// the sweep, and directories themselves are left in place.
pub fn sweep(
    root: &Path,
    ttl: Duration,
    whitelist: &HashSet<String>,
    now: DateTime<Utc>,
) -> Result<SweepStats> {
    // An unreadable sweep root is a deployment fault and fails the pass;
    // unreadable subdirectories are routine during concurrent staging
    // activity and are only counted.
    let entries = std::fs::read_dir(root)?;
    let mut stats = SweepStats::default();
    sweep_entries(root, entries, ttl, whitelist, now, &mut stats);
    info!(
        subsystem = "housekeeping",
        op = "sweep",
        examined = stats.examined,
        removed = stats.removed,
        whitelisted = stats.whitelisted,
        errors = stats.errors,
        bytes_reclaimed = stats.bytes_reclaimed,
        "Housekeeping sweep complete"
    );
    Ok(stats)
}

fn sweep_dir(
    dir: &Path,
    ttl: Duration,
    whitelist: &HashSet<String>,
    now: DateTime<Utc>,
    stats: &mut SweepStats,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(subsystem = "housekeeping", dir = %dir.display(), error = %e,
                "Cannot read directory, skipping");
            stats.errors += 1;
            return;
        }
    };
    sweep_entries(dir, entries, ttl, whitelist, now, stats);
}

fn sweep_entries(
    dir: &Path,
    entries: std::fs::ReadDir,
    ttl: Duration,
    whitelist: &HashSet<String>,
    now: DateTime<Utc>,
    stats: &mut SweepStats,
) {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(subsystem = "housekeeping", dir = %dir.display(), error = %e,
                    "Cannot read directory entry");
                stats.errors += 1;
                continue;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(subsystem = "housekeeping", path = %path.display(), error = %e,
                    "Cannot stat entry");
                stats.errors += 1;
                continue;
            }
        };

        if file_type.is_dir() {
            sweep_dir(&path, ttl, whitelist, now, stats);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        stats.examined += 1;
        let basename = entry.file_name().to_string_lossy().into_owned();
        if whitelist.contains(&basename) {
            stats.whitelisted += 1;
            continue;
        }

        match file_age(&path, now) {
            Ok(Some(age)) if age >= ttl => {
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        info!(
                            subsystem = "housekeeping",
                            op = "purge",
                            path = %path.display(),
                            age_secs = age.as_secs(),
                            size_bytes = size,
                            "Purged expired staging file"
                        );
                        stats.removed += 1;
                        stats.bytes_reclaimed += size;
                    }
                    Err(e) => {
                        warn!(subsystem = "housekeeping", path = %path.display(), error = %e,
                            "Failed to remove expired file");
                        stats.errors += 1;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(subsystem = "housekeeping", path = %path.display(), error = %e,
                    "Cannot determine file age");
                stats.errors += 1;
            }
        }
    }
}

/// Age of a file at `now`, by modified time. Returns `None` for files whose
/// mtime is in the future (clock skew on the staging mount).
fn file_age(path: &Path, now: DateTime<Utc>) -> std::io::Result<Option<Duration>> {
    let modified = std::fs::metadata(path)?.modified()?;
    let modified: DateTime<Utc> = modified.into();
    Ok((now - modified).to_std().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch_with_age(dir: &Path, name: &str, age: Duration) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"payload").unwrap();
        let mtime = std::time::SystemTime::now() - age;
        let f = fs::File::open(&path).unwrap();
        f.set_modified(mtime).unwrap();
        path
    }

    fn ttl_mins(mins: u64) -> Duration {
        Duration::from_secs(mins * 60)
    }

    #[test]
    fn test_sweep_removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch_with_age(dir.path(), "old.tar", ttl_mins(120));
        let fresh = touch_with_age(dir.path(), "fresh.tar", ttl_mins(10));

        let stats = sweep(dir.path(), ttl_mins(60), &HashSet::new(), Utc::now()).unwrap();

        assert_eq!(stats.examined, 2);
        assert_eq!(stats.removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_sweep_spares_whitelisted_basenames() {
        let dir = tempfile::tempdir().unwrap();
        let pinned = touch_with_age(dir.path(), "pinned.tar", ttl_mins(10_000));
        let whitelist: HashSet<String> = ["pinned.tar".to_string()].into_iter().collect();

        let stats = sweep(dir.path(), ttl_mins(60), &whitelist, Utc::now()).unwrap();

        assert_eq!(stats.whitelisted, 1);
        assert_eq!(stats.removed, 0);
        assert!(pinned.exists());
    }

    #[test]
    fn test_sweep_recurses_but_keeps_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("collection-a");
        fs::create_dir(&sub).unwrap();
        let nested = touch_with_age(&sub, "nested.tar", ttl_mins(120));

        let stats = sweep(dir.path(), ttl_mins(60), &HashSet::new(), Utc::now()).unwrap();

        assert_eq!(stats.removed, 1);
        assert!(!nested.exists());
        assert!(sub.is_dir());
    }

    #[test]
    fn test_sweep_counts_reclaimed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        touch_with_age(dir.path(), "old.tar", ttl_mins(120));

        let stats = sweep(dir.path(), ttl_mins(60), &HashSet::new(), Utc::now()).unwrap();

        assert_eq!(stats.bytes_reclaimed, 7);
    }

    #[test]
    fn test_future_mtime_is_never_purged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skewed.tar");
        fs::write(&path, b"payload").unwrap();
        let f = fs::File::open(&path).unwrap();
        f.set_modified(std::time::SystemTime::now() + Duration::from_secs(3600))
            .unwrap();

        let stats = sweep(dir.path(), ttl_mins(60), &HashSet::new(), Utc::now()).unwrap();

        assert_eq!(stats.removed, 0);
        assert!(path.exists());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(sweep(&missing, ttl_mins(60), &HashSet::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_empty_root_yields_zero_stats() {
        let dir = tempfile::tempdir().unwrap();
        let stats = sweep(dir.path(), ttl_mins(60), &HashSet::new(), Utc::now()).unwrap();
        assert_eq!(stats, SweepStats::default());
    }
}
