//! Staging-area manager: capacity queries and cache lookups for the shared
//! staging filesystem.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use coldstage_core::{Result, StagingConfig};

/// Default delay between the two size probes of a cache lookup.
const STABILITY_PROBE: Duration = Duration::from_secs(2);

/// Manager for the staging filesystem under a single mount point.
///
/// The capacity check is advisory, not a reservation: two workers may both
/// pass it before either writes. Retrievals are minutes-to-hours long while
/// the check is instantaneous, so the window is accepted.
#[derive(Clone)]
pub struct StagingArea {
    config: StagingConfig,
    stability_probe: Duration,
}

impl StagingArea {
    pub fn new(config: StagingConfig) -> Self {
        Self {
            config,
            stability_probe: STABILITY_PROBE,
        }
    }

    /// Override the cache-lookup probe delay (tests).
    pub fn with_stability_probe(mut self, probe: Duration) -> Self {
        self.stability_probe = probe;
        self
    }

    /// Staging root path.
    pub fn root(&self) -> &std::path::Path {
        &self.config.root
    }

    /// Configured usage ceiling in bytes.
    pub fn threshold_bytes(&self) -> u64 {
        self.config.threshold_bytes
    }

    /// Absolute path an artifact with this name is staged at.
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.config.root.join(file_name)
    }

    /// Aggregate size of top-level entries under the staging root, in bytes.
    pub async fn current_usage(&self) -> Result<u64> {
        let mut size = 0u64;
        let mut entries = tokio::fs::read_dir(&self.config.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            match entry.metadata().await {
                Ok(meta) => size += meta.len(),
                // Entry removed between listing and stat; housekeeping and
                // workers churn this directory continuously.
                Err(e) => debug!(
                    subsystem = "staging",
                    entry = %entry.path().display(),
                    error = %e,
                    "Skipping unreadable staging entry"
                ),
            }
        }
        Ok(size)
    }

    /// Whether usage is strictly below the threshold. Usage at or above the
    /// ceiling blocks new retrievals; it never evicts existing data.
    pub async fn has_capacity(&self) -> Result<bool> {
        let usage = self.current_usage().await?;
        let capacity = usage < self.config.threshold_bytes;
        debug!(
            subsystem = "staging",
            op = "capacity_check",
            usage_bytes = usage,
            threshold_bytes = self.config.threshold_bytes,
            capacity,
            "Checked staging usage"
        );
        Ok(capacity)
    }

    /// Look for an already-staged copy of the artifact.
    ///
    /// A hit requires the file to exist with a nonzero size that is stable
    /// across a short probe interval (a zero or moving size means another
    /// worker is mid-download). On a hit the modified time is refreshed so
    /// the housekeeping TTL restarts.
    pub async fn cache_lookup(&self, file_name: &str) -> Result<Option<PathBuf>> {
        let path = self.artifact_path(file_name);

        let first = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(None),
        };
        if first == 0 {
            return Ok(None);
        }

        tokio::time::sleep(self.stability_probe).await;

        let second = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            // Removed in the interim, e.g. by a housekeeping sweep.
            Err(_) => return Ok(None),
        };
        if second != first {
            debug!(
                subsystem = "staging",
                file_name,
                "Staged file still growing, treating as cache miss"
            );
            return Ok(None);
        }

        // Restart the TTL clock on the cached artifact.
        if let Err(e) = std::fs::File::open(&path).and_then(|f| f.set_modified(SystemTime::now())) {
            warn!(
                subsystem = "staging",
                file_name,
                error = %e,
                "Could not refresh modified time on cached artifact"
            );
        }

        debug!(subsystem = "staging", file_name, "Staging cache hit");
        Ok(Some(path))
    }
}
