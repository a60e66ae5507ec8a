//! Domain models for coldstage: retrieval jobs and download tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a retrieval job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Submitted,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// String form stored in the `job_status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the stored string form. Unknown values map to `Failed` so a
    /// corrupted row can never be claimed or mutated further.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "submitted" => JobStatus::Submitted,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    /// Whether the job can never change status again (token linkage aside).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Transitions only move forward; `cancelled` is reachable from
    /// `submitted` or `processing` only.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Submitted, JobStatus::Processing) => true,
            (JobStatus::Submitted, JobStatus::Cancelled) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// One retrieval request against the tape-backed archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned monotonic identifier.
    pub job_id: i64,
    pub user_email: String,
    pub status: JobStatus,
    /// Artifact size in bytes; unknown until retrieval completes.
    pub job_size: Option<i64>,
    /// Basename of the requested collection; also the staged artifact name.
    pub file_name: String,
    /// Full archive path the retrieval utility is asked for.
    pub sda_path: String,
    /// Origin address recorded at intake.
    pub source_ip: Option<String>,
    /// Cause class recorded on failure (e.g. `staging_full`).
    pub failure_reason: Option<String>,
    /// Token string linked after completion.
    pub token: Option<String>,
    /// Public download URL; set once a token is linked.
    pub download_url: Option<String>,
    pub created_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

// =============================================================================
// TOKEN TYPES
// =============================================================================

/// Status of a download token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Expired,
    Disabled,
}

impl TokenStatus {
    /// String form stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Expired => "expired",
            TokenStatus::Disabled => "disabled",
        }
    }

    /// Parse the stored string form; unknown values map to `Expired`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "active" => TokenStatus::Active,
            "expired" => TokenStatus::Expired,
            "disabled" => TokenStatus::Disabled,
            _ => TokenStatus::Expired,
        }
    }
}

/// One capability to fetch a completed job's staged artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadToken {
    pub token_id: i64,
    /// Opaque 32-character hex token string.
    pub token: String,
    pub job_id: i64,
    pub status: TokenStatus,
    pub download_count: i32,
    pub max_downloads: i32,
    pub created_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_download_time: Option<DateTime<Utc>>,
    pub last_download_ip: Option<String>,
}

impl DownloadToken {
    /// Whether the token should be flipped to `expired`, evaluated lazily
    /// at validation time and reconciled by the periodic sweep.
    pub fn should_expire(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at || self.download_count >= self.max_downloads
    }

    /// Uses left before the count limit trips.
    pub fn remaining_downloads(&self) -> i32 {
        (self.max_downloads - self.download_count).max(0)
    }
}

/// Artifact location handed back by a successful token validation.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactLocation {
    pub job_id: i64,
    /// Staged artifact name under the staging root.
    pub file_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Submitted,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str_lossy(status.as_str()), status);
        }
    }

    #[test]
    fn test_job_status_unknown_maps_to_failed() {
        assert_eq!(JobStatus::from_str_lossy("garbage"), JobStatus::Failed);
    }

    #[test]
    fn test_job_status_forward_transitions() {
        assert!(JobStatus::Submitted.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_job_status_cancelled_reachable_from_submitted_and_processing_only() {
        assert!(JobStatus::Submitted.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_job_status_never_regresses() {
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Submitted));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Submitted));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Submitted).unwrap(),
            "\"submitted\""
        );
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"cancelled\"").unwrap(),
            JobStatus::Cancelled
        );
    }

    fn sample_token(count: i32, max: i32, expires_in: Duration) -> DownloadToken {
        let now = Utc::now();
        DownloadToken {
            token_id: 1,
            token: "a".repeat(32),
            job_id: 42,
            status: TokenStatus::Active,
            download_count: count,
            max_downloads: max,
            created_time: now,
            expires_at: now + expires_in,
            last_download_time: None,
            last_download_ip: None,
        }
    }

    #[test]
    fn test_token_should_expire_by_time() {
        let token = sample_token(0, 3, Duration::hours(-1));
        assert!(token.should_expire(Utc::now()));
    }

    #[test]
    fn test_token_should_expire_by_count() {
        let token = sample_token(3, 3, Duration::hours(24));
        assert!(token.should_expire(Utc::now()));
    }

    #[test]
    fn test_token_not_expired_with_uses_and_time_left() {
        let token = sample_token(2, 3, Duration::hours(24));
        assert!(!token.should_expire(Utc::now()));
        assert_eq!(token.remaining_downloads(), 1);
    }

    #[test]
    fn test_token_remaining_downloads_never_negative() {
        let token = sample_token(5, 3, Duration::hours(24));
        assert_eq!(token.remaining_downloads(), 0);
    }
}
