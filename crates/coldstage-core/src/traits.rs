//! Repository and sink traits at the seams between components.
//!
//! The API tier, worker, and housekeeper all program against these traits;
//! `coldstage-db` provides the PostgreSQL implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ArtifactLocation, DownloadToken, Job};

/// Durable store of retrieval jobs, doubling as the dispatch queue.
///
/// Inserting a `submitted` row is the publish; [`JobStore::claim_next`] is
/// the dequeue plus the submitted→processing compare-and-set, so a job whose
/// status has already advanced (or was cancelled) can never be claimed twice.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job with status `submitted` and return its id.
    ///
    /// This is the only way new job rows come into existence.
    async fn submit(
        &self,
        user_email: &str,
        sda_path: &str,
        file_name: &str,
        source_ip: Option<&str>,
    ) -> Result<i64>;

    /// Most recent non-failed job for a (requester, collection) pair, used
    /// for the throttle window. Returns the job id and its creation time.
    async fn latest_for_requester(
        &self,
        user_email: &str,
        file_name: &str,
    ) -> Result<Option<(i64, DateTime<Utc>)>>;

    /// Claim the oldest `submitted` job, transitioning it to `processing`.
    ///
    /// Returns `None` when the queue is empty. Two workers racing on the
    /// same row cannot both claim it.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Fetch a job by id.
    async fn get(&self, job_id: i64) -> Result<Option<Job>>;

    /// CAS processing→completed, recording the artifact size in bytes.
    /// Returns `false` if the job was no longer `processing`.
    async fn complete(&self, job_id: i64, size_bytes: i64) -> Result<bool>;

    /// CAS processing→failed with a cause class.
    /// Returns `false` if the job was no longer `processing`.
    async fn fail(&self, job_id: i64, reason: &str) -> Result<bool>;

    /// CAS submitted/processing→cancelled.
    /// Returns `false` if the job was already terminal.
    async fn cancel(&self, job_id: i64) -> Result<bool>;

    /// Link an issued token and its public download URL onto a completed
    /// job row. The only mutation allowed after a terminal status.
    async fn link_token(&self, job_id: i64, token: &str, download_url: &str) -> Result<()>;

    /// Requeue `processing` jobs older than `older_than` back to
    /// `submitted`. Redelivery path for jobs orphaned by a dead worker or a
    /// failed terminal write. Returns the number of rows requeued.
    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Number of `submitted` jobs waiting for a worker.
    async fn pending_count(&self) -> Result<i64>;
}

/// Store and state machine for download tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Issue a token for a completed job.
    ///
    /// Fails with `JobNotCompleted` otherwise. Any previously active token
    /// for the job is disabled first so at most one active token exists per
    /// job.
    async fn issue(&self, job_id: i64) -> Result<DownloadToken>;

    /// Validate a token for download and consume one use.
    ///
    /// On success the guarded increment records the download and the owning
    /// job's artifact location is returned. Time- and count-overruns flip
    /// the row to `expired` as a side effect.
    async fn validate(&self, token: &str, origin: Option<&str>) -> Result<ArtifactLocation>;

    /// Fetch a token row by its opaque string.
    async fn get(&self, token: &str) -> Result<Option<DownloadToken>>;

    /// All tokens ever issued for a job, newest first.
    async fn list_for_job(&self, job_id: i64) -> Result<Vec<DownloadToken>>;

    /// Administratively disable a token.
    async fn disable(&self, token: &str) -> Result<()>;

    /// Re-enable a disabled token, provided it is not time-expired and has
    /// uses remaining.
    async fn reactivate(&self, token: &str) -> Result<()>;

    /// Periodic reconciliation: flip overdue or overused active tokens to
    /// `expired`. Returns the number of rows flipped.
    async fn expire_overdue(&self) -> Result<u64>;
}

/// Notify-and-forget sink for requester-facing messages.
///
/// Implementations must not let delivery failures propagate into job state.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// The requested archive is staged and downloadable via `link`.
    async fn job_completed(&self, user_email: &str, file_name: &str, link: &str);

    /// Retrieval failed; the requester should contact support.
    async fn job_failed(&self, user_email: &str, file_name: &str);

    /// The request was turned away because staging is at capacity.
    async fn job_rejected_capacity(&self, user_email: &str, file_name: &str);
}
