//! In-memory store implementations for tests.
//!
//! Always compiled so integration tests in dependent crates can drive the
//! intake and worker paths without a live PostgreSQL instance. These mirror
//! the PostgreSQL semantics: compare-and-set transitions, single-claim
//! dispatch, and guarded token consumption.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::TokenConfig;
use crate::error::{Error, Result};
use crate::models::{ArtifactLocation, DownloadToken, Job, JobStatus, TokenStatus};
use crate::token::generate_token;
use crate::traits::{JobStore, Notifier, TokenStore};

/// In-memory [`JobStore`] with CAS semantics matching the Pg implementation.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryJobs>,
}

#[derive(Default)]
struct MemoryJobs {
    next_id: i64,
    jobs: HashMap<i64, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct status override, for arranging test scenarios.
    pub fn set_status(&self, job_id: i64, status: JobStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = status;
        }
    }

    /// Snapshot of one job, for assertions.
    pub fn snapshot(&self, job_id: i64) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(&job_id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn submit(
        &self,
        user_email: &str,
        sda_path: &str,
        file_name: &str,
        source_ip: Option<&str>,
    ) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let job_id = inner.next_id;
        let now = Utc::now();
        inner.jobs.insert(
            job_id,
            Job {
                job_id,
                user_email: user_email.to_string(),
                status: JobStatus::Submitted,
                job_size: None,
                file_name: file_name.to_string(),
                sda_path: sda_path.to_string(),
                source_ip: source_ip.map(String::from),
                failure_reason: None,
                token: None,
                download_url: None,
                created_time: now,
                update_time: now,
            },
        );
        Ok(job_id)
    }

    async fn latest_for_requester(
        &self,
        user_email: &str,
        file_name: &str,
    ) -> Result<Option<(i64, DateTime<Utc>)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .filter(|j| {
                j.user_email == user_email
                    && j.file_name == file_name
                    && j.status != JobStatus::Failed
            })
            .max_by_key(|j| j.created_time)
            .map(|j| (j.job_id, j.created_time)))
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().unwrap();
        let candidate = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Submitted)
            .min_by_key(|j| j.created_time)
            .map(|j| j.job_id);
        if let Some(job_id) = candidate {
            let job = inner.jobs.get_mut(&job_id).unwrap();
            job.status = JobStatus::Processing;
            job.update_time = Utc::now();
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    async fn get(&self, job_id: i64) -> Result<Option<Job>> {
        Ok(self.inner.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn complete(&self, job_id: i64, size_bytes: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Completed;
                job.job_size = Some(size_bytes);
                job.update_time = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, job_id: i64, reason: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Failed;
                job.failure_reason = Some(reason.to_string());
                job.update_time = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel(&self, job_id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(&job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.update_time = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn link_token(&self, job_id: i64, token: &str, download_url: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Completed => {
                job.token = Some(token.to_string());
                job.download_url = Some(download_url.to_string());
                Ok(())
            }
            Some(_) => Err(Error::JobNotCompleted(job_id)),
            None => Err(Error::NotFound(format!("job {job_id}"))),
        }
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut requeued = 0;
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.update_time < older_than {
                job.status = JobStatus::Submitted;
                job.update_time = Utc::now();
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn pending_count(&self) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Submitted)
            .count() as i64)
    }
}

/// In-memory [`TokenStore`] backed by a [`MemoryJobStore`]-compatible job map.
///
/// Job lookups (completion checks, artifact locations) are resolved through
/// the shared job store handle.
pub struct MemoryTokenStore {
    jobs: std::sync::Arc<MemoryJobStore>,
    config: TokenConfig,
    inner: Mutex<MemoryTokens>,
}

#[derive(Default)]
struct MemoryTokens {
    next_id: i64,
    tokens: Vec<DownloadToken>,
}

impl MemoryTokenStore {
    pub fn new(jobs: std::sync::Arc<MemoryJobStore>, config: TokenConfig) -> Self {
        Self {
            jobs,
            config,
            inner: Mutex::new(MemoryTokens::default()),
        }
    }

    /// Number of tokens ever issued, for assertions.
    pub fn issued_count(&self) -> usize {
        self.inner.lock().unwrap().tokens.len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn issue(&self, job_id: i64) -> Result<DownloadToken> {
        let job = self
            .jobs
            .snapshot(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Completed {
            return Err(Error::JobNotCompleted(job_id));
        }

        let mut inner = self.inner.lock().unwrap();
        for token in inner.tokens.iter_mut() {
            if token.job_id == job_id && token.status == TokenStatus::Active {
                token.status = TokenStatus::Disabled;
            }
        }

        inner.next_id += 1;
        let now = Utc::now();
        let token = DownloadToken {
            token_id: inner.next_id,
            token: generate_token(job_id, &job.user_email),
            job_id,
            status: TokenStatus::Active,
            download_count: 0,
            max_downloads: self.config.max_downloads,
            created_time: now,
            expires_at: now + self.config.validity,
            last_download_time: None,
            last_download_ip: None,
        };
        inner.tokens.push(token.clone());
        Ok(token)
    }

    async fn validate(&self, token: &str, origin: Option<&str>) -> Result<ArtifactLocation> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .tokens
            .iter_mut()
            .find(|t| t.token == token)
            .ok_or(Error::TokenNotFound)?;

        match row.status {
            TokenStatus::Disabled => return Err(Error::TokenDisabled),
            TokenStatus::Expired => return Err(Error::TokenExpired),
            TokenStatus::Active => {
                if row.should_expire(now) {
                    row.status = TokenStatus::Expired;
                    return Err(Error::TokenExpired);
                }
            }
        }

        row.download_count += 1;
        row.last_download_time = Some(now);
        row.last_download_ip = origin.map(String::from);
        let job_id = row.job_id;
        drop(inner);

        let job = self
            .jobs
            .snapshot(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        Ok(ArtifactLocation {
            job_id,
            file_name: job.file_name,
        })
    }

    async fn get(&self, token: &str) -> Result<Option<DownloadToken>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tokens.iter().find(|t| t.token == token).cloned())
    }

    async fn list_for_job(&self, job_id: i64) -> Result<Vec<DownloadToken>> {
        let inner = self.inner.lock().unwrap();
        let mut tokens: Vec<DownloadToken> = inner
            .tokens
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        Ok(tokens)
    }

    async fn disable(&self, token: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .tokens
            .iter_mut()
            .find(|t| t.token == token)
            .ok_or(Error::TokenNotFound)?;
        row.status = TokenStatus::Disabled;
        Ok(())
    }

    async fn reactivate(&self, token: &str) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .tokens
            .iter_mut()
            .find(|t| t.token == token)
            .ok_or(Error::TokenNotFound)?;
        if row.should_expire(now) {
            return Err(Error::TokenExpired);
        }
        if row.status != TokenStatus::Disabled {
            return Err(Error::InvalidInput("token is not disabled".to_string()));
        }
        row.status = TokenStatus::Active;
        Ok(())
    }

    async fn expire_overdue(&self) -> Result<u64> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let mut flipped = 0;
        for token in inner.tokens.iter_mut() {
            if token.status == TokenStatus::Active && token.should_expire(now) {
                token.status = TokenStatus::Expired;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}

/// Notifier that records messages instead of delivering them.
#[derive(Default)]
pub struct RecordingNotifier {
    /// (kind, user_email, file_name) triples in delivery order.
    pub messages: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<(String, String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn job_completed(&self, user_email: &str, file_name: &str, _link: &str) {
        self.messages.lock().unwrap().push((
            "completed".into(),
            user_email.into(),
            file_name.into(),
        ));
    }

    async fn job_failed(&self, user_email: &str, file_name: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("failed".into(), user_email.into(), file_name.into()));
    }

    async fn job_rejected_capacity(&self, user_email: &str, file_name: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("capacity".into(), user_email.into(), file_name.into()));
    }
}
