//! Retrieval worker pool.
//!
//! Claims submitted jobs from the store, runs the retrieval pipeline for
//! each one in a bounded set of concurrent slots, and records the terminal
//! outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use coldstage_core::defaults::TERMINAL_WRITE_ATTEMPTS;
use coldstage_core::models::Job;
use coldstage_core::{Error, JobStore, Notifier, NotifyConfig, Result, TokenStore, WorkerPoolConfig};

use crate::retrieval::TapeRetriever;
use crate::staging::StagingArea;

const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_secs(2);

/// One retrieval worker process: a claim loop feeding a pool of
/// concurrently executing jobs.
pub struct RetrievalWorker {
    jobs: Arc<dyn JobStore>,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    staging: Arc<StagingArea>,
    retriever: TapeRetriever,
    notify_config: NotifyConfig,
    pool: WorkerPoolConfig,
    /// Woken by the store on new submissions; polling is the fallback.
    wake: Option<Arc<Notify>>,
}

impl RetrievalWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tokens: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
        staging: StagingArea,
        retriever: TapeRetriever,
        notify_config: NotifyConfig,
        pool: WorkerPoolConfig,
    ) -> Self {
        Self {
            jobs,
            tokens,
            notifier,
            staging: Arc::new(staging),
            retriever,
            notify_config,
            pool,
            wake: None,
        }
    }

    /// Attach a wake handle so the loop reacts to submissions without
    /// waiting out the poll interval.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Run until `shutdown` flips to `true`. In-flight jobs are allowed to
    /// finish; unclaimed jobs stay `submitted` for the next start.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            subsystem = "worker",
            slots = self.pool.slots,
            poll_interval_ms = self.pool.poll_interval.as_millis() as u64,
            "Retrieval worker started"
        );

        let mut set: JoinSet<()> = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }

            // Keep every free slot fed; one long-running retrieval must not
            // hold the other slots idle behind it.
            for job in self.claim_batch(self.pool.slots - set.len()).await {
                let this = Arc::clone(&self);
                set.spawn(async move { this.execute_job(job).await });
            }

            if set.is_empty() {
                self.idle(&mut shutdown).await;
                continue;
            }

            tokio::select! {
                res = set.join_next() => {
                    if let Some(Err(e)) = res {
                        error!(subsystem = "worker", error = %e, "Job task panicked");
                    }
                }
                _ = shutdown.changed() => {}
                _ = self.wake_or_poll(), if set.len() < self.pool.slots => {}
            }
        }

        // Let in-flight jobs finish; unclaimed jobs stay submitted.
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                error!(subsystem = "worker", error = %e, "Job task panicked");
            }
        }

        info!(subsystem = "worker", "Retrieval worker stopped");
        Ok(())
    }

    /// Claim up to `slots` jobs from the queue.
    async fn claim_batch(&self, slots: usize) -> Vec<Job> {
        let mut batch = Vec::new();
        while batch.len() < slots {
            match self.jobs.claim_next().await {
                Ok(Some(job)) => {
                    debug!(
                        subsystem = "worker",
                        job_id = job.job_id,
                        file_name = %job.file_name,
                        "Claimed job"
                    );
                    batch.push(job);
                }
                Ok(None) => break,
                Err(e) => {
                    error!(subsystem = "worker", error = %e, "Claim failed");
                    break;
                }
            }
        }
        batch
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = self.wake_or_poll() => {}
            _ = shutdown.changed() => {}
        }
    }

    /// Resolve on a submission wake-up, or after one poll interval.
    async fn wake_or_poll(&self) {
        let sleep = tokio::time::sleep(self.pool.poll_interval);
        match &self.wake {
            Some(wake) => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = sleep => {}
                }
            }
            None => sleep.await,
        }
    }

    /// Run the pipeline for one claimed job and record its outcome.
    pub async fn execute_job(&self, job: Job) {
        let started = std::time::Instant::now();
        match self.retrieve(&job).await {
            Ok(size_bytes) => {
                self.finish_success(&job, size_bytes).await;
                info!(
                    subsystem = "worker",
                    op = "execute_job",
                    job_id = job.job_id,
                    file_name = %job.file_name,
                    size_bytes,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            Err(e) => {
                warn!(
                    subsystem = "worker",
                    op = "execute_job",
                    job_id = job.job_id,
                    file_name = %job.file_name,
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job failed"
                );
                self.finish_failure(&job, &e).await;
            }
        }
    }

    /// Stage the artifact, via cache hit or tape retrieval. Returns its size.
    async fn retrieve(&self, job: &Job) -> Result<u64> {
        if let Some(path) = self.staging.cache_lookup(&job.file_name).await? {
            let size = tokio::fs::metadata(&path).await?.len();
            info!(
                subsystem = "worker",
                job_id = job.job_id,
                file_name = %job.file_name,
                size_bytes = size,
                "Artifact already staged, skipping retrieval"
            );
            return Ok(size);
        }

        if !self.staging.has_capacity().await? {
            return Err(Error::StagingFull);
        }

        let path = self.retriever.fetch(&job.sda_path, self.staging.root()).await?;
        Ok(tokio::fs::metadata(&path).await?.len())
    }

    /// Record completion, issue the download token, and notify.
    ///
    /// Losing the completion CAS means the job was cancelled in flight; the
    /// staged artifact is left for housekeeping and nothing is issued.
    async fn finish_success(&self, job: &Job, size_bytes: u64) {
        let completed = match self
            .write_terminal(|| self.jobs.complete(job.job_id, size_bytes as i64))
            .await
        {
            Ok(completed) => completed,
            Err(e) => {
                error!(
                    subsystem = "worker",
                    job_id = job.job_id,
                    error = %e,
                    "Leaving job processing for requeue"
                );
                return;
            }
        };
        if !completed {
            info!(
                subsystem = "worker",
                job_id = job.job_id,
                "Job no longer processing at completion, skipping token"
            );
            return;
        }

        let token = match self.tokens.issue(job.job_id).await {
            Ok(token) => token,
            Err(e) => {
                error!(
                    subsystem = "worker",
                    job_id = job.job_id,
                    error = %e,
                    "Token issuance failed; artifact is staged but unlinked"
                );
                return;
            }
        };
        let link = self.notify_config.download_link(&token.token);
        if let Err(e) = self.jobs.link_token(job.job_id, &token.token, &link).await {
            error!(
                subsystem = "worker",
                job_id = job.job_id,
                error = %e,
                "Failed to link token onto job row"
            );
        }
        self.notifier
            .job_completed(&job.user_email, &job.file_name, &link)
            .await;
    }

    /// Record failure with its cause class and notify.
    async fn finish_failure(&self, job: &Job, err: &Error) {
        let reason = err.failure_reason();
        let failed = match self
            .write_terminal(|| self.jobs.fail(job.job_id, reason))
            .await
        {
            Ok(failed) => failed,
            Err(e) => {
                error!(
                    subsystem = "worker",
                    job_id = job.job_id,
                    error = %e,
                    "Leaving job processing for requeue"
                );
                return;
            }
        };
        if !failed {
            // Cancelled in flight; the requester asked for this, stay quiet.
            return;
        }
        match err {
            Error::StagingFull => {
                self.notifier
                    .job_rejected_capacity(&job.user_email, &job.file_name)
                    .await;
            }
            _ => {
                self.notifier
                    .job_failed(&job.user_email, &job.file_name)
                    .await;
            }
        }
    }

    /// Attempt a terminal status write a bounded number of times.
    ///
    /// Returns `StoreUnavailable` once the attempts are spent; the row is
    /// left `processing` and the stale-requeue pass will redeliver it.
    async fn write_terminal<F, Fut>(&self, write: F) -> Result<bool>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let mut last_error = String::new();
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            match write().await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(
                        subsystem = "worker",
                        attempt,
                        attempts = TERMINAL_WRITE_ATTEMPTS,
                        error = %e,
                        "Terminal status write failed"
                    );
                    last_error = e.to_string();
                    if attempt < TERMINAL_WRITE_ATTEMPTS {
                        tokio::time::sleep(TERMINAL_WRITE_BACKOFF).await;
                    }
                }
            }
        }
        Err(Error::StoreUnavailable(format!(
            "terminal status write failed after {TERMINAL_WRITE_ATTEMPTS} attempts: {last_error}"
        )))
    }
}
