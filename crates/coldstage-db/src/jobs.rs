//! Job store implementation, doubling as the dispatch queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;

use coldstage_core::{Error, Job, JobStatus, JobStore, Result};

/// PostgreSQL implementation of [`JobStore`].
///
/// The `submitted` rows form the work queue: inserting one is the publish,
/// and [`claim_next`](JobStore::claim_next) dequeues with `FOR UPDATE SKIP
/// LOCKED` so concurrent workers never claim the same row. All status
/// transitions are compare-and-set against the expected prior status.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
    /// Notify handle for event-driven worker wake on submit.
    notify: Arc<Notify>,
}

impl PgJobStore {
    /// Create a new PgJobStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a new PgJobStore sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Get the notification handle for event-driven worker waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        let status: String = row.get("job_status");
        Job {
            job_id: row.get("job_id"),
            user_email: row.get("user_email"),
            status: JobStatus::from_str_lossy(&status),
            job_size: row.get("job_size"),
            file_name: row.get("file_name"),
            sda_path: row.get("sda_path"),
            source_ip: row.get("source_ip"),
            failure_reason: row.get("failure_reason"),
            token: row.get("token"),
            download_url: row.get("download_url"),
            created_time: row.get("created_time"),
            update_time: row.get("update_time"),
        }
    }
}

const JOB_COLUMNS: &str = "job_id, user_email, job_status::text, job_size, file_name, sda_path, \
                           source_ip, failure_reason, token, download_url, created_time, update_time";

#[async_trait]
impl JobStore for PgJobStore {
    async fn submit(
        &self,
        user_email: &str,
        sda_path: &str,
        file_name: &str,
        source_ip: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now();

        let job_id: i64 = sqlx::query_scalar(
            "INSERT INTO user_jobs (user_email, job_status, file_name, sda_path, source_ip, created_time, update_time)
             VALUES ($1, 'submitted'::job_status, $2, $3, $4, $5, $5)
             RETURNING job_id",
        )
        .bind(user_email)
        .bind(file_name)
        .bind(sda_path)
        .bind(source_ip)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn latest_for_requester(
        &self,
        user_email: &str,
        file_name: &str,
    ) -> Result<Option<(i64, DateTime<Utc>)>> {
        // Failed jobs do not count against the throttle window so a
        // requester can resubmit after a failure immediately.
        let row: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT job_id, created_time FROM user_jobs
             WHERE user_email = $1 AND file_name = $2
               AND job_status != 'failed'::job_status
             ORDER BY created_time DESC
             LIMIT 1",
        )
        .bind(user_email)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let now = Utc::now();

        // The claim is simultaneously the dequeue, the idempotency re-check
        // (only 'submitted' rows are eligible, so cancelled or already
        // advanced jobs are never handed out), and the
        // submitted->processing CAS.
        let row = sqlx::query(&format!(
            "UPDATE user_jobs
             SET job_status = 'processing'::job_status, update_time = $1
             WHERE job_id = (
                 SELECT job_id FROM user_jobs
                 WHERE job_status = 'submitted'::job_status
                 ORDER BY created_time ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn get(&self, job_id: i64) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM user_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn complete(&self, job_id: i64, size_bytes: i64) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE user_jobs
             SET job_status = 'completed'::job_status, job_size = $1, update_time = $2
             WHERE job_id = $3 AND job_status = 'processing'::job_status",
        )
        .bind(size_bytes)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, job_id: i64, reason: &str) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE user_jobs
             SET job_status = 'failed'::job_status, failure_reason = $1, update_time = $2
             WHERE job_id = $3 AND job_status = 'processing'::job_status",
        )
        .bind(reason)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, job_id: i64) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE user_jobs
             SET job_status = 'cancelled'::job_status, update_time = $1
             WHERE job_id = $2
               AND job_status IN ('submitted'::job_status, 'processing'::job_status)",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn link_token(&self, job_id: i64, token: &str, download_url: &str) -> Result<()> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE user_jobs
             SET token = $1, download_url = $2, update_time = $3
             WHERE job_id = $4 AND job_status = 'completed'::job_status",
        )
        .bind(token)
        .bind(download_url)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotCompleted(job_id));
        }
        Ok(())
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE user_jobs
             SET job_status = 'submitted'::job_status, update_time = $1
             WHERE job_status = 'processing'::job_status AND update_time < $2",
        )
        .bind(now)
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            self.notify.notify_waiters();
        }
        Ok(requeued)
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM user_jobs WHERE job_status = 'submitted'::job_status",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(count.0)
    }
}
