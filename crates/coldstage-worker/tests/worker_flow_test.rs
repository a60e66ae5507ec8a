//! End-to-end worker pipeline tests against in-memory stores and a shell
//! script standing in for the retrieval utility.

#![cfg(unix)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use coldstage_core::models::{Job, JobStatus};
use coldstage_core::testing::{MemoryJobStore, MemoryTokenStore, RecordingNotifier};
use coldstage_core::{
    Error, JobStore, Notifier, NotifyConfig, Result, RetrievalConfig, StagingConfig, TokenConfig,
    TokenStore, WorkerPoolConfig,
};
use coldstage_worker::{RetrievalWorker, StagingArea, TapeRetriever};

struct Harness {
    jobs: Arc<MemoryJobStore>,
    tokens: Arc<MemoryTokenStore>,
    notifier: Arc<RecordingNotifier>,
    worker: Arc<RetrievalWorker>,
    _bin_dir: tempfile::TempDir,
    staging_dir: tempfile::TempDir,
}

fn fake_utility(dir: &tempfile::TempDir, script: &str) -> PathBuf {
    let path = dir.path().join("fake-hsi");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(f, "{script}").unwrap();
    drop(f);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn notify_config() -> NotifyConfig {
    NotifyConfig {
        smtp_host: "smtp.example.edu".into(),
        sender: "noreply@example.edu".into(),
        contact: "rds@example.edu".into(),
        download_base_url: "https://dl.example.edu".into(),
    }
}

/// Build a worker wired to in-memory stores. `script` is the body of the
/// fake retrieval utility; the local target path is its 9th positional
/// argument. `threshold_gb` sizes the staging capacity check.
fn harness(script: &str, threshold_gb: f64) -> Harness {
    let bin_dir = tempfile::tempdir().unwrap();
    let staging_dir = tempfile::tempdir().unwrap();
    let bin = fake_utility(&bin_dir, script);

    let jobs = Arc::new(MemoryJobStore::new());
    let tokens = Arc::new(MemoryTokenStore::new(
        Arc::clone(&jobs),
        TokenConfig::default(),
    ));
    let notifier = Arc::new(RecordingNotifier::new());

    let staging = StagingArea::new(StagingConfig::new(staging_dir.path(), threshold_gb))
        .with_stability_probe(Duration::from_millis(10));
    let retriever = TapeRetriever::new(RetrievalConfig {
        bin_path: bin,
        keytab_path: PathBuf::from("/tmp/test.keytab"),
        user: "tester".into(),
        firewall: false,
        timeout: Duration::from_secs(10),
    });

    let worker = Arc::new(RetrievalWorker::new(
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        Arc::clone(&tokens) as Arc<dyn TokenStore>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        staging,
        retriever,
        notify_config(),
        WorkerPoolConfig {
            slots: 2,
            poll_interval: Duration::from_millis(20),
        },
    ));

    Harness {
        jobs,
        tokens,
        notifier,
        worker,
        _bin_dir: bin_dir,
        staging_dir,
    }
}

#[tokio::test]
async fn test_successful_retrieval_completes_and_issues_token() {
    let h = harness("echo staged-bytes > \"$9\"", 100.0);
    let job_id = h
        .jobs
        .submit("alice@example.edu", "/sda/coll/c1.tar", "c1.tar", None)
        .await
        .unwrap();
    let job = h.jobs.claim_next().await.unwrap().unwrap();

    h.worker.execute_job(job).await;

    let row = h.jobs.snapshot(job_id).unwrap();
    assert_eq!(row.status, JobStatus::Completed);
    assert!(row.job_size.unwrap() > 0);
    let token = row.token.expect("token linked onto completed job");
    assert_eq!(token.len(), 32);
    assert_eq!(
        row.download_url.unwrap(),
        format!("https://dl.example.edu/download/{token}")
    );
    assert!(h.staging_dir.path().join("c1.tar").exists());

    let recorded = h.notifier.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "completed");
    assert_eq!(recorded[0].1, "alice@example.edu");
}

#[tokio::test]
async fn test_staging_at_capacity_fails_job_with_cause() {
    // Zero-GB threshold: any usage, including none, is at capacity.
    let h = harness("echo staged-bytes > \"$9\"", 0.0);
    let job_id = h
        .jobs
        .submit("alice@example.edu", "/sda/coll/c1.tar", "c1.tar", None)
        .await
        .unwrap();
    let job = h.jobs.claim_next().await.unwrap().unwrap();

    h.worker.execute_job(job).await;

    let row = h.jobs.snapshot(job_id).unwrap();
    assert_eq!(row.status, JobStatus::Failed);
    assert_eq!(row.failure_reason.as_deref(), Some("staging_full"));
    assert_eq!(h.tokens.issued_count(), 0);

    let recorded = h.notifier.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "capacity");
}

#[tokio::test]
async fn test_cache_hit_skips_retrieval_entirely() {
    // The utility would fail if ever invoked.
    let h = harness("exit 1", 100.0);
    std::fs::write(h.staging_dir.path().join("c1.tar"), b"already staged").unwrap();

    let job_id = h
        .jobs
        .submit("alice@example.edu", "/sda/coll/c1.tar", "c1.tar", None)
        .await
        .unwrap();
    let job = h.jobs.claim_next().await.unwrap().unwrap();

    h.worker.execute_job(job).await;

    let row = h.jobs.snapshot(job_id).unwrap();
    assert_eq!(row.status, JobStatus::Completed);
    assert_eq!(row.job_size, Some(14));
    assert!(row.token.is_some());
}

#[tokio::test]
async fn test_cache_hit_bypasses_capacity_check() {
    let h = harness("exit 1", 0.0);
    std::fs::write(h.staging_dir.path().join("c1.tar"), b"already staged").unwrap();

    let job_id = h
        .jobs
        .submit("alice@example.edu", "/sda/coll/c1.tar", "c1.tar", None)
        .await
        .unwrap();
    let job = h.jobs.claim_next().await.unwrap().unwrap();

    h.worker.execute_job(job).await;

    assert_eq!(
        h.jobs.snapshot(job_id).unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_retrieval_process_failure_records_cause() {
    let h = harness("exit 3", 100.0);
    let job_id = h
        .jobs
        .submit("alice@example.edu", "/sda/coll/c1.tar", "c1.tar", None)
        .await
        .unwrap();
    let job = h.jobs.claim_next().await.unwrap().unwrap();

    h.worker.execute_job(job).await;

    let row = h.jobs.snapshot(job_id).unwrap();
    assert_eq!(row.status, JobStatus::Failed);
    assert_eq!(
        row.failure_reason.as_deref(),
        Some("retrieval_process_error")
    );

    let recorded = h.notifier.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "failed");
}

#[tokio::test]
async fn test_cancel_during_flight_suppresses_token_and_notification() {
    let h = harness("echo staged-bytes > \"$9\"", 100.0);
    let job_id = h
        .jobs
        .submit("alice@example.edu", "/sda/coll/c1.tar", "c1.tar", None)
        .await
        .unwrap();
    let job = h.jobs.claim_next().await.unwrap().unwrap();

    // Requester cancels while the transfer is in flight.
    assert!(h.jobs.cancel(job_id).await.unwrap());

    h.worker.execute_job(job).await;

    let row = h.jobs.snapshot(job_id).unwrap();
    assert_eq!(row.status, JobStatus::Cancelled);
    assert!(row.token.is_none());
    assert_eq!(h.tokens.issued_count(), 0);
    assert!(h.notifier.recorded().is_empty());
}

#[tokio::test]
async fn test_run_loop_drains_queue_and_stops_on_shutdown() {
    let h = harness("echo staged-bytes > \"$9\"", 100.0);
    let mut ids = Vec::new();
    for name in ["c1.tar", "c2.tar", "c3.tar"] {
        let id = h
            .jobs
            .submit(
                "alice@example.edu",
                &format!("/sda/coll/{name}"),
                name,
                None,
            )
            .await
            .unwrap();
        ids.push(id);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&h.worker).run(shutdown_rx));

    // Poll until every job reaches a terminal status.
    for _ in 0..100 {
        let done = ids
            .iter()
            .all(|id| h.jobs.snapshot(*id).map(|j| j.status.is_terminal()) == Some(true));
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    for id in ids {
        assert_eq!(h.jobs.snapshot(id).unwrap().status, JobStatus::Completed);
    }
    assert_eq!(h.tokens.issued_count(), 3);
    assert_eq!(h.notifier.recorded().len(), 3);
}

#[tokio::test]
async fn test_slow_retrieval_does_not_block_other_slots() {
    // One slot pinned by a long transfer; the rest of the queue keeps
    // flowing through the remaining slot instead of waiting behind it.
    let h = harness(
        "case \"$9\" in *slow*) sleep 2 ;; esac\necho staged-bytes > \"$9\"",
        100.0,
    );

    let slow_id = h
        .jobs
        .submit("alice@example.edu", "/sda/coll/slow.tar", "slow.tar", None)
        .await
        .unwrap();
    let mut fast_ids = Vec::new();
    for name in ["f1.tar", "f2.tar", "f3.tar"] {
        let id = h
            .jobs
            .submit(
                "alice@example.edu",
                &format!("/sda/coll/{name}"),
                name,
                None,
            )
            .await
            .unwrap();
        fast_ids.push(id);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&h.worker).run(shutdown_rx));

    // The fast jobs must all complete well inside the slow job's runtime.
    for _ in 0..50 {
        let done = fast_ids
            .iter()
            .all(|id| h.jobs.snapshot(*id).map(|j| j.status.is_terminal()) == Some(true));
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for id in &fast_ids {
        assert_eq!(h.jobs.snapshot(*id).unwrap().status, JobStatus::Completed);
    }
    assert_eq!(h.jobs.snapshot(slow_id).unwrap().status, JobStatus::Processing);

    // Shutdown lets the in-flight slow job run to completion.
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(h.jobs.snapshot(slow_id).unwrap().status, JobStatus::Completed);
    assert_eq!(h.tokens.issued_count(), 4);
}

/// Job store whose terminal writes always fail, standing in for a database
/// that dropped away mid-job.
struct UnreachableTerminalStore {
    inner: Arc<MemoryJobStore>,
}

#[async_trait]
impl JobStore for UnreachableTerminalStore {
    async fn submit(
        &self,
        user_email: &str,
        sda_path: &str,
        file_name: &str,
        source_ip: Option<&str>,
    ) -> Result<i64> {
        self.inner.submit(user_email, sda_path, file_name, source_ip).await
    }

    async fn latest_for_requester(
        &self,
        user_email: &str,
        file_name: &str,
    ) -> Result<Option<(i64, DateTime<Utc>)>> {
        self.inner.latest_for_requester(user_email, file_name).await
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        self.inner.claim_next().await
    }

    async fn get(&self, job_id: i64) -> Result<Option<Job>> {
        self.inner.get(job_id).await
    }

    async fn complete(&self, _job_id: i64, _size_bytes: i64) -> Result<bool> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    async fn fail(&self, _job_id: i64, _reason: &str) -> Result<bool> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    async fn cancel(&self, job_id: i64) -> Result<bool> {
        self.inner.cancel(job_id).await
    }

    async fn link_token(&self, job_id: i64, token: &str, download_url: &str) -> Result<()> {
        self.inner.link_token(job_id, token, download_url).await
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.inner.requeue_stale(older_than).await
    }

    async fn pending_count(&self) -> Result<i64> {
        self.inner.pending_count().await
    }
}

#[tokio::test]
async fn test_unreachable_store_leaves_job_processing() {
    let bin_dir = tempfile::tempdir().unwrap();
    let staging_dir = tempfile::tempdir().unwrap();
    let bin = fake_utility(&bin_dir, "exit 1");
    std::fs::write(staging_dir.path().join("c1.tar"), b"already staged").unwrap();

    let inner = Arc::new(MemoryJobStore::new());
    let jobs = Arc::new(UnreachableTerminalStore {
        inner: Arc::clone(&inner),
    });
    let tokens = Arc::new(MemoryTokenStore::new(
        Arc::clone(&inner),
        TokenConfig::default(),
    ));
    let notifier = Arc::new(RecordingNotifier::new());

    let staging = StagingArea::new(StagingConfig::new(staging_dir.path(), 100.0))
        .with_stability_probe(Duration::from_millis(10));
    let retriever = TapeRetriever::new(RetrievalConfig {
        bin_path: bin,
        keytab_path: PathBuf::from("/tmp/test.keytab"),
        user: "tester".into(),
        firewall: false,
        timeout: Duration::from_secs(10),
    });
    let worker = Arc::new(RetrievalWorker::new(
        jobs as Arc<dyn JobStore>,
        Arc::clone(&tokens) as Arc<dyn TokenStore>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        staging,
        retriever,
        notify_config(),
        WorkerPoolConfig {
            slots: 2,
            poll_interval: Duration::from_millis(20),
        },
    ));

    let job_id = inner
        .submit("alice@example.edu", "/sda/coll/c1.tar", "c1.tar", None)
        .await
        .unwrap();
    let job = inner.claim_next().await.unwrap().unwrap();

    worker.execute_job(job).await;

    // The row stays processing for the stale-requeue pass; no token is
    // issued and nothing is sent to the requester.
    assert_eq!(inner.snapshot(job_id).unwrap().status, JobStatus::Processing);
    assert_eq!(tokens.issued_count(), 0);
    assert!(notifier.recorded().is_empty());
}
