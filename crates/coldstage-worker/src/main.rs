//! coldstage-worker - retrieval worker daemon for coldstage

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use coldstage_core::logging::init_tracing;
use coldstage_core::{AppConfig, JobStore, Notifier, TokenStore};
use coldstage_db::Database;
use coldstage_worker::{LogNotifier, RetrievalWorker, StagingArea, TapeRetriever};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing("coldstage_worker=debug,coldstage_db=debug");

    let config = AppConfig::from_env()?;

    info!("Connecting to database...");
    let db = Database::connect(&config.database_url, config.token.clone()).await?;
    info!("Database connected");

    let jobs: Arc<dyn JobStore> = Arc::new(db.jobs.clone());
    let tokens: Arc<dyn TokenStore> = Arc::new(db.tokens.clone());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(config.notify.clone()));
    let wake = db.jobs.job_notify();

    let worker = Arc::new(
        RetrievalWorker::new(
            jobs,
            tokens,
            notifier,
            StagingArea::new(config.staging.clone()),
            TapeRetriever::new(config.retrieval.clone()),
            config.notify.clone(),
            config.worker.clone(),
        )
        .with_wake(wake),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, finishing in-flight jobs");
    let _ = shutdown_tx.send(true);
    handle.await??;

    Ok(())
}
