//! coldstage-housekeeper - periodic reclamation daemon for coldstage
//!
//! On every tick: purge staged artifacts past their TTL (whitelist exempt),
//! flip overdue download tokens to expired, and requeue jobs orphaned in
//! `processing` by a dead worker.

use chrono::Utc;
use tracing::{error, info};

use coldstage_core::defaults::STALE_PROCESSING_SECS;
use coldstage_core::logging::init_tracing;
use coldstage_core::{load_optional_list, AppConfig, JobStore, TokenStore};
use coldstage_db::Database;
use coldstage_worker::housekeeping;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing("coldstage_worker=debug,coldstage_db=debug");

    let config = AppConfig::from_env()?;

    info!("Connecting to database...");
    let db = Database::connect(&config.database_url, config.token.clone()).await?;
    info!("Database connected");

    info!(
        staging_root = %config.staging.root.display(),
        ttl_mins = config.housekeeping.ttl.num_minutes(),
        interval_secs = config.housekeeping.interval.as_secs(),
        "Housekeeper started"
    );

    let mut ticker = tokio::time::interval(config.housekeeping.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
        run_pass(&db, &config).await;
    }

    Ok(())
}

/// One housekeeping pass. Each stage is independent; a failing stage is
/// logged and the others still run.
async fn run_pass(db: &Database, config: &AppConfig) {
    // The whitelist is re-read each pass so operators can pin files without
    // a restart. An unreadable whitelist skips the sweep entirely rather
    // than purging files that may be pinned.
    match load_optional_list(config.housekeeping.whitelist_file.as_deref()) {
        Ok(whitelist) => match config.housekeeping.ttl.to_std() {
            Ok(ttl) => {
                if let Err(e) =
                    housekeeping::sweep(&config.staging.root, ttl, &whitelist, Utc::now())
                {
                    error!(subsystem = "housekeeping", error = %e, "Staging sweep failed");
                }
            }
            Err(_) => {
                error!(subsystem = "housekeeping", "Negative TTL configured, skipping sweep");
            }
        },
        Err(e) => {
            error!(subsystem = "housekeeping", error = %e,
                "Cannot read whitelist, skipping staging sweep");
        }
    }

    match db.tokens.expire_overdue().await {
        Ok(flipped) if flipped > 0 => {
            info!(subsystem = "housekeeping", flipped, "Expired overdue tokens");
        }
        Ok(_) => {}
        Err(e) => error!(subsystem = "housekeeping", error = %e, "Token sweep failed"),
    }

    let stale_bound = Utc::now() - chrono::Duration::seconds(STALE_PROCESSING_SECS);
    match db.jobs.requeue_stale(stale_bound).await {
        Ok(requeued) if requeued > 0 => {
            info!(subsystem = "housekeeping", requeued, "Requeued stale processing jobs");
        }
        Ok(_) => {}
        Err(e) => error!(subsystem = "housekeeping", error = %e, "Stale requeue failed"),
    }
}
