//! coldstage-api - HTTP API server for coldstage

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use coldstage_api::{build_router, AppState, IntakeService};
use coldstage_core::logging::init_tracing;
use coldstage_core::{AppConfig, JobStore, TokenStore};
use coldstage_db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing("coldstage_api=debug,coldstage_db=debug,tower_http=debug");

    let config = AppConfig::from_env()?;

    info!("Connecting to database...");
    let db = Database::connect(&config.database_url, config.token.clone()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let jobs: Arc<dyn JobStore> = Arc::new(db.jobs.clone());
    let tokens: Arc<dyn TokenStore> = Arc::new(db.tokens.clone());
    let intake = Arc::new(IntakeService::from_config(
        Arc::clone(&jobs),
        &config.intake,
    )?);

    let state = AppState {
        intake,
        jobs,
        tokens,
        staging_root: config.staging.root.clone(),
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.listen_host, config.listen_port).parse()?;
    info!(%addr, "coldstage-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    Ok(())
}
