//! # coldstage-core
//!
//! Core types, traits, and configuration for coldstage, a staged-retrieval
//! service for tape-backed archives.
//!
//! This crate provides:
//! - Domain models (retrieval jobs, download tokens) and their state machines
//! - The error taxonomy shared across intake, worker, and token paths
//! - Immutable application configuration built once at startup
//! - Repository traits implemented by `coldstage-db`
//! - Blacklist/whitelist file loading and token-string generation

pub mod config;
pub mod defaults;
pub mod error;
pub mod listfile;
pub mod logging;
pub mod models;
pub mod token;
pub mod traits;

// In-memory store implementations. Always compiled so integration tests in
// dependent crates can exercise intake/worker flows without PostgreSQL.
pub mod testing;

pub use config::{
    AppConfig, HousekeepingConfig, IntakeConfig, NotifyConfig, RetrievalConfig, StagingConfig,
    TokenConfig, WorkerPoolConfig,
};
pub use error::{Error, Result};
pub use listfile::{load_list, load_optional_list};
pub use models::{ArtifactLocation, DownloadToken, Job, JobStatus, TokenStatus};
pub use token::generate_token;
pub use traits::{JobStore, Notifier, TokenStore};
