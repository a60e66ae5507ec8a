//! Immutable application configuration.
//!
//! One `AppConfig` value is constructed at startup (typically via
//! [`AppConfig::from_env`] after `dotenvy::dotenv()`) and its sections are
//! handed to component constructors. No component reads configuration from
//! ambient global state after startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::defaults;
use crate::error::{Error, Result};

/// Tape retrieval utility invocation settings.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Path to the retrieval binary (hsi-compatible).
    pub bin_path: PathBuf,
    /// Keytab credential file presented to the utility.
    pub keytab_path: PathBuf,
    /// Principal name authenticated with the keytab.
    pub user: String,
    /// Whether to run the utility in firewall mode.
    pub firewall: bool,
    /// Hard bound on one retrieval run.
    pub timeout: Duration,
}

/// Staging filesystem settings.
#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// Mount point the staged artifacts are written under.
    pub root: PathBuf,
    /// Usage ceiling in bytes; usage at or above this blocks new retrievals.
    pub threshold_bytes: u64,
}

impl StagingConfig {
    pub fn new(root: impl Into<PathBuf>, threshold_gb: f64) -> Self {
        Self {
            root: root.into(),
            threshold_bytes: (threshold_gb * 1024.0 * 1024.0 * 1024.0) as u64,
        }
    }
}

/// Intake admission settings.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Minimum interval between accepted submissions for the same
    /// (requester, collection) pair.
    pub min_resubmit_interval: chrono::Duration,
    /// File holding blacklisted requester addresses.
    pub blacklist_file: Option<PathBuf>,
}

/// Download token issuance settings.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Validity window added to the creation time.
    pub validity: chrono::Duration,
    /// Maximum downloads per token.
    pub max_downloads: i32,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            validity: chrono::Duration::hours(defaults::TOKEN_VALIDITY_HOURS),
            max_downloads: defaults::TOKEN_MAX_DOWNLOADS,
        }
    }
}

/// Housekeeping sweep settings.
#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    /// Artifact time-to-live before deletion eligibility.
    pub ttl: chrono::Duration,
    /// File holding names exempt from deletion.
    pub whitelist_file: Option<PathBuf>,
    /// Cadence of the internal ticker loop.
    pub interval: Duration,
}

/// Notification sink settings. Delivery mechanics are an external
/// collaborator; these settings only shape the composed messages.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub smtp_host: String,
    pub sender: String,
    pub contact: String,
    /// Public base URL download links are composed against (no trailing slash).
    pub download_base_url: String,
}

impl NotifyConfig {
    /// Compose the public download link for a token.
    pub fn download_link(&self, token: &str) -> String {
        format!(
            "{}/download/{token}",
            self.download_base_url.trim_end_matches('/')
        )
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent worker slots.
    pub slots: usize,
    /// Polling interval when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            slots: defaults::WORKER_SLOTS,
            poll_interval: Duration::from_millis(defaults::WORKER_POLL_INTERVAL_MS),
        }
    }
}

/// Top-level immutable configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub retrieval: RetrievalConfig,
    pub staging: StagingConfig,
    pub intake: IntakeConfig,
    pub token: TokenConfig,
    pub housekeeping: HousekeepingConfig,
    pub notify: NotifyConfig,
    pub worker: WorkerPoolConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env_var(name) {
        None => default,
        Some(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    subsystem = "config",
                    var = name,
                    value = %raw,
                    "Unparseable value, using default"
                );
                default
            }
        },
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env_var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_required(name: &str) -> Result<String> {
    env_var(name).ok_or_else(|| Error::Config(format!("{name} must be set")))
}

impl AppConfig {
    /// Build the configuration from environment variables.
    ///
    /// Hard requirements: `RETRIEVAL_BIN`, `RETRIEVAL_KEYTAB`,
    /// `RETRIEVAL_USER`, `STAGING_DIR`. Everything else has a default.
    pub fn from_env() -> Result<Self> {
        let retrieval = RetrievalConfig {
            bin_path: PathBuf::from(env_required("RETRIEVAL_BIN")?),
            keytab_path: PathBuf::from(env_required("RETRIEVAL_KEYTAB")?),
            user: env_required("RETRIEVAL_USER")?,
            firewall: env_bool("RETRIEVAL_FIREWALL", false),
            timeout: Duration::from_secs(env_parse(
                "RETRIEVAL_TIMEOUT_SECS",
                defaults::RETRIEVAL_TIMEOUT_SECS,
            )),
        };

        let staging = StagingConfig::new(
            env_required("STAGING_DIR")?,
            env_parse("STAGING_THRESHOLD_GB", defaults::STAGING_THRESHOLD_GB),
        );

        let intake = IntakeConfig {
            min_resubmit_interval: chrono::Duration::minutes(env_parse(
                "MIN_RESUBMIT_INTERVAL_MINS",
                defaults::MIN_RESUBMIT_INTERVAL_MINS,
            )),
            blacklist_file: env_var("BLACKLIST_FILE").map(PathBuf::from),
        };

        let token = TokenConfig {
            validity: chrono::Duration::hours(env_parse(
                "TOKEN_VALIDITY_HOURS",
                defaults::TOKEN_VALIDITY_HOURS,
            )),
            max_downloads: env_parse("TOKEN_MAX_DOWNLOADS", defaults::TOKEN_MAX_DOWNLOADS),
        };

        let housekeeping = HousekeepingConfig {
            ttl: chrono::Duration::minutes(env_parse(
                "HOUSEKEEPING_TTL_MINS",
                defaults::HOUSEKEEPING_TTL_MINS,
            )),
            whitelist_file: env_var("WHITELIST_FILE").map(PathBuf::from),
            interval: Duration::from_secs(env_parse(
                "HOUSEKEEPING_INTERVAL_SECS",
                defaults::HOUSEKEEPING_INTERVAL_SECS,
            )),
        };

        let notify = NotifyConfig {
            smtp_host: env_var("SMTP_HOST").unwrap_or_else(|| "localhost".into()),
            sender: env_var("EMAIL_SENDER").unwrap_or_else(|| "noreply@localhost".into()),
            contact: env_var("CONTACT_EMAIL").unwrap_or_else(|| "support@localhost".into()),
            download_base_url: env_var("DOWNLOAD_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),
        };

        let worker = WorkerPoolConfig {
            slots: env_parse("WORKER_SLOTS", defaults::WORKER_SLOTS).max(1),
            poll_interval: Duration::from_millis(env_parse(
                "WORKER_POLL_INTERVAL_MS",
                defaults::WORKER_POLL_INTERVAL_MS,
            )),
        };

        Ok(Self {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost/coldstage".into()),
            listen_host: env_var("LISTEN_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            listen_port: env_parse("LISTEN_PORT", defaults::LISTEN_PORT),
            retrieval,
            staging,
            intake,
            token,
            housekeeping,
            notify,
            worker,
        })
    }
}
