//! Centralized default constants for the coldstage system.
//!
//! This module is the single source of truth for shared default values.
//! All crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// TOKENS
// =============================================================================

/// Hours a download token stays valid after issuance.
pub const TOKEN_VALIDITY_HOURS: i64 = 24;

/// Maximum downloads allowed per token.
pub const TOKEN_MAX_DOWNLOADS: i32 = 3;

/// Length of the opaque token string (hex characters).
pub const TOKEN_LENGTH: usize = 32;

// =============================================================================
// WORKER
// =============================================================================

/// Number of concurrent worker slots drawing from the queue.
pub const WORKER_SLOTS: usize = 4;

/// Polling interval when the queue is empty (milliseconds).
pub const WORKER_POLL_INTERVAL_MS: u64 = 2_000;

/// Attempts made for a terminal status write before leaving the job in
/// `processing` for stale-requeue redelivery.
pub const TERMINAL_WRITE_ATTEMPTS: u32 = 3;

/// Age after which a `processing` job is considered orphaned and requeued.
/// Set comfortably above the retrieval timeout so an in-flight retrieval is
/// never requeued under a live worker.
pub const STALE_PROCESSING_SECS: i64 = 3 * 3600;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Timeout for one tape retrieval run (seconds). Archive pulls are
/// minutes-to-hours long; the bound exists so a stuck process cannot hold a
/// worker slot indefinitely.
pub const RETRIEVAL_TIMEOUT_SECS: u64 = 7_200;

// =============================================================================
// STAGING / HOUSEKEEPING
// =============================================================================

/// Staging usage ceiling in gigabytes.
pub const STAGING_THRESHOLD_GB: f64 = 950.0;

/// Artifact time-to-live in minutes before housekeeping eligibility.
pub const HOUSEKEEPING_TTL_MINS: i64 = 2_880;

/// Seconds between housekeeping sweeps.
pub const HOUSEKEEPING_INTERVAL_SECS: u64 = 3_600;

// =============================================================================
// INTAKE
// =============================================================================

/// Minimum interval between accepted submissions for the same
/// (requester, collection) pair, in minutes.
pub const MIN_RESUBMIT_INTERVAL_MINS: i64 = 360;

// =============================================================================
// API
// =============================================================================

/// Default HTTP listen port.
pub const LISTEN_PORT: u16 = 3000;

/// Maximum request body size in bytes.
pub const REQUEST_BODY_LIMIT: usize = 64 * 1024;
