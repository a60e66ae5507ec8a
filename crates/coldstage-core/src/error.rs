//! Error types for coldstage.

use thiserror::Error;

/// Result type alias using coldstage's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for coldstage operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Requester is on the deny list
    #[error("Forbidden: requester is on the deny list")]
    Forbidden,

    /// An equivalent job was submitted within the throttle window
    #[error("Too many requests: an equivalent job ({existing_job_id}) is already in flight")]
    TooManyRequests { existing_job_id: i64 },

    /// Staging area usage is at or above the configured threshold
    #[error("Staging area is at capacity")]
    StagingFull,

    /// Tape retrieval exceeded its configured timeout
    #[error("Retrieval timed out after {timeout_secs}s")]
    RetrievalTimeout { timeout_secs: u64 },

    /// Tape retrieval utility rejected the configured credential
    #[error("Retrieval authentication failed: {0}")]
    RetrievalAuthFailure(String),

    /// Tape retrieval process exited abnormally or could not be spawned
    #[error("Retrieval process error: {0}")]
    RetrievalProcessError(String),

    /// Persistence layer unreachable during a status write
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(String),

    /// No token row matches the presented token string
    #[error("Token not found")]
    TokenNotFound,

    /// Token is expired (by time, by download count, or by status)
    #[error("Token expired")]
    TokenExpired,

    /// Token was administratively disabled
    #[error("Token disabled")]
    TokenDisabled,

    /// Token issuance requested for a job that is not completed
    #[error("Job {0} is not completed")]
    JobNotCompleted(i64),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short cause-class label recorded on failed job rows.
    ///
    /// Only retrieval-path failures have a cause class; anything else is
    /// reported as a generic internal failure.
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Error::StagingFull => "staging_full",
            Error::RetrievalTimeout { .. } => "retrieval_timeout",
            Error::RetrievalAuthFailure(_) => "retrieval_auth_failure",
            Error::RetrievalProcessError(_) => "retrieval_process_error",
            _ => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("Serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_forbidden() {
        let err = Error::Forbidden;
        assert_eq!(err.to_string(), "Forbidden: requester is on the deny list");
    }

    #[test]
    fn test_error_display_too_many_requests() {
        let err = Error::TooManyRequests {
            existing_job_id: 42,
        };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_error_display_retrieval_timeout() {
        let err = Error::RetrievalTimeout { timeout_secs: 3600 };
        assert_eq!(err.to_string(), "Retrieval timed out after 3600s");
    }

    #[test]
    fn test_error_display_job_not_completed() {
        let err = Error::JobNotCompleted(7);
        assert_eq!(err.to_string(), "Job 7 is not completed");
    }

    #[test]
    fn test_failure_reason_classes() {
        assert_eq!(Error::StagingFull.failure_reason(), "staging_full");
        assert_eq!(
            Error::RetrievalTimeout { timeout_secs: 1 }.failure_reason(),
            "retrieval_timeout"
        );
        assert_eq!(
            Error::RetrievalAuthFailure("bad keytab".into()).failure_reason(),
            "retrieval_auth_failure"
        );
        assert_eq!(
            Error::RetrievalProcessError("exit 64".into()).failure_reason(),
            "retrieval_process_error"
        );
        assert_eq!(Error::TokenExpired.failure_reason(), "internal");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
