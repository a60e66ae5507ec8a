//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use coldstage_core::Error;

/// Wire-facing error wrapper; every handler returns `Result<_, ApiError>`.
#[derive(Debug)]
pub enum ApiError {
    Forbidden,
    TooManyRequests { existing_job_id: i64 },
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Gone(String),
    /// Uniform response for any invalid download token; never distinguishes
    /// unknown, expired, and disabled so artifact existence cannot be probed.
    DownloadUnavailable,
    Internal(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Forbidden => ApiError::Forbidden,
            Error::TooManyRequests { existing_job_id } => {
                ApiError::TooManyRequests { existing_job_id }
            }
            Error::TokenNotFound => ApiError::NotFound("Token not found".into()),
            Error::TokenExpired => ApiError::Gone("Token expired".into()),
            Error::TokenDisabled => ApiError::Conflict("Token disabled".into()),
            Error::JobNotCompleted(id) => ApiError::Conflict(format!("Job {id} is not completed")),
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "error": "Requester is not permitted to submit retrieval requests",
                })),
            ),
            ApiError::TooManyRequests { existing_job_id } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "An equivalent request is already in flight",
                    "existing_job_id": existing_job_id,
                })),
            ),
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": msg})))
            }
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": msg})),
            ),
            ApiError::Conflict(msg) => {
                (StatusCode::CONFLICT, Json(serde_json::json!({"error": msg})))
            }
            ApiError::Gone(msg) => (StatusCode::GONE, Json(serde_json::json!({"error": msg}))),
            ApiError::DownloadUnavailable => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "Download not available"})),
            ),
            ApiError::Internal(err) => {
                tracing::error!(subsystem = "api", error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "Internal server error"})),
                )
            }
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_expected_statuses() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (Error::Forbidden.into(), StatusCode::FORBIDDEN),
            (
                Error::TooManyRequests { existing_job_id: 1 }.into(),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (Error::TokenNotFound.into(), StatusCode::NOT_FOUND),
            (Error::TokenExpired.into(), StatusCode::GONE),
            (Error::TokenDisabled.into(), StatusCode::CONFLICT),
            (Error::JobNotCompleted(1).into(), StatusCode::CONFLICT),
            (
                Error::InvalidInput("bad".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Internal("boom".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_download_unavailable_is_uniform_404() {
        assert_eq!(
            ApiError::DownloadUnavailable.into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
