//! HTTP handlers for intake, polling, download, and admin operations.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use coldstage_core::models::{DownloadToken, Job};
use coldstage_core::{Error, JobStore, TokenStore};

use crate::error::ApiError;
use crate::intake::IntakeService;

const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakeService>,
    pub jobs: Arc<dyn JobStore>,
    pub tokens: Arc<dyn TokenStore>,
    /// Staging root the download handler serves artifacts from.
    pub staging_root: PathBuf,
}

// =============================================================================
// JOB INTAKE AND POLLING
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub user_email: String,
    pub sda_path: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: i64,
    pub status: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status.as_str().to_string(),
            file_name: job.file_name,
            job_size: job.job_size,
            failure_reason: job.failure_reason,
            download_url: job.download_url,
            created_time: job.created_time,
            update_time: job.update_time,
        }
    }
}

/// Client origin: `X-Forwarded-For` when fronted by a proxy, else peer addr.
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return Some(forwarded);
    }
    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source_ip = client_ip(&headers, connect_info.as_ref());
    let job_id = state
        .intake
        .submit(&req.user_email, &req.sda_path, source_ip.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id,
            status: "submitted".to_string(),
        }),
    ))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {job_id} not found")))?;
    Ok(Json(job.into()))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {job_id} not found")))?;
    if !state.jobs.cancel(job_id).await? {
        return Err(ApiError::Conflict(format!(
            "Job {job_id} already reached a terminal status"
        )));
    }
    info!(subsystem = "api", op = "cancel_job", job_id, "Job cancelled");
    Ok(Json(serde_json::json!({
        "job_id": job_id,
        "status": "cancelled",
    })))
}

// =============================================================================
// DOWNLOAD
// =============================================================================

pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<impl IntoResponse, ApiError> {
    let origin = client_ip(&headers, connect_info.as_ref());
    let location = state
        .tokens
        .validate(&token, origin.as_deref())
        .await
        .map_err(|e| match e {
            // One uniform answer for every invalid token.
            Error::TokenNotFound | Error::TokenExpired | Error::TokenDisabled => {
                ApiError::DownloadUnavailable
            }
            other => ApiError::from(other),
        })?;

    let path = state.staging_root.join(&location.file_name);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            // Valid token but the artifact was already reclaimed.
            warn!(
                subsystem = "api",
                op = "download",
                job_id = location.job_id,
                path = %path.display(),
                error = %e,
                "Staged artifact missing for valid token"
            );
            return Err(ApiError::DownloadUnavailable);
        }
    };
    let size = file.metadata().await.map_err(Error::from)?.len();

    info!(
        subsystem = "api",
        op = "download",
        job_id = location.job_id,
        file_name = %location.file_name,
        size_bytes = size,
        origin = origin.as_deref().unwrap_or("unknown"),
        "Serving staged artifact"
    );

    let stream = futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; DOWNLOAD_CHUNK_BYTES];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            Ok::<_, std::io::Error>(None)
        } else {
            buf.truncate(n);
            Ok(Some((axum::body::Bytes::from(buf), file)))
        }
    });

    let disposition = format!("attachment; filename=\"{}\"", location.file_name);
    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        ),
        (
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition)
                .map_err(|e| Error::Internal(format!("invalid artifact name: {e}")))?,
        ),
        (header::CONTENT_LENGTH, HeaderValue::from(size)),
    ];
    Ok((StatusCode::OK, headers, Body::from_stream(stream)))
}

// =============================================================================
// ADMIN
// =============================================================================

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub job_id: i64,
    pub status: String,
    pub download_count: i32,
    pub max_downloads: i32,
    pub created_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_download_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_download_ip: Option<String>,
}

impl From<DownloadToken> for TokenResponse {
    fn from(t: DownloadToken) -> Self {
        Self {
            token: t.token,
            job_id: t.job_id,
            status: t.status.as_str().to_string(),
            download_count: t.download_count,
            max_downloads: t.max_downloads,
            created_time: t.created_time,
            expires_at: t.expires_at,
            last_download_time: t.last_download_time,
            last_download_ip: t.last_download_ip,
        }
    }
}

pub async fn list_job_tokens(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Vec<TokenResponse>>, ApiError> {
    state
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {job_id} not found")))?;
    let tokens = state.tokens.list_for_job(job_id).await?;
    Ok(Json(tokens.into_iter().map(Into::into).collect()))
}

pub async fn disable_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.tokens.disable(&token).await?;
    info!(subsystem = "api", op = "disable_token", "Token disabled");
    Ok(Json(serde_json::json!({"status": "disabled"})))
}

pub async fn reactivate_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.tokens.reactivate(&token).await?;
    info!(subsystem = "api", op = "reactivate_token", "Token reactivated");
    Ok(Json(serde_json::json!({"status": "active"})))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let pending = state.jobs.pending_count().await?;
    Ok(Json(serde_json::json!({"pending_jobs": pending})))
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}
