//! Download token store and state machine.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};

use coldstage_core::{
    generate_token, ArtifactLocation, DownloadToken, Error, Result, TokenConfig, TokenStatus,
    TokenStore,
};

/// PostgreSQL implementation of [`TokenStore`].
///
/// Expiry is evaluated lazily at validation time (flipping the row as a side
/// effect) and reconciled by [`expire_overdue`](TokenStore::expire_overdue).
/// The download-count increment is a single guarded UPDATE so concurrent
/// validations cannot oversubscribe the last remaining use.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: Pool<Postgres>,
    config: TokenConfig,
}

const TOKEN_COLUMNS: &str = "token_id, token, job_id, status::text, download_count, max_downloads, \
                             created_time, expires_at, last_download_time, last_download_ip";

impl PgTokenStore {
    /// Create a new PgTokenStore with the given pool and issuance settings.
    pub fn new(pool: Pool<Postgres>, config: TokenConfig) -> Self {
        Self { pool, config }
    }

    fn parse_token_row(row: sqlx::postgres::PgRow) -> DownloadToken {
        let status: String = row.get("status");
        DownloadToken {
            token_id: row.get("token_id"),
            token: row.get("token"),
            job_id: row.get("job_id"),
            status: TokenStatus::from_str_lossy(&status),
            download_count: row.get("download_count"),
            max_downloads: row.get("max_downloads"),
            created_time: row.get("created_time"),
            expires_at: row.get("expires_at"),
            last_download_time: row.get("last_download_time"),
            last_download_ip: row.get("last_download_ip"),
        }
    }

    /// Flip an active token row to `expired`.
    ///
    /// Guarded on `active`: a concurrent administrative disable wins, since
    /// `disabled` has no legal transition to `expired`.
    async fn mark_expired(&self, token_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE download_tokens SET status = 'expired'::token_status
             WHERE token_id = $1 AND status = 'active'::token_status",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn issue(&self, job_id: i64) -> Result<DownloadToken> {
        let now = Utc::now();
        let expires_at = now + self.config.validity;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let job_row: Option<(String, String)> = sqlx::query_as(
            "SELECT job_status::text, user_email FROM user_jobs WHERE job_id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let user_email = match job_row {
            Some((status, email)) if status == "completed" => email,
            Some(_) => return Err(Error::JobNotCompleted(job_id)),
            None => return Err(Error::NotFound(format!("job {job_id}"))),
        };

        // Re-issuance policy: at most one active token per job. An earlier
        // active token is disabled rather than left as a second live link.
        let superseded = sqlx::query(
            "UPDATE download_tokens SET status = 'disabled'::token_status
             WHERE job_id = $1 AND status = 'active'::token_status",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if superseded.rows_affected() > 0 {
            debug!(
                subsystem = "tokens",
                job_id,
                superseded = superseded.rows_affected(),
                "Disabled previously active token(s) before re-issuance"
            );
        }

        let token = generate_token(job_id, &user_email);

        let row = sqlx::query(&format!(
            "INSERT INTO download_tokens
                 (token, job_id, status, download_count, max_downloads, created_time, expires_at)
             VALUES ($1, $2, 'active'::token_status, 0, $3, $4, $5)
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(&token)
        .bind(job_id)
        .bind(self.config.max_downloads)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "tokens",
            op = "issue",
            job_id,
            max_downloads = self.config.max_downloads,
            expires_at = %expires_at,
            "Issued download token"
        );

        Ok(Self::parse_token_row(row))
    }

    async fn validate(&self, token: &str, origin: Option<&str>) -> Result<ArtifactLocation> {
        let now = Utc::now();

        let existing = self.get(token).await?.ok_or(Error::TokenNotFound)?;

        match existing.status {
            TokenStatus::Disabled => return Err(Error::TokenDisabled),
            TokenStatus::Expired => return Err(Error::TokenExpired),
            TokenStatus::Active => {
                // Lazy reconciliation: flip an overdue/overused row before
                // rejecting, so reads reflect reality without waiting for
                // the sweep.
                if existing.should_expire(now) {
                    self.mark_expired(existing.token_id).await?;
                    return Err(Error::TokenExpired);
                }
            }
        }

        // Single atomic guarded increment; two simultaneous validations of
        // a token with one remaining use cannot both pass the guard.
        let consumed = sqlx::query(
            "UPDATE download_tokens
             SET download_count = download_count + 1,
                 last_download_time = $1,
                 last_download_ip = $2
             WHERE token_id = $3
               AND status = 'active'::token_status
               AND download_count < max_downloads
               AND expires_at > $1
             RETURNING job_id",
        )
        .bind(now)
        .bind(origin)
        .bind(existing.token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let job_id: i64 = match consumed {
            Some(row) => row.get("job_id"),
            // Lost a race against a concurrent validation, a disable, or the
            // sweep. Re-read the row to report its actual state.
            None => {
                let current = self.get(token).await?.ok_or(Error::TokenNotFound)?;
                if current.status == TokenStatus::Disabled {
                    return Err(Error::TokenDisabled);
                }
                self.mark_expired(existing.token_id).await?;
                return Err(Error::TokenExpired);
            }
        };

        let file_name: String =
            sqlx::query_scalar("SELECT file_name FROM user_jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

        debug!(
            subsystem = "tokens",
            op = "validate",
            job_id,
            origin = origin.unwrap_or("-"),
            "Token validated, download count incremented"
        );

        Ok(ArtifactLocation { job_id, file_name })
    }

    async fn get(&self, token: &str) -> Result<Option<DownloadToken>> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM download_tokens WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_token_row))
    }

    async fn list_for_job(&self, job_id: i64) -> Result<Vec<DownloadToken>> {
        let rows = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM download_tokens
             WHERE job_id = $1 ORDER BY created_time DESC"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_token_row).collect())
    }

    async fn disable(&self, token: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE download_tokens SET status = 'disabled'::token_status WHERE token = $1",
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::TokenNotFound);
        }
        info!(subsystem = "tokens", op = "disable", "Token disabled");
        Ok(())
    }

    async fn reactivate(&self, token: &str) -> Result<()> {
        let now = Utc::now();

        // Reactivation is only valid while time and uses remain.
        let result = sqlx::query(
            "UPDATE download_tokens SET status = 'active'::token_status
             WHERE token = $1
               AND status = 'disabled'::token_status
               AND expires_at > $2
               AND download_count < max_downloads",
        )
        .bind(token)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 1 {
            info!(subsystem = "tokens", op = "reactivate", "Token reactivated");
            return Ok(());
        }

        match self.get(token).await? {
            None => Err(Error::TokenNotFound),
            Some(t) if t.should_expire(now) => Err(Error::TokenExpired),
            Some(_) => Err(Error::InvalidInput(
                "token is not disabled".to_string(),
            )),
        }
    }

    async fn expire_overdue(&self) -> Result<u64> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE download_tokens SET status = 'expired'::token_status
             WHERE status = 'active'::token_status
               AND (expires_at <= $1 OR download_count >= max_downloads)",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let flipped = result.rows_affected();
        if flipped > 0 {
            info!(
                subsystem = "tokens",
                op = "expire_overdue",
                flipped,
                "Reconciled overdue tokens"
            );
        }
        Ok(flipped)
    }
}
