//! # coldstage-db
//!
//! PostgreSQL persistence layer for coldstage.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgJobStore`]: the job table doubling as the dispatch queue
//!   (`FOR UPDATE SKIP LOCKED` claims, compare-and-set transitions)
//! - [`PgTokenStore`]: the download-token state machine with atomic
//!   guarded download counting
//!
//! The schema lives under `migrations/` and is applied with
//! [`Database::migrate`] at startup.
//!
//! ## Example
//!
//! ```rust,ignore
//! use coldstage_db::Database;
//! use coldstage_core::{JobStore, TokenConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/coldstage", TokenConfig::default()).await?;
//!     let job_id = db.jobs.submit("a@x.edu", "/sda/coll/c1.tar", "c1.tar", None).await?;
//!     println!("Created job: {job_id}");
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod pool;
pub mod tokens;

pub use jobs::PgJobStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use tokens::PgTokenStore;

use coldstage_core::{Result, TokenConfig};

/// Combined database context with both stores.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job store / dispatch queue.
    pub jobs: PgJobStore,
    /// Download token store.
    pub tokens: PgTokenStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>, token_config: TokenConfig) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            tokens: PgTokenStore::new(pool.clone(), token_config),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str, token_config: TokenConfig) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool, token_config))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(
        url: &str,
        pool_config: PoolConfig,
        token_config: TokenConfig,
    ) -> Result<Self> {
        let pool = create_pool_with_config(url, pool_config).await?;
        Ok(Self::new(pool, token_config))
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| coldstage_core::Error::Database(e.into()))?;
        Ok(())
    }
}
