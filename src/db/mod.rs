//! # Database: PostgreSQL Storage Layer
//!
//! Async storage for benchmark runs and per-platform build records via
//! `sqlx::PgPool`.
//!
//! ## Schema
//!
//! - `benchmark_runs`: run_timestamp, trigger_type, notes
//! - `platform_builds`: run_id (FK), platform, trigger_time, completion_time,
//!   duration_seconds, status, build_id, error_message, metadata
//!
//! The schema lives in `migrations/001_create_benchmark_tables.sql`.
//!
//! ## Module Structure
//!
//! - [`runs`]: [`RunRecorder`](crate::recorder::RunRecorder) implementation
//!   and read-back queries
//!
//! ## Concurrency
//!
//! Every monitoring task writes through the same pool. Each write is its own
//! short transaction, so the pool is sized for one connection per platform
//! plus the run insert.

mod runs;

use crate::error::StorageError;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Parses the URL by hand so that percent-encoded credentials and pooler
    /// usernames containing dots (`postgres.project-ref`) survive intact.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let opts = connect_options(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect_with(opts)
            .await
            .map_err(|e| StorageError::Connect(e.to_string()))?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    pub async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

fn connect_options(database_url: &str) -> Result<PgConnectOptions, StorageError> {
    let bad = |what: &str| StorageError::Connect(format!("invalid DATABASE_URL: {}", what));
    let url = url::Url::parse(database_url).map_err(|e| bad(&e.to_string()))?;
    if !matches!(url.scheme(), "postgres" | "postgresql") {
        return Err(bad("scheme must be postgres:// or postgresql://"));
    }
    let username = urlencoding::decode(url.username())
        .map_err(|e| bad(&e.to_string()))?
        .into_owned();
    let password = url
        .password()
        .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
        .transpose()
        .map_err(|e| bad(&e.to_string()))?;
    let mut opts = PgConnectOptions::new()
        .host(url.host_str().unwrap_or("localhost"))
        .port(url.port().unwrap_or(5432))
        .database(url.path().trim_start_matches('/'))
        .username(&username)
        .statement_cache_capacity(0);
    if let Some(ref pw) = password {
        opts = opts.password(pw);
    }
    Ok(opts)
}
