//! Shared test helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use buildbench::model::{BuildStatus, Platform, StatusSnapshot};
use buildbench::{ProviderError, StatusProvider};
use std::collections::VecDeque;
use std::sync::{Mutex, Once};

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: Once = Once::new();

/// Ensure the test database schema is set up (runs migrations once per test suite).
pub fn ensure_schema() {
    SCHEMA_INIT.call_once(|| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let pool = sqlx::PgPool::connect(&test_db_url()).await.unwrap();
            run_migrations(&pool).await;
        });
    });
}

/// Connect to the test database (also ensures schema is set up).
pub async fn setup_test_db() -> buildbench::db::Database {
    ensure_schema();
    let db = buildbench::db::Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql("TRUNCATE TABLE platform_builds, benchmark_runs RESTART IDENTITY CASCADE")
        .execute(pool)
        .await
        .unwrap();
}

async fn run_migrations(pool: &sqlx::PgPool) {
    let migration_files = ["migrations/001_create_benchmark_tables.sql"];

    for file in &migration_files {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(file);
        if !path.exists() {
            panic!("Migration file not found: {}", file);
        }
        let sql = std::fs::read_to_string(&path).unwrap();
        sqlx::raw_sql(&sql).execute(pool).await.unwrap_or_else(|e| {
            panic!("Migration {} failed: {}", file, e);
        });
    }
}

// ── Scripted provider ───────────────────────────────────────────

/// One scripted response to `get_status`.
#[derive(Clone, Debug)]
pub enum Step {
    Status(BuildStatus),
    Error(u16),
}

/// A [`StatusProvider`] that replays a script of responses, repeating the
/// last one forever, and counts every call.
pub struct ScriptedProvider {
    platform: Platform,
    steps: Mutex<VecDeque<Step>>,
    status_calls: Mutex<u32>,
    list_calls: Mutex<u32>,
}

impl ScriptedProvider {
    pub fn new(platform: Platform, steps: Vec<Step>) -> Self {
        assert!(!steps.is_empty(), "script needs at least one step");
        ScriptedProvider {
            platform,
            steps: Mutex::new(steps.into()),
            status_calls: Mutex::new(0),
            list_calls: Mutex::new(0),
        }
    }

    pub fn status_calls(&self) -> u32 {
        *self.status_calls.lock().unwrap()
    }

    pub fn list_calls(&self) -> u32 {
        *self.list_calls.lock().unwrap()
    }
}

pub fn snapshot(status: BuildStatus, build_id: &str) -> StatusSnapshot {
    StatusSnapshot {
        status,
        completed: status.is_terminal(),
        build_id: Some(build_id.to_string()),
        started_at: None,
        completed_at: None,
        duration_seconds: None,
        native_status: Some(status.as_str().to_uppercase()),
        metadata: serde_json::json!({}),
    }
}

#[async_trait]
impl StatusProvider for ScriptedProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn get_status(&self, build_id: &str) -> Result<StatusSnapshot, ProviderError> {
        *self.status_calls.lock().unwrap() += 1;
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            }
        };
        match step {
            Step::Status(status) => Ok(snapshot(status, build_id)),
            Step::Error(code) => Err(ProviderError::Api {
                platform: self.platform.as_str(),
                status: code,
                body: "scripted failure".to_string(),
            }),
        }
    }

    async fn list_builds(
        &self,
        _commit: Option<&str>,
        _limit: u32,
    ) -> Result<Vec<StatusSnapshot>, ProviderError> {
        *self.list_calls.lock().unwrap() += 1;
        Ok(Vec::new())
    }
}
