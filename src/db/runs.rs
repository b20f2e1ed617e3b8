//! Benchmark run and platform build operations.
//!
//! ## Lifecycle
//!
//! 1. `create_run`: one `benchmark_runs` row per orchestration
//! 2. `record_build_start`: `platform_builds` row in `in_progress`, before polling
//! 3. `record_build_completion`: single guarded UPDATE to the terminal state;
//!    duration is derived from `trigger_time` inside the same statement
//!
//! Every write runs in its own transaction. No transaction spans tasks.

use super::Database;
use crate::error::StorageError;
use crate::model::{BenchmarkRunRow, BuildStatus, Platform, PlatformBuildRow, TriggerType};
use crate::recorder::{BuildCompletion, RunRecorder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
impl RunRecorder for Database {
    async fn create_run(
        &self,
        trigger_type: TriggerType,
        notes: Option<&str>,
    ) -> Result<i64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let run_id: i64 = sqlx::query_scalar(
            "INSERT INTO benchmark_runs (run_timestamp, trigger_type, notes)
             VALUES (NOW(), $1, $2)
             RETURNING id",
        )
        .bind(trigger_type.as_str())
        .bind(notes)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(run_id)
    }

    async fn record_build_start(
        &self,
        run_id: i64,
        platform: Platform,
        trigger_time: DateTime<Utc>,
        build_ref: Option<&str>,
    ) -> Result<i64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO platform_builds (run_id, platform, trigger_time, status, build_id)
             VALUES ($1, $2, $3, 'in_progress', $4)
             RETURNING id",
        )
        .bind(run_id)
        .bind(platform.as_str())
        .bind(trigger_time)
        .bind(build_ref)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn record_build_completion(
        &self,
        build_record_id: i64,
        completion: &BuildCompletion,
    ) -> Result<(), StorageError> {
        if !completion.status.is_terminal() {
            return Err(StorageError::NonTerminalCompletion {
                id: build_record_id,
                status: completion.status,
            });
        }
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE platform_builds
             SET completion_time = $1,
                 duration_seconds = GREATEST(EXTRACT(EPOCH FROM ($1 - trigger_time))::DOUBLE PRECISION, 0),
                 status = $2,
                 error_message = $3,
                 metadata = $4
             WHERE id = $5 AND status IN ('in_progress', $2)",
        )
        .bind(completion.completion_time)
        .bind(completion.status.as_str())
        .bind(completion.error_message.as_deref())
        .bind(completion.metadata.clone())
        .bind(build_record_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT status FROM platform_builds WHERE id = $1")
                    .bind(build_record_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(match existing {
                None => StorageError::NotFound(build_record_id),
                Some(status) => StorageError::TerminalConflict {
                    id: build_record_id,
                    existing: status.parse().unwrap_or(BuildStatus::InProgress),
                    attempted: completion.status,
                },
            });
        }
        tx.commit().await?;
        Ok(())
    }
}

impl Database {
    /// Get a single benchmark run by ID.
    pub async fn get_run(&self, run_id: i64) -> Result<Option<BenchmarkRunRow>, StorageError> {
        let row = sqlx::query_as::<_, BenchmarkRunRow>(
            "SELECT id, run_timestamp, trigger_type, notes
             FROM benchmark_runs WHERE id = $1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// All build records of one run, ordered by platform.
    pub async fn get_platform_builds(
        &self,
        run_id: i64,
    ) -> Result<Vec<PlatformBuildRow>, StorageError> {
        let rows = sqlx::query_as::<_, PlatformBuildRow>(
            "SELECT id, run_id, platform, trigger_time, completion_time,
                    duration_seconds, status, build_id, error_message, metadata
             FROM platform_builds
             WHERE run_id = $1
             ORDER BY platform",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
