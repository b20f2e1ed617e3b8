//! # Recorder: Durable Run and Build State
//!
//! All state transitions of a benchmark run go through [`RunRecorder`].
//! Implementations:
//!
//! - [`Database`](crate::db::Database): PostgreSQL, one transaction per write.
//! - [`MemoryRecorder`]: in-process, same semantics; backs `--dry-run`.
//!
//! A completion write sets completion time, duration, status, error and
//! metadata together. Rewriting a record with the status it already has is a
//! no-op in effect; moving a terminal record to a different terminal status
//! is refused with [`StorageError::TerminalConflict`], and a completion that
//! carries `in_progress` with [`StorageError::NonTerminalCompletion`].

use crate::error::StorageError;
use crate::model::{BenchmarkRunRow, BuildStatus, Platform, PlatformBuildRow, TriggerType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Mutex;

/// Terminal data written when a poll resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildCompletion {
    pub completion_time: DateTime<Utc>,
    pub status: BuildStatus,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
}

#[async_trait]
pub trait RunRecorder: Send + Sync {
    /// Insert a benchmark run and return its id.
    async fn create_run(
        &self,
        trigger_type: TriggerType,
        notes: Option<&str>,
    ) -> Result<i64, StorageError>;

    /// Insert an `in_progress` build record. Called before polling begins.
    async fn record_build_start(
        &self,
        run_id: i64,
        platform: Platform,
        trigger_time: DateTime<Utc>,
        build_ref: Option<&str>,
    ) -> Result<i64, StorageError>;

    /// Move a build record to its terminal state.
    async fn record_build_completion(
        &self,
        build_record_id: i64,
        completion: &BuildCompletion,
    ) -> Result<(), StorageError>;
}

/// Non-negative seconds from trigger to completion.
pub fn duration_seconds(trigger: DateTime<Utc>, completion: DateTime<Utc>) -> f64 {
    ((completion - trigger).num_milliseconds() as f64 / 1000.0).max(0.0)
}

// ── In-memory recorder ──────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    runs: Vec<BenchmarkRunRow>,
    builds: Vec<PlatformBuildRow>,
}

/// [`RunRecorder`] kept in process memory.
#[derive(Default)]
pub struct MemoryRecorder {
    state: Mutex<MemoryState>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<BenchmarkRunRow> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn builds(&self) -> Vec<PlatformBuildRow> {
        self.state.lock().unwrap().builds.clone()
    }

    pub fn builds_for_run(&self, run_id: i64) -> Vec<PlatformBuildRow> {
        self.state
            .lock()
            .unwrap()
            .builds
            .iter()
            .filter(|b| b.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunRecorder for MemoryRecorder {
    async fn create_run(
        &self,
        trigger_type: TriggerType,
        notes: Option<&str>,
    ) -> Result<i64, StorageError> {
        let mut state = self.state.lock().unwrap();
        let id = state.runs.len() as i64 + 1;
        state.runs.push(BenchmarkRunRow {
            id,
            run_timestamp: Utc::now(),
            trigger_type: trigger_type.as_str().to_string(),
            notes: notes.map(str::to_string),
        });
        Ok(id)
    }

    async fn record_build_start(
        &self,
        run_id: i64,
        platform: Platform,
        trigger_time: DateTime<Utc>,
        build_ref: Option<&str>,
    ) -> Result<i64, StorageError> {
        let mut state = self.state.lock().unwrap();
        if !state.runs.iter().any(|r| r.id == run_id) {
            return Err(StorageError::NotFound(run_id));
        }
        let id = state.builds.len() as i64 + 1;
        state.builds.push(PlatformBuildRow {
            id,
            run_id,
            platform: platform.as_str().to_string(),
            trigger_time,
            completion_time: None,
            duration_seconds: None,
            status: BuildStatus::InProgress.as_str().to_string(),
            build_id: build_ref.map(str::to_string),
            error_message: None,
            metadata: None,
        });
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
        let mut state = self.state.lock().unwrap();
        let row = state
            .builds
            .iter_mut()
            .find(|b| b.id == build_record_id)
            .ok_or(StorageError::NotFound(build_record_id))?;
        let existing: BuildStatus = row
            .status
            .parse()
            .unwrap_or(BuildStatus::InProgress);
        if existing.is_terminal() && existing != completion.status {
            return Err(StorageError::TerminalConflict {
                id: build_record_id,
                existing,
                attempted: completion.status,
            });
        }
        row.completion_time = Some(completion.completion_time);
        row.duration_seconds = Some(duration_seconds(row.trigger_time, completion.completion_time));
        row.status = completion.status.as_str().to_string();
        row.error_message = completion.error_message.clone();
        row.metadata = completion.metadata.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn completion(status: BuildStatus, at: DateTime<Utc>) -> BuildCompletion {
        BuildCompletion {
            completion_time: at,
            status,
            error_message: None,
            metadata: Some(serde_json::json!({ "k": 1 })),
        }
    }

    #[tokio::test]
    async fn start_then_complete_sets_duration() {
        let rec = MemoryRecorder::new();
        let run = rec.create_run(TriggerType::Manual, Some("note")).await.unwrap();
        let t0 = Utc::now();
        let id = rec
            .record_build_start(run, Platform::Vercel, t0, Some("abc"))
            .await
            .unwrap();
        assert_eq!(rec.builds()[0].status, "in_progress");
        assert!(rec.builds()[0].completion_time.is_none());

        rec.record_build_completion(id, &completion(BuildStatus::Success, t0 + Duration::seconds(42)))
            .await
            .unwrap();
        let row = &rec.builds()[0];
        assert_eq!(row.status, "success");
        assert_eq!(row.duration_seconds, Some(42.0));
    }

    #[tokio::test]
    async fn identical_rewrite_is_idempotent() {
        let rec = MemoryRecorder::new();
        let run = rec.create_run(TriggerType::Scheduled, None).await.unwrap();
        let t0 = Utc::now();
        let id = rec.record_build_start(run, Platform::Netlify, t0, None).await.unwrap();
        let done = completion(BuildStatus::Timeout, t0 + Duration::seconds(3600));
        rec.record_build_completion(id, &done).await.unwrap();
        let before = rec.builds();
        rec.record_build_completion(id, &done).await.unwrap();
        let after = rec.builds();
        assert_eq!(after.len(), 1);
        assert_eq!(before[0].status, after[0].status);
        assert_eq!(before[0].completion_time, after[0].completion_time);
        assert_eq!(before[0].duration_seconds, after[0].duration_seconds);
    }

    #[tokio::test]
    async fn different_terminal_status_is_refused() {
        let rec = MemoryRecorder::new();
        let run = rec.create_run(TriggerType::Event, None).await.unwrap();
        let t0 = Utc::now();
        let id = rec.record_build_start(run, Platform::Pantheon, t0, None).await.unwrap();
        rec.record_build_completion(id, &completion(BuildStatus::Success, t0))
            .await
            .unwrap();
        let err = rec
            .record_build_completion(id, &completion(BuildStatus::Failure, t0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TerminalConflict { .. }));
        assert_eq!(rec.builds()[0].status, "success");
    }

    #[tokio::test]
    async fn in_progress_completion_is_refused() {
        let rec = MemoryRecorder::new();
        let run = rec.create_run(TriggerType::Manual, None).await.unwrap();
        let t0 = Utc::now();
        let id = rec.record_build_start(run, Platform::Vercel, t0, None).await.unwrap();
        let err = rec
            .record_build_completion(id, &completion(BuildStatus::InProgress, t0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NonTerminalCompletion { .. }));
        let row = &rec.builds()[0];
        assert_eq!(row.status, "in_progress");
        assert!(row.completion_time.is_none());
        assert!(row.duration_seconds.is_none());
    }

    #[tokio::test]
    async fn build_for_unknown_run_is_rejected() {
        let rec = MemoryRecorder::new();
        let err = rec
            .record_build_start(99, Platform::Vercel, Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(99)));
    }

    #[test]
    fn duration_never_negative() {
        let t = Utc::now();
        assert_eq!(duration_seconds(t, t - Duration::seconds(5)), 0.0);
        assert_eq!(duration_seconds(t, t + Duration::milliseconds(1500)), 1.5);
    }
}
