//! # Model: Runs, Builds, Triggers, Snapshots
//!
//! Shared types for the trigger-and-poll pipeline. The string forms of
//! [`Platform`], [`BuildStatus`] and [`TriggerType`] are the values stored in
//! PostgreSQL (`platform_builds.platform`, `platform_builds.status`,
//! `benchmark_runs.trigger_type`) and are checked there by constraints.
//!
//! ## Build record lifecycle
//!
//! ```text
//! record_build_start ──> in_progress ──(poll resolves, exactly once)──> success
//!                                                                      failure
//!                                                                      timeout
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

// ── Platform ────────────────────────────────────────────────────

/// A hosting platform under benchmark. Adding a platform means adding a
/// variant here plus a [`StatusProvider`](crate::provider::StatusProvider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Pantheon,
    Vercel,
    Netlify,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Pantheon, Platform::Vercel, Platform::Netlify];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Pantheon => "pantheon",
            Platform::Vercel => "vercel",
            Platform::Netlify => "netlify",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = Platform::ALL.iter().map(Platform::as_str).collect();
                anyhow::anyhow!("unknown platform: {} (expected one of {})", name, known.join(", "))
            })
    }
}

// ── Build status ────────────────────────────────────────────────

/// Normalized build status shared by every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failure,
    Timeout,
    InProgress,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Timeout => "timeout",
            BuildStatus::InProgress => "in_progress",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildStatus::InProgress)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(BuildStatus::Success),
            "failure" => Ok(BuildStatus::Failure),
            "timeout" => Ok(BuildStatus::Timeout),
            "in_progress" => Ok(BuildStatus::InProgress),
            other => Err(anyhow::anyhow!("unknown build status: {}", other)),
        }
    }
}

// ── Trigger type ────────────────────────────────────────────────

/// What started a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Event,
}

impl TriggerType {
    /// Map a CI event name (`GITHUB_EVENT_NAME`) to a trigger type.
    /// Unset or blank means the run came from the schedule.
    pub fn from_event_name(event: Option<&str>) -> Self {
        match event.map(str::trim) {
            None | Some("") | Some("schedule") | Some("scheduled") => TriggerType::Scheduled,
            Some("workflow_dispatch") | Some("manual") => TriggerType::Manual,
            Some(_) => TriggerType::Event,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
            TriggerType::Event => "event",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// ── Trigger results (input) ─────────────────────────────────────

/// One entry of `trigger-results.json`, written by the push step.
///
/// Keys are camelCase to match the file the trigger step produces. A failed
/// push carries either `reason` (e.g. `no_changes`) or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub platform: Platform,
    pub triggered: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub build_id: Option<String>,
    #[serde(default, alias = "error")]
    pub reason: Option<String>,
}

impl TriggerResult {
    /// The reference stored on the build row at start: the platform build id
    /// when the trigger knew it, else the pushed commit.
    pub fn build_ref(&self) -> Option<&str> {
        self.build_id.as_deref().or(self.commit_hash.as_deref())
    }
}

/// Parse and validate the trigger collaborator's output.
pub fn parse_trigger_results(json: &str) -> anyhow::Result<Vec<TriggerResult>> {
    let results: Vec<TriggerResult> = serde_json::from_str(json)?;
    for r in &results {
        if r.triggered && r.timestamp.is_none() {
            anyhow::bail!("trigger result for {} is marked triggered but has no timestamp", r.platform);
        }
    }
    Ok(results)
}

// ── Status snapshot ─────────────────────────────────────────────

/// One observation of a platform build, already normalized.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: BuildStatus,
    pub completed: bool,
    /// Platform-side build identifier, when the platform reported one.
    pub build_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    /// The raw status string as the platform sent it.
    pub native_status: Option<String>,
    pub metadata: Value,
}

impl StatusSnapshot {
    /// Terminal snapshot decided locally when the wait budget runs out.
    pub fn timed_out(now: DateTime<Utc>) -> Self {
        StatusSnapshot {
            status: BuildStatus::Timeout,
            completed: true,
            build_id: None,
            started_at: None,
            completed_at: Some(now),
            duration_seconds: None,
            native_status: None,
            metadata: serde_json::json!({ "timeout": true }),
        }
    }

    /// Terminal snapshot for a status check that could not be completed.
    pub fn provider_failure(now: DateTime<Utc>, error: &str) -> Self {
        StatusSnapshot {
            status: BuildStatus::Failure,
            completed: true,
            build_id: None,
            started_at: None,
            completed_at: Some(now),
            duration_seconds: None,
            native_status: None,
            metadata: serde_json::json!({ "error": error }),
        }
    }

    /// The `error` entry of the metadata blob, if any.
    pub fn error_detail(&self) -> Option<&str> {
        self.metadata.get("error").and_then(Value::as_str)
    }
}

/// Seconds between two instants, `None` unless both are known.
pub fn seconds_between(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<f64> {
    match (start, end) {
        (Some(s), Some(e)) => Some((e - s).num_milliseconds() as f64 / 1000.0),
        _ => None,
    }
}

// ── Database rows ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BenchmarkRunRow {
    pub id: i64,
    pub run_timestamp: DateTime<Utc>,
    pub trigger_type: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PlatformBuildRow {
    pub id: i64,
    pub run_id: i64,
    pub platform: String,
    pub trigger_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub status: String,
    pub build_id: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
}
