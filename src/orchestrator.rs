//! # Orchestrator: Fan-out, Poll, Record
//!
//! Turns one batch of trigger results into one benchmark run.
//!
//! ```text
//! Created ──create_run──> Fanout ──spawn per triggered platform──> Collecting ──join all──> Recorded
//!                                   │
//!                                   └─ task: record_build_start
//!                                            → resolve build (probe phase)
//!                                            → BoundedPoller
//!                                            → record_build_completion
//! ```
//!
//! Each task owns its build record id and its provider handle; the only
//! shared resource is the recorder. A task's failure (provider, storage, or
//! even a panic) becomes that platform's outcome and never reaches its
//! siblings. Completions are written from inside each task the moment its
//! poll resolves, so a crash mid-run keeps every result already decided.
//!
//! The only run-level failures are setup errors: no provider configured for
//! any triggered platform, or `create_run` failing. Both happen before any
//! build row exists.

use crate::clock::Clock;
use crate::error::ProviderError;
use crate::lookup::{resolve_build, LookupPolicy, Resolution};
use crate::model::{BuildStatus, Platform, StatusSnapshot, TriggerResult, TriggerType};
use crate::poller::BoundedPoller;
use crate::provider::ProviderSet;
use crate::recorder::{duration_seconds, BuildCompletion, RunRecorder};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Timing and identity settings for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Budget measured from each platform's trigger time.
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub lookup: LookupPolicy,
    pub trigger_type: TriggerType,
    pub notes: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            max_wait: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_secs(10),
            lookup: LookupPolicy::default(),
            trigger_type: TriggerType::Scheduled,
            notes: None,
        }
    }
}

/// What happened to one platform in a run.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformOutcome {
    pub platform: Platform,
    pub triggered: bool,
    /// Why the platform was skipped (`triggered = false`).
    pub skip_reason: Option<String>,
    pub build_record_id: Option<i64>,
    pub status: Option<BuildStatus>,
    pub error_message: Option<String>,
    pub duration_seconds: Option<f64>,
    /// The terminal state reached storage.
    pub persisted: bool,
}

impl PlatformOutcome {
    fn skipped(trigger: &TriggerResult) -> Self {
        PlatformOutcome {
            platform: trigger.platform,
            triggered: false,
            skip_reason: trigger.reason.clone(),
            build_record_id: None,
            status: None,
            error_message: None,
            duration_seconds: None,
            persisted: false,
        }
    }

    fn unrecorded(platform: Platform, build_record_id: Option<i64>, error: String) -> Self {
        PlatformOutcome {
            platform,
            triggered: true,
            skip_reason: None,
            build_record_id,
            status: Some(BuildStatus::Failure),
            error_message: Some(error),
            duration_seconds: None,
            persisted: false,
        }
    }

    /// One human-readable summary line.
    pub fn summary_line(&self) -> String {
        if !self.triggered {
            return format!(
                "{:<9} skipped   ({})",
                self.platform,
                self.skip_reason.as_deref().unwrap_or("not triggered")
            );
        }
        let status = self.status.map(|s| s.as_str()).unwrap_or("unknown");
        let mut line = format!("{:<9} {:<9}", self.platform, status);
        if let Some(d) = self.duration_seconds {
            line.push_str(&format!(" {:>8.1}s", d));
        }
        if let Some(id) = self.build_record_id {
            line.push_str(&format!("  record #{}", id));
        }
        if let Some(err) = &self.error_message {
            line.push_str(&format!("  error: {}", err));
        }
        if !self.persisted {
            line.push_str("  [NOT RECORDED]");
        }
        line
    }
}

/// Result of a whole orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: i64,
    /// One entry per trigger result, in input order.
    pub outcomes: Vec<PlatformOutcome>,
}

impl RunReport {
    /// Every triggered platform reached a terminal status that was stored.
    pub fn all_recorded(&self) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.triggered)
            .all(|o| o.persisted && o.status.is_some_and(|s| s.is_terminal()))
    }

    pub fn triggered_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.triggered).count()
    }

    pub fn recorded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.persisted).count()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        self.outcomes.iter().map(PlatformOutcome::summary_line).collect()
    }
}

struct MonitorContext {
    run_id: i64,
    recorder: Arc<dyn RunRecorder>,
    providers: ProviderSet,
    clock: Arc<dyn Clock>,
    poller: BoundedPoller,
    settings: RunSettings,
}

pub struct Orchestrator {
    recorder: Arc<dyn RunRecorder>,
    providers: ProviderSet,
    clock: Arc<dyn Clock>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        recorder: Arc<dyn RunRecorder>,
        providers: ProviderSet,
        clock: Arc<dyn Clock>,
        settings: RunSettings,
    ) -> Self {
        Orchestrator {
            recorder,
            providers,
            clock,
            settings,
        }
    }

    /// Run one benchmark: create the run, monitor every triggered platform
    /// concurrently, and wait for all of them.
    pub async fn run(&self, triggers: &[TriggerResult]) -> Result<RunReport> {
        let triggered: Vec<Platform> = triggers
            .iter()
            .filter(|t| t.triggered)
            .map(|t| t.platform)
            .collect();
        if !triggered.is_empty() && !triggered.iter().any(|p| self.providers.contains(*p)) {
            anyhow::bail!(
                "no platform credentials configured for any triggered platform ({})",
                triggered
                    .iter()
                    .map(Platform::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let run_id = self
            .recorder
            .create_run(self.settings.trigger_type, self.settings.notes.as_deref())
            .await
            .context("failed to create benchmark run")?;
        info!(run_id, trigger_type = %self.settings.trigger_type, platforms = triggered.len(), "created benchmark run");

        let ctx = Arc::new(MonitorContext {
            run_id,
            recorder: Arc::clone(&self.recorder),
            providers: self.providers.clone(),
            clock: Arc::clone(&self.clock),
            poller: BoundedPoller::new(Arc::clone(&self.clock)),
            settings: self.settings.clone(),
        });

        let mut slots: Vec<Slot> = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            if !trigger.triggered {
                info!(
                    platform = %trigger.platform,
                    reason = trigger.reason.as_deref().unwrap_or("-"),
                    "skipped (not triggered)"
                );
                slots.push(Slot::Done(PlatformOutcome::skipped(trigger)));
                continue;
            }
            let ctx = Arc::clone(&ctx);
            let trigger = trigger.clone();
            let platform = trigger.platform;
            let handle = tokio::spawn(async move { monitor(ctx, trigger).await });
            slots.push(Slot::Running(platform, handle));
        }

        // Join barrier: tasks already run concurrently, so awaiting them in
        // input order does not delay any of them.
        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            let outcome = match slot {
                Slot::Done(outcome) => outcome,
                Slot::Running(platform, handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(%platform, run_id, error = %e, "monitoring task aborted");
                        PlatformOutcome::unrecorded(
                            platform,
                            None,
                            format!("monitoring task aborted: {}", e),
                        )
                    }
                },
            };
            outcomes.push(outcome);
        }

        let report = RunReport { run_id, outcomes };
        info!(
            run_id,
            triggered = report.triggered_count(),
            recorded = report.recorded_count(),
            "benchmark run finished"
        );
        Ok(report)
    }
}

enum Slot {
    Done(PlatformOutcome),
    Running(Platform, tokio::task::JoinHandle<PlatformOutcome>),
}

/// One platform's task: start row, observe to a terminal snapshot, store it.
async fn monitor(ctx: Arc<MonitorContext>, trigger: TriggerResult) -> PlatformOutcome {
    let platform = trigger.platform;
    let run_id = ctx.run_id;
    let trigger_time = match trigger.timestamp {
        Some(t) => t,
        None => {
            warn!(%platform, "trigger result has no timestamp, using current time");
            ctx.clock.now()
        }
    };

    let build_record_id = match ctx
        .recorder
        .record_build_start(run_id, platform, trigger_time, trigger.build_ref())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!(%platform, run_id, error = %e, "failed to record build start");
            return PlatformOutcome::unrecorded(platform, None, e.to_string());
        }
    };
    info!(%platform, run_id, build_record_id, "monitoring build");

    let snapshot = observe(&ctx, &trigger, trigger_time).await;
    let completion = to_completion(platform, &snapshot, ctx.clock.now(), &ctx.settings);
    let duration = duration_seconds(trigger_time, completion.completion_time);

    // Logged before the write so the outcome survives a failed persist.
    info!(
        %platform,
        run_id,
        build_record_id,
        status = %completion.status,
        duration_secs = duration,
        completion_time = %completion.completion_time.to_rfc3339(),
        error = completion.error_message.as_deref().unwrap_or(""),
        "build resolved"
    );

    let persisted = match ctx
        .recorder
        .record_build_completion(build_record_id, &completion)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            error!(%platform, run_id, build_record_id, status = %completion.status, error = %e, "failed to record build completion");
            false
        }
    };

    PlatformOutcome {
        platform,
        triggered: true,
        skip_reason: None,
        build_record_id: Some(build_record_id),
        status: Some(completion.status),
        error_message: completion.error_message,
        duration_seconds: Some(duration),
        persisted,
    }
}

/// Resolve the platform build and poll it to a terminal snapshot. Never
/// fails: every error path produces a terminal `failure` snapshot, and a
/// budget spent before the build turns up produces `timeout`.
async fn observe(
    ctx: &MonitorContext,
    trigger: &TriggerResult,
    trigger_time: chrono::DateTime<chrono::Utc>,
) -> StatusSnapshot {
    let platform = trigger.platform;
    let Some(provider) = ctx.providers.get(platform) else {
        warn!(%platform, "no credentials configured");
        let err = ProviderError::MissingCredentials(platform.as_str());
        return StatusSnapshot::provider_failure(ctx.clock.now(), &err.to_string());
    };

    // Probing and polling share one budget, anchored at trigger time.
    let deadline = chrono::Duration::from_std(ctx.settings.max_wait)
        .ok()
        .and_then(|budget| trigger_time.checked_add_signed(budget))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

    let resolved = match resolve_build(
        provider.as_ref(),
        trigger,
        &ctx.settings.lookup,
        ctx.clock.as_ref(),
        deadline,
    )
    .await
    {
        Ok(Resolution::Found(snapshot)) => snapshot,
        Ok(Resolution::NotFound) => {
            warn!(%platform, "could not find build");
            return StatusSnapshot::provider_failure(
                ctx.clock.now(),
                "build not found in platform history",
            );
        }
        Ok(Resolution::DeadlinePassed) => {
            warn!(%platform, "timed out before the build was found");
            return StatusSnapshot::timed_out(ctx.clock.now());
        }
        Err(e) => {
            warn!(%platform, error = %e, "build lookup failed");
            return StatusSnapshot::provider_failure(ctx.clock.now(), &e.to_string());
        }
    };

    if resolved.completed && resolved.status.is_terminal() {
        return resolved;
    }
    let Some(build_id) = resolved.build_id.clone() else {
        return StatusSnapshot::provider_failure(
            ctx.clock.now(),
            "platform returned a build without an id",
        );
    };

    // The lookup itself was an observation: wait one interval (or whatever
    // is left of the budget) before the poller's first call.
    let remaining = |now: chrono::DateTime<chrono::Utc>| {
        (deadline - now).to_std().unwrap_or(Duration::ZERO)
    };
    let left = remaining(ctx.clock.now());
    if left.is_zero() {
        let mut snapshot = StatusSnapshot::timed_out(ctx.clock.now());
        snapshot.build_id = Some(build_id);
        return snapshot;
    }
    ctx.clock.sleep(ctx.settings.poll_interval.min(left)).await;

    ctx.poller
        .run(
            provider.as_ref(),
            &build_id,
            remaining(ctx.clock.now()),
            ctx.settings.poll_interval,
        )
        .await
        .snapshot
}

fn to_completion(
    platform: Platform,
    snapshot: &StatusSnapshot,
    now: chrono::DateTime<chrono::Utc>,
    settings: &RunSettings,
) -> BuildCompletion {
    let error_message = match snapshot.status {
        BuildStatus::Failure => Some(
            snapshot
                .error_detail()
                .or_else(|| snapshot.metadata.get("errorMessage").and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "build failed on {} ({})",
                        platform,
                        snapshot.native_status.as_deref().unwrap_or("unknown")
                    )
                }),
        ),
        BuildStatus::Timeout if snapshot.metadata.get("timeout").is_some() => Some(format!(
            "no terminal status within {}s",
            settings.max_wait.as_secs()
        )),
        BuildStatus::Timeout => Some(format!("build timed out on {}", platform)),
        BuildStatus::Success | BuildStatus::InProgress => None,
    };

    let mut metadata = snapshot.metadata.clone();
    if let Some(obj) = metadata.as_object_mut() {
        if let Some(id) = &snapshot.build_id {
            obj.entry("platformBuildId")
                .or_insert_with(|| serde_json::Value::String(id.clone()));
        }
        if let Some(d) = snapshot.duration_seconds {
            obj.insert("platformDurationSeconds".to_string(), serde_json::json!(d));
        }
    }

    BuildCompletion {
        completion_time: snapshot.completed_at.unwrap_or(now),
        // The poller never hands back a non-terminal snapshot; keep the
        // record invariant even if a provider misbehaves.
        status: if snapshot.status.is_terminal() {
            snapshot.status
        } else {
            BuildStatus::Failure
        },
        error_message,
        metadata: if metadata.is_null() { None } else { Some(metadata) },
    }
}
