//! # Poller: Bounded Status Polling
//!
//! Drives one [`StatusProvider`] for one build until the build completes or
//! the wait budget runs out.
//!
//! ```text
//!            ┌──────── not completed, budget left: sleep(interval) ───┐
//!            ▼                                                        │
//!         Polling ──get_status──┬── completed ──────────> Completed    │
//!                               ├── ProviderError ──────> Failed       │
//!                               ├── budget exhausted ───> TimedOut     │
//!                               └─────────────────────────────────────┘
//! ```
//!
//! Each terminal state has exactly one way in. `TimedOut` and `Failed` are
//! decided locally: the platform never said so. A provider error ends the
//! poll at once with no retry, which bounds the wall-clock cost of a
//! platform whose status API is down.

use crate::clock::Clock;
use crate::error::ProviderError;
use crate::model::StatusSnapshot;
use crate::provider::StatusProvider;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// State of one poll. `Polling` is the only non-terminal state.
#[derive(Debug, Clone)]
pub enum PollState {
    Polling,
    Completed(StatusSnapshot),
    TimedOut,
    Failed(String),
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Polling)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PollState::Polling => "polling",
            PollState::Completed(_) => "completed",
            PollState::TimedOut => "timed_out",
            PollState::Failed(_) => "failed",
        }
    }
}

/// Decide the next state from one provider observation.
///
/// A snapshot flagged completed but still carrying `in_progress` is not
/// accepted as terminal.
pub fn advance(
    observation: Result<StatusSnapshot, ProviderError>,
    elapsed: ChronoDuration,
    budget: ChronoDuration,
) -> PollState {
    match observation {
        Ok(snapshot) if snapshot.completed && snapshot.status.is_terminal() => {
            PollState::Completed(snapshot)
        }
        Err(e) => PollState::Failed(e.to_string()),
        Ok(_) if elapsed >= budget => PollState::TimedOut,
        Ok(_) => PollState::Polling,
    }
}

/// Result of a finished poll.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Terminal state reached; never `Polling`.
    pub state: PollState,
    /// Terminal snapshot, completion time always set.
    pub snapshot: StatusSnapshot,
    /// Number of `get_status` calls made.
    pub calls: u32,
}

pub struct BoundedPoller {
    clock: Arc<dyn Clock>,
}

impl BoundedPoller {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        BoundedPoller { clock }
    }

    /// Poll `build_id` every `interval` until it completes or `max_wait`
    /// has elapsed since the first call.
    pub async fn run(
        &self,
        provider: &dyn StatusProvider,
        build_id: &str,
        max_wait: Duration,
        interval: Duration,
    ) -> PollOutcome {
        let platform = provider.platform();
        let budget = ChronoDuration::from_std(max_wait).unwrap_or(ChronoDuration::MAX);
        let started = self.clock.now();
        let mut calls = 0u32;

        loop {
            calls += 1;
            let observation = provider.get_status(build_id).await;
            let now = self.clock.now();
            let elapsed = now - started;

            if let Ok(snapshot) = &observation {
                debug!(
                    %platform,
                    build_id,
                    status = %snapshot.status,
                    native = snapshot.native_status.as_deref().unwrap_or("-"),
                    elapsed_secs = elapsed.num_seconds(),
                    "poll"
                );
            }

            let state = advance(observation, elapsed, budget);
            let snapshot = match &state {
                PollState::Polling => {
                    self.clock.sleep(interval).await;
                    continue;
                }
                PollState::Completed(snapshot) => {
                    info!(
                        %platform,
                        build_id,
                        status = %snapshot.status,
                        elapsed_secs = elapsed.num_seconds(),
                        "build completed"
                    );
                    let mut snapshot = snapshot.clone();
                    snapshot.completed_at.get_or_insert(now);
                    if snapshot.build_id.is_none() {
                        snapshot.build_id = Some(build_id.to_string());
                    }
                    snapshot
                }
                PollState::TimedOut => {
                    warn!(%platform, build_id, elapsed_secs = elapsed.num_seconds(), "poll timed out");
                    let mut snapshot = StatusSnapshot::timed_out(now);
                    snapshot.build_id = Some(build_id.to_string());
                    snapshot
                }
                PollState::Failed(error) => {
                    warn!(%platform, build_id, error = %error, "status check failed, giving up");
                    let mut snapshot = StatusSnapshot::provider_failure(now, error);
                    snapshot.build_id = Some(build_id.to_string());
                    snapshot
                }
            };
            debug!(%platform, build_id, state = state.label(), calls, "poll finished");
            return PollOutcome {
                state,
                snapshot,
                calls,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{BuildStatus, Platform};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of responses; repeats the last one forever.
    struct Script {
        steps: Mutex<VecDeque<Result<BuildStatus, String>>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(steps: Vec<Result<BuildStatus, String>>) -> Self {
            Script {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    fn snapshot(status: BuildStatus) -> StatusSnapshot {
        StatusSnapshot {
            status,
            completed: status.is_terminal(),
            build_id: None,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            native_status: None,
            metadata: serde_json::json!({}),
        }
    }

    #[async_trait]
    impl StatusProvider for Script {
        fn platform(&self) -> Platform {
            Platform::Vercel
        }

        async fn get_status(&self, _build_id: &str) -> Result<StatusSnapshot, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let mut steps = self.steps.lock().unwrap();
            let step = if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            };
            match step {
                Ok(status) => Ok(snapshot(status)),
                Err(body) => Err(ProviderError::Api {
                    platform: "vercel",
                    status: 500,
                    body,
                }),
            }
        }

        async fn list_builds(
            &self,
            _commit: Option<&str>,
            _limit: u32,
        ) -> Result<Vec<StatusSnapshot>, ProviderError> {
            Ok(Vec::new())
        }
    }

    const WAIT: Duration = Duration::from_secs(60);
    const INTERVAL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn completed_on_first_call_returns_immediately() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Script::new(vec![Ok(BuildStatus::Success)]);
        let outcome = BoundedPoller::new(clock)
            .run(&provider, "b1", WAIT, INTERVAL)
            .await;
        assert!(matches!(outcome.state, PollState::Completed(_)));
        assert_eq!(outcome.snapshot.status, BuildStatus::Success);
        assert_eq!(outcome.calls, 1);
        assert!(outcome.snapshot.completed_at.is_some());
    }

    #[tokio::test]
    async fn keeps_polling_until_completion() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Script::new(vec![
            Ok(BuildStatus::InProgress),
            Ok(BuildStatus::InProgress),
            Ok(BuildStatus::Failure),
        ]);
        let outcome = BoundedPoller::new(clock)
            .run(&provider, "b1", WAIT, INTERVAL)
            .await;
        assert_eq!(outcome.snapshot.status, BuildStatus::Failure);
        assert_eq!(outcome.calls, 3);
    }

    #[tokio::test]
    async fn never_completing_build_times_out_within_one_interval() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let provider = Script::new(vec![Ok(BuildStatus::InProgress)]);
        let outcome = BoundedPoller::new(clock.clone())
            .run(&provider, "b1", WAIT, INTERVAL)
            .await;
        assert!(matches!(outcome.state, PollState::TimedOut));
        assert_eq!(outcome.snapshot.status, BuildStatus::Timeout);
        assert_eq!(outcome.snapshot.metadata["timeout"], true);
        let done = outcome.snapshot.completed_at.unwrap();
        let deadline = start + ChronoDuration::from_std(WAIT).unwrap();
        assert!(done >= deadline);
        assert!(done - deadline <= ChronoDuration::from_std(INTERVAL).unwrap());
        assert_eq!(provider.calls(), 7);
    }

    #[tokio::test]
    async fn provider_error_fails_without_retry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Script::new(vec![Err("upstream unavailable".into())]);
        let outcome = BoundedPoller::new(clock)
            .run(&provider, "b1", WAIT, INTERVAL)
            .await;
        assert!(matches!(outcome.state, PollState::Failed(_)));
        assert_eq!(outcome.snapshot.status, BuildStatus::Failure);
        assert!(outcome.snapshot.error_detail().unwrap().contains("upstream unavailable"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn error_after_progress_still_stops_immediately() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Script::new(vec![
            Ok(BuildStatus::InProgress),
            Err("502".into()),
            Ok(BuildStatus::Success),
        ]);
        let outcome = BoundedPoller::new(clock)
            .run(&provider, "b1", WAIT, INTERVAL)
            .await;
        assert_eq!(outcome.snapshot.status, BuildStatus::Failure);
        assert_eq!(outcome.calls, 2);
    }

    #[test]
    fn completed_flag_with_in_progress_status_is_not_terminal() {
        let mut snap = snapshot(BuildStatus::InProgress);
        snap.completed = true;
        let state = advance(Ok(snap), ChronoDuration::zero(), ChronoDuration::seconds(60));
        assert!(matches!(state, PollState::Polling));
    }

    #[test]
    fn completion_beats_timeout_on_the_same_observation() {
        let state = advance(
            Ok(snapshot(BuildStatus::Success)),
            ChronoDuration::seconds(120),
            ChronoDuration::seconds(60),
        );
        assert_eq!(state.label(), "completed");
    }
}
