//! Property-based tests for buildbench's selection, timing and normalization rules.
//!
//! # Prerequisites
//!
//! - No database or network access required.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test property_tests
//!
//! # Increase case count for thorough testing (default is 256):
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```
//!
//! Each property is named `prop_<function>_<invariant>`.

mod common;

use buildbench::model::{BuildStatus, StatusSnapshot, TriggerType};
use buildbench::provider::cloudbuild::CloudBuildStatus;
use buildbench::provider::earliest_at_or_after;
use buildbench::provider::netlify::NetlifyState;
use buildbench::provider::vercel::VercelState;
use buildbench::recorder::duration_seconds;
use buildbench::{BoundedPoller, ManualClock, Platform};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{ScriptedProvider, Step};
use proptest::prelude::*;
use serde_json::Value;
use std::sync::Arc;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
}

fn build(index: usize, start_offset: Option<i64>) -> StatusSnapshot {
    StatusSnapshot {
        status: BuildStatus::InProgress,
        completed: false,
        build_id: Some(format!("b{}", index)),
        started_at: start_offset.map(|s| base() + Duration::seconds(s)),
        completed_at: None,
        duration_seconds: None,
        native_status: None,
        metadata: Value::Null,
    }
}

// == Build lookup ==============================================================

proptest! {
    /// The window rule returns the earliest qualifying start, first in
    /// platform order on ties, and nothing when no build qualifies.
    #[test]
    fn prop_window_lookup_earliest_at_or_after(
        starts in prop::collection::vec(prop::option::of(-600i64..600), 0..30),
        reference in -600i64..600,
    ) {
        let builds: Vec<StatusSnapshot> =
            starts.iter().enumerate().map(|(i, s)| build(i, *s)).collect();
        let after = base() + Duration::seconds(reference);
        let found = earliest_at_or_after(builds, after);

        let qualifying: Vec<(usize, i64)> = starts
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.filter(|s| *s >= reference).map(|s| (i, s)))
            .collect();
        match qualifying.iter().min_by_key(|(i, s)| (*s, *i)) {
            None => prop_assert!(found.is_none()),
            Some((index, start)) => {
                let found = found.unwrap();
                prop_assert_eq!(found.build_id, Some(format!("b{}", index)));
                prop_assert_eq!(found.started_at, Some(base() + Duration::seconds(*start)));
            }
        }
    }
}

// == Durations =================================================================

proptest! {
    /// Stored durations are never negative and match the interval otherwise.
    #[test]
    fn prop_duration_seconds_non_negative(trigger in -100_000i64..100_000, completion in -100_000i64..100_000) {
        let t = base() + Duration::seconds(trigger);
        let c = base() + Duration::seconds(completion);
        let d = duration_seconds(t, c);
        prop_assert!(d >= 0.0);
        if completion >= trigger {
            prop_assert_eq!(d, (completion - trigger) as f64);
        }
    }
}

// == Native status tables ======================================================

const CLOUD_BUILD_KNOWN: [&str; 10] = [
    "STATUS_UNKNOWN", "PENDING", "QUEUED", "WORKING", "SUCCESS",
    "FAILURE", "INTERNAL_ERROR", "TIMEOUT", "CANCELLED", "EXPIRED",
];
const VERCEL_KNOWN: [&str; 6] = ["QUEUED", "INITIALIZING", "BUILDING", "READY", "ERROR", "CANCELED"];
const NETLIFY_KNOWN: [&str; 15] = [
    "new", "pending_review", "accepted", "enqueued", "building", "uploading",
    "uploaded", "preparing", "prepared", "processing", "processed", "retrying",
    "ready", "error", "rejected",
];

proptest! {
    /// A native status value outside the known vocabulary is never terminal.
    #[test]
    fn prop_cloudbuild_unknown_status_in_progress(raw in "[A-Z_]{1,16}") {
        prop_assume!(!CLOUD_BUILD_KNOWN.contains(&raw.as_str()));
        let native: CloudBuildStatus = serde_json::from_value(Value::String(raw)).unwrap();
        prop_assert_eq!(native.normalize(), BuildStatus::InProgress);
    }

    #[test]
    fn prop_vercel_unknown_state_in_progress(raw in "[A-Z_]{1,16}") {
        prop_assume!(!VERCEL_KNOWN.contains(&raw.as_str()));
        let native: VercelState = serde_json::from_value(Value::String(raw)).unwrap();
        prop_assert_eq!(native.normalize(), BuildStatus::InProgress);
    }

    #[test]
    fn prop_netlify_unknown_state_in_progress(raw in "[a-z_]{1,16}") {
        prop_assume!(!NETLIFY_KNOWN.contains(&raw.as_str()));
        let native: NetlifyState = serde_json::from_value(Value::String(raw)).unwrap();
        prop_assert_eq!(native.normalize(), BuildStatus::InProgress);
    }

    /// Any CI event other than schedule, manual dispatch, or unset is an event run.
    #[test]
    fn prop_trigger_type_other_events(event in "[a-z_]{1,20}") {
        prop_assume!(!["schedule", "scheduled", "workflow_dispatch", "manual"].contains(&event.as_str()));
        prop_assert_eq!(TriggerType::from_event_name(Some(&event)), TriggerType::Event);
    }
}

// == Bounded polling ===========================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A build that never completes times out no earlier than the budget and
    /// no later than one interval past it.
    #[test]
    fn prop_poller_timeout_within_one_interval(max_wait in 0u64..900, interval in 1u64..120) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let start = base();
        let (completed_at, calls) = rt.block_on(async {
            let provider = ScriptedProvider::new(
                Platform::Vercel,
                vec![Step::Status(BuildStatus::InProgress)],
            );
            let outcome = BoundedPoller::new(Arc::new(ManualClock::new(start)))
                .run(
                    &provider,
                    "dpl",
                    std::time::Duration::from_secs(max_wait),
                    std::time::Duration::from_secs(interval),
                )
                .await;
            (outcome.snapshot.completed_at.unwrap(), outcome.calls)
        });
        let deadline = start + Duration::seconds(max_wait as i64);
        prop_assert!(completed_at >= deadline);
        prop_assert!(completed_at - deadline < Duration::seconds(interval as i64));
        prop_assert_eq!(calls as u64, max_wait.div_ceil(interval) + 1);
    }
}
