//! Pre-poll build resolution.
//!
//! A push does not hand back a platform build id, and a platform may take a
//! few seconds to register the build it started. Before polling, each
//! monitoring task resolves the build in a short, bounded probe phase:
//!
//! 1. An explicit build id from the trigger step, if any.
//! 2. Commit lookup: wait `settle`, then probe up to `1 + probe_attempts`
//!    times, `probe_interval` apart. A commit match is authoritative.
//! 3. Time-window fallback, run once: the earliest of the last
//!    `window_scan` builds that started at or after
//!    `trigger_time - window_lead`.
//!
//! Probing shares the wait budget with polling: every wait is cut short at
//! the deadline, and a deadline reached while probing ends the phase.
//!
//! Provider errors are not retried here either; they end the task as a
//! failure exactly like an error during polling.

use crate::clock::Clock;
use crate::error::ProviderError;
use crate::model::{StatusSnapshot, TriggerResult};
use crate::provider::{BuildLookup, StatusProvider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LookupPolicy {
    pub settle_secs: u64,
    pub probe_attempts: u32,
    pub probe_interval_secs: u64,
    pub window_lead_secs: u64,
    pub window_scan: u32,
}

impl Default for LookupPolicy {
    fn default() -> Self {
        LookupPolicy {
            settle_secs: 5,
            probe_attempts: 6,
            probe_interval_secs: 10,
            window_lead_secs: 30,
            window_scan: 50,
        }
    }
}

/// How the probe phase ended.
#[derive(Debug, Clone)]
pub enum Resolution {
    Found(StatusSnapshot),
    /// Every strategy came back empty.
    NotFound,
    /// The wait budget ran out while probing.
    DeadlinePassed,
}

/// Sleep `duration`, cut short at `deadline`. False once the deadline is reached.
async fn wait_until(clock: &dyn Clock, duration: Duration, deadline: DateTime<Utc>) -> bool {
    let left = (deadline - clock.now()).to_std().unwrap_or(Duration::ZERO);
    clock.sleep(duration.min(left)).await;
    clock.now() < deadline
}

/// Find the platform build a trigger produced, giving up at `deadline`.
pub async fn resolve_build(
    provider: &dyn StatusProvider,
    trigger: &TriggerResult,
    policy: &LookupPolicy,
    clock: &dyn Clock,
    deadline: DateTime<Utc>,
) -> Result<Resolution, ProviderError> {
    let platform = provider.platform();

    if let Some(id) = trigger.build_id.as_deref() {
        if let Some(found) = provider.find_build(&BuildLookup::Id(id.to_string())).await? {
            return Ok(Resolution::Found(found));
        }
        debug!(%platform, build_id = id, "explicit build id not found, falling back");
    }

    if !wait_until(clock, Duration::from_secs(policy.settle_secs), deadline).await {
        info!(%platform, "wait budget spent before the build could be looked up");
        return Ok(Resolution::DeadlinePassed);
    }

    if let Some(sha) = trigger.commit_hash.as_deref() {
        let lookup = BuildLookup::Commit(sha.to_string());
        for attempt in 0..=policy.probe_attempts {
            if let Some(found) = provider.find_build(&lookup).await? {
                info!(%platform, commit = sha, build_id = found.build_id.as_deref().unwrap_or("-"), "found build by commit");
                return Ok(Resolution::Found(found));
            }
            if attempt < policy.probe_attempts {
                debug!(
                    %platform,
                    attempt = attempt + 1,
                    of = policy.probe_attempts,
                    "build not registered yet"
                );
                let interval = Duration::from_secs(policy.probe_interval_secs);
                if !wait_until(clock, interval, deadline).await {
                    info!(%platform, commit = sha, "wait budget spent while probing by commit");
                    return Ok(Resolution::DeadlinePassed);
                }
            }
        }
        info!(%platform, commit = sha, "commit lookup found nothing, trying time window");
    }

    let Some(trigger_time) = trigger.timestamp else {
        return Ok(Resolution::NotFound);
    };
    let lead = chrono::Duration::seconds(policy.window_lead_secs as i64);
    let found = provider
        .find_build(&BuildLookup::Window {
            after: trigger_time - lead,
            max_scanned: policy.window_scan,
        })
        .await?;
    Ok(match found {
        Some(build) => {
            info!(%platform, build_id = build.build_id.as_deref().unwrap_or("-"), "found build by time window");
            Resolution::Found(build)
        }
        None => Resolution::NotFound,
    })
}
