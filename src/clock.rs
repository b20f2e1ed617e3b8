//! Time source used by the poller and the lookup probes.
//!
//! Production code runs on [`SystemClock`]. [`ManualClock`] keeps virtual
//! time: `sleep` advances it instantly, so a one-hour wait budget can be
//! exercised in a unit test without touching real timers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct VirtualTime {
    now: DateTime<Utc>,
    /// Pending wake-ups as `(wake_time, sleeper_id)`.
    sleepers: BTreeSet<(DateTime<Utc>, u64)>,
    next_id: u64,
}

/// Virtual clock shared by any number of concurrent sleepers.
///
/// Each `sleep` registers its own wake time. Only the earliest pending
/// sleeper may move time forward, so concurrent pollers interleave the way
/// they would on a real clock: two tasks sleeping 10 s each both wake at
/// `+10 s`, not at `+10 s` and `+20 s`. Time never moves backwards.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<VirtualTime>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            state: Mutex::new(VirtualTime {
                now: start,
                sleepers: BTreeSet::new(),
                next_id: 0,
            }),
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().now
    }

    async fn sleep(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        let key = {
            let mut state = self.state.lock().unwrap();
            let wake = state
                .now
                .checked_add_signed(step)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let key = (wake, state.next_id);
            state.next_id += 1;
            state.sleepers.insert(key);
            key
        };
        loop {
            tokio::task::yield_now().await;
            let mut state = self.state.lock().unwrap();
            if state.sleepers.first() == Some(&key) {
                state.sleepers.remove(&key);
                state.now = state.now.max(key.0);
                return;
            }
        }
    }
}
