//! # Provider: Platform Status Checks
//!
//! One [`StatusProvider`] per hosting platform. Each implementation talks to
//! its platform's REST API and translates the platform's native status
//! vocabulary into [`BuildStatus`] through an exhaustive table whose
//! catch-all is `in_progress`: a status we have never seen keeps the poller
//! waiting instead of recording a terminal result that may be wrong.
//!
//! ## Build lookup
//!
//! ```text
//! BuildLookup::Id(id)          → get_status(id)           (404 → None)
//! BuildLookup::Commit(sha)     → list_builds(Some(sha))   → first match
//! BuildLookup::Window{after,n} → list_builds(None, n)     → earliest start ≥ after
//! ```
//!
//! The window rule deliberately ignores the newest build: when several
//! builds start inside the scan window, the one closest after the trigger is
//! the one our push caused.
//!
//! ## Module Structure
//!
//! - [`cloudbuild`]: Pantheon builds via the Google Cloud Build REST API
//! - [`vercel`]: Vercel deployments API
//! - [`netlify`]: Netlify deploys API

pub mod cloudbuild;
pub mod netlify;
pub mod vercel;

use crate::error::ProviderError;
use crate::model::{Platform, StatusSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// How many recent builds a commit lookup inspects.
pub const COMMIT_SCAN_LIMIT: u32 = 10;

/// Criteria for resolving a platform build.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildLookup {
    /// Explicit platform build identifier.
    Id(String),
    /// Commit / source identifier the build was made from.
    Commit(String),
    /// Scan the `max_scanned` most recent builds for the earliest one that
    /// started at or after `after`.
    Window {
        after: DateTime<Utc>,
        max_scanned: u32,
    },
}

#[async_trait]
pub trait StatusProvider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch and normalize the current state of one build.
    async fn get_status(&self, build_id: &str) -> Result<StatusSnapshot, ProviderError>;

    /// Recent builds in platform-native order (newest first), optionally
    /// restricted to those built from `commit`.
    async fn list_builds(
        &self,
        commit: Option<&str>,
        limit: u32,
    ) -> Result<Vec<StatusSnapshot>, ProviderError>;

    /// Resolve a build from lookup criteria. `Ok(None)` means the platform
    /// has no matching build (yet).
    async fn find_build(
        &self,
        lookup: &BuildLookup,
    ) -> Result<Option<StatusSnapshot>, ProviderError> {
        match lookup {
            BuildLookup::Id(id) => match self.get_status(id).await {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(ProviderError::Api { status: 404, .. }) => Ok(None),
                Err(e) => Err(e),
            },
            BuildLookup::Commit(sha) => {
                let builds = self.list_builds(Some(sha), COMMIT_SCAN_LIMIT).await?;
                Ok(builds.into_iter().next())
            }
            BuildLookup::Window { after, max_scanned } => {
                let builds = self.list_builds(None, *max_scanned).await?;
                Ok(earliest_at_or_after(builds, *after))
            }
        }
    }
}

/// Pick the build with the earliest start time at or after `after`.
///
/// Builds with no start time are skipped. On equal start times the build
/// that comes first in the input (platform-native order) wins.
pub fn earliest_at_or_after(
    builds: Vec<StatusSnapshot>,
    after: DateTime<Utc>,
) -> Option<StatusSnapshot> {
    let mut best: Option<StatusSnapshot> = None;
    for build in builds {
        let Some(started) = build.started_at else {
            continue;
        };
        if started < after {
            continue;
        }
        let better = match best.as_ref().and_then(|b| b.started_at) {
            Some(current) => started < current,
            None => true,
        };
        if better {
            best = Some(build);
        }
    }
    best
}

// ── Provider set ────────────────────────────────────────────────

/// The providers available for a run, keyed by platform. A platform is
/// absent when its credentials were not configured.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<Platform, Arc<dyn StatusProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: Arc<dyn StatusProvider>) {
        self.providers.insert(provider.platform(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn StatusProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn StatusProvider>> {
        self.providers.get(&platform).cloned()
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.providers.contains_key(&platform)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ── HTTP plumbing shared by the REST providers ─────────────────

/// Send a request and decode a JSON body, mapping failures onto
/// [`ProviderError`].
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    platform: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { platform, source })?;
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::Auth {
            platform,
            status: status.as_u16(),
        });
    }
    let body = response
        .text()
        .await
        .map_err(|source| ProviderError::Transport { platform, source })?;
    if !status.is_success() {
        return Err(ProviderError::Api {
            platform,
            status: status.as_u16(),
            body: truncate(&body, 512),
        });
    }
    serde_json::from_str(&body).map_err(|e| ProviderError::Decode {
        platform,
        detail: e.to_string(),
    })
}

/// Shared HTTP client with the timeouts every provider uses.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(5))
        .timeout(std::time::Duration::from_secs(30))
        .user_agent(concat!("buildbench/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
