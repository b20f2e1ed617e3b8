//! Run configuration: optional TOML file plus environment credentials.
//!
//! ```toml
//! [polling]
//! max_wait_secs = 3600
//! interval_secs = 10
//!
//! [lookup]
//! settle_secs = 5
//! probe_attempts = 6
//!
//! [platforms.vercel]
//! api_base = "http://127.0.0.1:9000"
//! ```
//!
//! Every section is optional. CLI flags override file values. Credentials are
//! never read from the file, only from the environment.

use crate::lookup::LookupPolicy;
use crate::model::Platform;
use crate::provider::cloudbuild::CloudBuildProvider;
use crate::provider::netlify::NetlifyProvider;
use crate::provider::vercel::VercelProvider;
use crate::provider::ProviderSet;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

// ── TOML Configuration Structs ──────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub lookup: LookupPolicy,
    /// Keyed by platform name (`pantheon`, `vercel`, `netlify`).
    #[serde(default)]
    pub platforms: HashMap<String, PlatformConfig>,
}

/// The `[polling]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollingConfig {
    pub max_wait_secs: Option<u64>,
    pub interval_secs: Option<u64>,
}

/// A `[platforms.<name>]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub api_base: Option<String>,
}

impl BenchConfig {
    pub fn api_base(&self, platform: Platform) -> Option<&str> {
        self.platforms
            .get(platform.as_str())
            .and_then(|p| p.api_base.as_deref())
    }
}

/// Parse a configuration from a TOML string.
pub fn parse_toml(content: &str) -> Result<BenchConfig> {
    let config: BenchConfig = toml::from_str(content)?;
    for name in config.platforms.keys() {
        name.parse::<Platform>()
            .with_context(|| format!("invalid [platforms.{}] section", name))?;
    }
    if config.polling.interval_secs == Some(0) {
        anyhow::bail!("polling.interval_secs must be greater than zero");
    }
    Ok(config)
}

/// Parse a configuration from a TOML file path.
pub fn parse_toml_file(path: &Path) -> Result<BenchConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_toml(&content)
}

// ── Credentials ─────────────────────────────────────────────────

/// Platform credentials, each present only when fully configured.
#[derive(Clone, Default)]
pub struct Credentials {
    pub pantheon: Option<CloudBuildCredentials>,
    pub vercel: Option<VercelCredentials>,
    pub netlify: Option<NetlifyCredentials>,
}

#[derive(Clone)]
pub struct CloudBuildCredentials {
    pub project_id: String,
    pub access_token: String,
}

#[derive(Clone)]
pub struct VercelCredentials {
    pub token: String,
    pub team_id: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Clone)]
pub struct NetlifyCredentials {
    pub token: String,
    pub site_id: String,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build credentials from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Credentials {
            pantheon: get("GCP_PROJECT_ID")
                .zip(get("GCP_ACCESS_TOKEN"))
                .map(|(project_id, access_token)| CloudBuildCredentials {
                    project_id,
                    access_token,
                }),
            vercel: get("VERCEL_API_TOKEN").map(|token| VercelCredentials {
                token,
                team_id: get("VERCEL_TEAM_ID"),
                project_id: get("VERCEL_PROJECT_ID"),
            }),
            netlify: get("NETLIFY_API_TOKEN")
                .zip(get("NETLIFY_SITE_ID"))
                .map(|(token, site_id)| NetlifyCredentials { token, site_id }),
        }
    }

    pub fn has(&self, platform: Platform) -> bool {
        match platform {
            Platform::Pantheon => self.pantheon.is_some(),
            Platform::Vercel => self.vercel.is_some(),
            Platform::Netlify => self.netlify.is_some(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("pantheon", &self.pantheon.is_some())
            .field("vercel", &self.vercel.is_some())
            .field("netlify", &self.netlify.is_some())
            .finish()
    }
}

/// Build one provider per platform with credentials.
pub fn build_providers(credentials: &Credentials, config: &BenchConfig) -> ProviderSet {
    let mut set = ProviderSet::new();
    if let Some(c) = &credentials.pantheon {
        set.insert(Arc::new(CloudBuildProvider::new(
            &c.project_id,
            &c.access_token,
            config.api_base(Platform::Pantheon),
        )));
    }
    if let Some(c) = &credentials.vercel {
        set.insert(Arc::new(VercelProvider::new(
            &c.token,
            c.team_id.as_deref(),
            c.project_id.as_deref(),
            config.api_base(Platform::Vercel),
        )));
    }
    if let Some(c) = &credentials.netlify {
        set.insert(Arc::new(NetlifyProvider::new(
            &c.token,
            &c.site_id,
            config.api_base(Platform::Netlify),
        )));
    }
    set
}
