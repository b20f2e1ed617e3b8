//! Netlify deploys.
//!
//! The deploys API has no commit filter, so commit lookups list the site's
//! recent deploys and match `commit_ref` locally.

use super::{fetch_json, http_client, StatusProvider};
use crate::error::ProviderError;
use crate::model::{seconds_between, BuildStatus, Platform, StatusSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_API_BASE: &str = "https://api.netlify.com";
const PLATFORM: &str = "netlify";

/// Netlify deploy `state` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetlifyState {
    New,
    PendingReview,
    Accepted,
    Enqueued,
    Building,
    Uploading,
    Uploaded,
    Preparing,
    Prepared,
    Processing,
    Processed,
    Retrying,
    Ready,
    Error,
    Rejected,
    #[serde(other)]
    Unrecognized,
}

impl NetlifyState {
    pub fn normalize(self) -> BuildStatus {
        match self {
            NetlifyState::Ready => BuildStatus::Success,
            NetlifyState::Error | NetlifyState::Rejected => BuildStatus::Failure,
            NetlifyState::New
            | NetlifyState::PendingReview
            | NetlifyState::Accepted
            | NetlifyState::Enqueued
            | NetlifyState::Building
            | NetlifyState::Uploading
            | NetlifyState::Uploaded
            | NetlifyState::Preparing
            | NetlifyState::Prepared
            | NetlifyState::Processing
            | NetlifyState::Processed
            | NetlifyState::Retrying
            | NetlifyState::Unrecognized => BuildStatus::InProgress,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NetlifyDeploy {
    pub id: String,
    pub state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub deploy_time: Option<f64>,
    pub commit_ref: Option<String>,
    pub branch: Option<String>,
    pub error_message: Option<String>,
    pub deploy_ssl_url: Option<String>,
    pub admin_url: Option<String>,
}

impl NetlifyDeploy {
    fn native_state(&self) -> NetlifyState {
        self.state
            .as_deref()
            .map(|s| {
                serde_json::from_value(Value::String(s.to_string()))
                    .unwrap_or(NetlifyState::Unrecognized)
            })
            .unwrap_or(NetlifyState::Unrecognized)
    }

    pub fn into_snapshot(self) -> StatusSnapshot {
        let status = self.native_state().normalize();
        let completed_at = if status.is_terminal() {
            self.published_at.or(self.updated_at)
        } else {
            None
        };
        let duration_seconds = self
            .deploy_time
            .or_else(|| seconds_between(self.created_at, completed_at));
        let metadata = json!({
            "deployId": self.id,
            "state": self.state,
            "commitRef": self.commit_ref,
            "branch": self.branch,
            "deployTime": self.deploy_time,
            "errorMessage": self.error_message,
            "url": self.deploy_ssl_url,
            "adminUrl": self.admin_url,
        });
        StatusSnapshot {
            status,
            completed: status.is_terminal(),
            build_id: Some(self.id),
            started_at: self.created_at,
            completed_at,
            duration_seconds,
            native_status: self.state,
            metadata,
        }
    }
}

pub struct NetlifyProvider {
    client: reqwest::Client,
    api_base: String,
    token: String,
    site_id: String,
}

impl NetlifyProvider {
    pub fn new(token: &str, site_id: &str, api_base: Option<&str>) -> Self {
        NetlifyProvider {
            client: http_client(),
            api_base: api_base
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            token: token.to_string(),
            site_id: site_id.to_string(),
        }
    }
}

#[async_trait]
impl StatusProvider for NetlifyProvider {
    fn platform(&self) -> Platform {
        Platform::Netlify
    }

    async fn get_status(&self, build_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let url = format!(
            "{}/api/v1/deploys/{}",
            self.api_base,
            urlencoding::encode(build_id)
        );
        let deploy: NetlifyDeploy =
            fetch_json(PLATFORM, self.client.get(&url).bearer_auth(&self.token)).await?;
        Ok(deploy.into_snapshot())
    }

    async fn list_builds(
        &self,
        commit: Option<&str>,
        limit: u32,
    ) -> Result<Vec<StatusSnapshot>, ProviderError> {
        let url = format!(
            "{}/api/v1/sites/{}/deploys",
            self.api_base,
            urlencoding::encode(&self.site_id)
        );
        let deploys: Vec<NetlifyDeploy> = fetch_json(
            PLATFORM,
            self.client
                .get(&url)
                .query(&[("per_page", limit.to_string())])
                .bearer_auth(&self.token),
        )
        .await?;
        Ok(deploys
            .into_iter()
            .filter(|d| match commit {
                Some(sha) => d.commit_ref.as_deref() == Some(sha),
                None => true,
            })
            .map(NetlifyDeploy::into_snapshot)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_table() {
        let cases = [
            ("ready", BuildStatus::Success),
            ("error", BuildStatus::Failure),
            ("rejected", BuildStatus::Failure),
            ("new", BuildStatus::InProgress),
            ("enqueued", BuildStatus::InProgress),
            ("building", BuildStatus::InProgress),
            ("uploading", BuildStatus::InProgress),
            ("processing", BuildStatus::InProgress),
            ("retrying", BuildStatus::InProgress),
            ("skipped", BuildStatus::InProgress),
        ];
        for (raw, expected) in cases {
            let native: NetlifyState = serde_json::from_value(Value::String(raw.into())).unwrap();
            assert_eq!(native.normalize(), expected, "state {}", raw);
        }
    }

    #[test]
    fn published_deploy_uses_deploy_time() {
        let d: NetlifyDeploy = serde_json::from_value(json!({
            "id": "64f0",
            "state": "ready",
            "created_at": "2026-03-01T12:00:00.000Z",
            "published_at": "2026-03-01T12:00:58.000Z",
            "deploy_time": 55,
            "commit_ref": "abc123"
        }))
        .unwrap();
        let snap = d.into_snapshot();
        assert_eq!(snap.status, BuildStatus::Success);
        assert_eq!(snap.duration_seconds, Some(55.0));
        assert_eq!(snap.metadata["commitRef"], "abc123");
        assert!(snap.completed_at.is_some());
    }

    #[test]
    fn failed_deploy_without_publish_falls_back_to_updated_at() {
        let d: NetlifyDeploy = serde_json::from_value(json!({
            "id": "64f1",
            "state": "error",
            "created_at": "2026-03-01T12:00:00Z",
            "updated_at": "2026-03-01T12:00:30Z",
            "error_message": "Build script returned non-zero exit code: 2"
        }))
        .unwrap();
        let snap = d.into_snapshot();
        assert_eq!(snap.status, BuildStatus::Failure);
        assert_eq!(snap.duration_seconds, Some(30.0));
    }
}
