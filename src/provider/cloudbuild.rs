//! Pantheon builds, observed through the Google Cloud Build REST API.
//!
//! Pantheon runs site builds as Cloud Build jobs in a GCP project. Access
//! needs the project id and an OAuth access token with Cloud Build Viewer
//! permission; the token is passed through as a bearer credential.

use super::{fetch_json, http_client, StatusProvider};
use crate::error::ProviderError;
use crate::model::{seconds_between, BuildStatus, Platform, StatusSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_API_BASE: &str = "https://cloudbuild.googleapis.com";
const PLATFORM: &str = "pantheon";

/// Cloud Build `Build.status` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloudBuildStatus {
    StatusUnknown,
    Pending,
    Queued,
    Working,
    Success,
    Failure,
    InternalError,
    Timeout,
    Cancelled,
    Expired,
    #[serde(other)]
    Unrecognized,
}

impl CloudBuildStatus {
    pub fn normalize(self) -> BuildStatus {
        match self {
            CloudBuildStatus::Success => BuildStatus::Success,
            CloudBuildStatus::Failure
            | CloudBuildStatus::Cancelled
            | CloudBuildStatus::InternalError
            | CloudBuildStatus::Expired => BuildStatus::Failure,
            CloudBuildStatus::Timeout => BuildStatus::Timeout,
            CloudBuildStatus::StatusUnknown
            | CloudBuildStatus::Pending
            | CloudBuildStatus::Queued
            | CloudBuildStatus::Working
            | CloudBuildStatus::Unrecognized => BuildStatus::InProgress,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudBuild {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    pub create_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub log_url: Option<String>,
    #[serde(default)]
    pub substitutions: Option<Value>,
    #[serde(default)]
    pub source_provenance: Option<Value>,
    #[serde(default)]
    pub images: Option<Value>,
    #[serde(default)]
    pub timing: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListBuildsResponse {
    #[serde(default)]
    builds: Vec<CloudBuild>,
}

impl CloudBuild {
    fn native_status(&self) -> CloudBuildStatus {
        self.status
            .as_deref()
            .map(|s| {
                serde_json::from_value(Value::String(s.to_string()))
                    .unwrap_or(CloudBuildStatus::Unrecognized)
            })
            .unwrap_or(CloudBuildStatus::StatusUnknown)
    }

    pub fn source_commit(&self) -> Option<String> {
        self.substitutions
            .as_ref()
            .and_then(|s| s.get("COMMIT_SHA"))
            .or_else(|| {
                self.source_provenance
                    .as_ref()
                    .and_then(|p| p.pointer("/resolvedRepoSource/commitSha"))
            })
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn into_snapshot(self, project_id: &str) -> StatusSnapshot {
        let status = self.native_status().normalize();
        let started_at = self.start_time.or(self.create_time);
        let completed_at = if status.is_terminal() {
            self.finish_time
        } else {
            None
        };
        let metadata = json!({
            "cloudBuildId": self.id,
            "cloudBuildStatus": self.status,
            "logUrl": self.log_url,
            "projectId": project_id,
            "sourceCommit": self.source_commit(),
            "images": self.images,
            "timing": self.timing,
        });
        StatusSnapshot {
            status,
            completed: status.is_terminal(),
            duration_seconds: seconds_between(self.start_time, self.finish_time),
            build_id: Some(self.id),
            started_at,
            completed_at,
            native_status: self.status,
            metadata,
        }
    }
}

pub struct CloudBuildProvider {
    client: reqwest::Client,
    api_base: String,
    project_id: String,
    access_token: String,
}

impl CloudBuildProvider {
    pub fn new(project_id: &str, access_token: &str, api_base: Option<&str>) -> Self {
        CloudBuildProvider {
            client: http_client(),
            api_base: api_base
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            project_id: project_id.to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn builds_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/builds",
            self.api_base,
            urlencoding::encode(&self.project_id)
        )
    }
}

#[async_trait]
impl StatusProvider for CloudBuildProvider {
    fn platform(&self) -> Platform {
        Platform::Pantheon
    }

    async fn get_status(&self, build_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let url = format!("{}/{}", self.builds_url(), urlencoding::encode(build_id));
        let build: CloudBuild = fetch_json(
            PLATFORM,
            self.client.get(&url).bearer_auth(&self.access_token),
        )
        .await?;
        Ok(build.into_snapshot(&self.project_id))
    }

    async fn list_builds(
        &self,
        commit: Option<&str>,
        limit: u32,
    ) -> Result<Vec<StatusSnapshot>, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![("pageSize", limit.to_string())];
        if let Some(sha) = commit {
            query.push(("filter", format!("source.repoSource.commitSha=\"{}\"", sha)));
        }
        let resp: ListBuildsResponse = fetch_json(
            PLATFORM,
            self.client
                .get(self.builds_url())
                .query(&query)
                .bearer_auth(&self.access_token),
        )
        .await?;
        Ok(resp
            .builds
            .into_iter()
            .map(|b| b.into_snapshot(&self.project_id))
            .collect())
    }
}
