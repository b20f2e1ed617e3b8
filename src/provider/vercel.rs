//! Vercel deployments.
//!
//! A single deployment is read from `/v13/deployments/{id}`; listing uses
//! `/v6/deployments`, which filters by commit with `sha=` and returns newest
//! first. Timestamps are epoch milliseconds. The list and single-item
//! endpoints name some fields differently (`uid`/`id`, `state`/`readyState`,
//! `created`/`createdAt`), so both spellings are accepted.

use super::{fetch_json, http_client, StatusProvider};
use crate::error::ProviderError;
use crate::model::{seconds_between, BuildStatus, Platform, StatusSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_API_BASE: &str = "https://api.vercel.com";
const PLATFORM: &str = "vercel";

/// Vercel `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VercelState {
    Queued,
    Initializing,
    Building,
    Ready,
    Error,
    Canceled,
    #[serde(other)]
    Unrecognized,
}

impl VercelState {
    pub fn normalize(self) -> BuildStatus {
        match self {
            VercelState::Ready => BuildStatus::Success,
            VercelState::Error | VercelState::Canceled => BuildStatus::Failure,
            VercelState::Queued
            | VercelState::Initializing
            | VercelState::Building
            | VercelState::Unrecognized => BuildStatus::InProgress,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VercelDeployment {
    id: Option<String>,
    uid: Option<String>,
    ready_state: Option<String>,
    state: Option<String>,
    created_at: Option<i64>,
    created: Option<i64>,
    building_at: Option<i64>,
    ready: Option<i64>,
    url: Option<String>,
    inspector_url: Option<String>,
    error_message: Option<String>,
    #[serde(default)]
    meta: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListDeploymentsResponse {
    #[serde(default)]
    deployments: Vec<VercelDeployment>,
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

impl VercelDeployment {
    fn raw_state(&self) -> Option<&str> {
        self.ready_state.as_deref().or(self.state.as_deref())
    }

    fn native_state(&self) -> VercelState {
        self.raw_state()
            .map(|s| {
                serde_json::from_value(Value::String(s.to_string()))
                    .unwrap_or(VercelState::Unrecognized)
            })
            .unwrap_or(VercelState::Unrecognized)
    }

    pub fn into_snapshot(self) -> StatusSnapshot {
        let status = self.native_state().normalize();
        let created = from_millis(self.created_at.or(self.created));
        let building = from_millis(self.building_at);
        let ready = from_millis(self.ready);
        let started_at = building.or(created);
        let native = self.raw_state().map(str::to_string);
        let build_id = self.id.clone().or_else(|| self.uid.clone());
        let metadata = json!({
            "deploymentId": build_id,
            "readyState": native,
            "url": self.url,
            "inspectorUrl": self.inspector_url,
            "errorMessage": self.error_message,
            "commitSha": self.meta.as_ref().and_then(|m| m.get("githubCommitSha")),
        });
        StatusSnapshot {
            status,
            completed: status.is_terminal(),
            build_id,
            started_at,
            completed_at: if status.is_terminal() { ready } else { None },
            duration_seconds: seconds_between(started_at, ready),
            native_status: native,
            metadata,
        }
    }
}

pub struct VercelProvider {
    client: reqwest::Client,
    api_base: String,
    token: String,
    team_id: Option<String>,
    project_id: Option<String>,
}

impl VercelProvider {
    pub fn new(
        token: &str,
        team_id: Option<&str>,
        project_id: Option<&str>,
        api_base: Option<&str>,
    ) -> Self {
        VercelProvider {
            client: http_client(),
            api_base: api_base
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            token: token.to_string(),
            team_id: team_id.map(str::to_string),
            project_id: project_id.map(str::to_string),
        }
    }

    fn scope(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(team) = &self.team_id {
            q.push(("teamId", team.clone()));
        }
        q
    }
}

#[async_trait]
impl StatusProvider for VercelProvider {
    fn platform(&self) -> Platform {
        Platform::Vercel
    }

    async fn get_status(&self, build_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let url = format!(
            "{}/v13/deployments/{}",
            self.api_base,
            urlencoding::encode(build_id)
        );
        let deployment: VercelDeployment = fetch_json(
            PLATFORM,
            self.client
                .get(&url)
                .query(&self.scope())
                .bearer_auth(&self.token),
        )
        .await?;
        Ok(deployment.into_snapshot())
    }

    async fn list_builds(
        &self,
        commit: Option<&str>,
        limit: u32,
    ) -> Result<Vec<StatusSnapshot>, ProviderError> {
        let mut query = self.scope();
        query.push(("limit", limit.to_string()));
        if let Some(project) = &self.project_id {
            query.push(("projectId", project.clone()));
        }
        if let Some(sha) = commit {
            query.push(("sha", sha.to_string()));
        }
        let url = format!("{}/v6/deployments", self.api_base);
        let resp: ListDeploymentsResponse = fetch_json(
            PLATFORM,
            self.client.get(&url).query(&query).bearer_auth(&self.token),
        )
        .await?;
        Ok(resp
            .deployments
            .into_iter()
            .map(VercelDeployment::into_snapshot)
            .collect())
    }
}
