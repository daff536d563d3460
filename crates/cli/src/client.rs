//! HTTP client for the UiProof daemon API

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use uiproof_common::{ArtifactMeta, Run};

/// Answer to a start request
#[derive(Debug, Deserialize)]
pub struct StartReceipt {
    pub run_id: String,
    pub status: String,
    pub message: String,
}

/// Live progress view of a run
#[derive(Debug, Deserialize)]
pub struct StatusSnapshot {
    pub run_id: String,
    pub status: String,
    pub progress: u8,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusSnapshot {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "error" | "skipped")
    }
}

/// Outcome of a retention sweep
#[derive(Debug, Deserialize)]
pub struct SweepReport {
    pub orphans_removed: usize,
    pub duplicates_removed: usize,
}

/// Client for the daemon's HTTP API
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(addr: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: addr.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Check if the daemon is up
    pub async fn health(&self) -> Result<Value> {
        let response = self.http.get(self.url("/api/health")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Start a run for a module/scenario pair
    pub async fn start_run(&self, module: &str, scenario: &str) -> Result<StartReceipt> {
        let response = self
            .http
            .post(self.url("/api/runs"))
            .json(&json!({ "module": module, "scenario": scenario }))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Start a run under a caller-chosen id
    pub async fn start_run_with_id(&self, run_id: &str) -> Result<StartReceipt> {
        let response = self
            .http
            .post(self.url("/api/runs"))
            .json(&json!({ "run_id": run_id }))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// List all runs
    pub async fn list_runs(&self) -> Result<Vec<Run>> {
        let response = self.http.get(self.url("/api/runs")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Fetch a full run record
    pub async fn get_run(&self, run_id: &str) -> Result<Run> {
        let response = self
            .http
            .get(self.url(&format!("/api/runs/{run_id}")))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Fetch the status snapshot of a run
    pub async fn get_status(&self, run_id: &str) -> Result<StatusSnapshot> {
        let response = self
            .http
            .get(self.url(&format!("/api/runs/{run_id}/status")))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// List artifact metadata
    pub async fn list_artifacts(&self) -> Result<Vec<ArtifactMeta>> {
        let response = self.http.get(self.url("/api/artifacts")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Download an artifact by id
    pub async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.url(&format!("/api/artifacts/{id}")))
            .send()
            .await?;
        Ok(check(response).await?.bytes().await?.to_vec())
    }

    /// Download the most recent artifact carrying a filename
    pub async fn download_by_name(&self, filename: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.url(&format!("/api/artifacts/by-name/{filename}")))
            .send()
            .await?;
        Ok(check(response).await?.bytes().await?.to_vec())
    }

    /// Trigger a retention sweep
    pub async fn sweep(&self) -> Result<SweepReport> {
        let response = self.http.post(self.url("/api/sweep")).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Surface the daemon's error message on non-success statuses.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|_| anyhow!("daemon returned {}", status))?;
    match body.get("error").and_then(Value::as_str) {
        Some(message) => bail!("{}", message),
        None => bail!("daemon returned {}", status),
    }
}
