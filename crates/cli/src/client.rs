//! API client for talking to the controller's debug/operator HTTP surface.

use anyhow::{Context, Result};
use autoscaler_core::types::{AutopilotState, PredictionRecord, PreScaleProfile, Sample};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// HTTP client for the controller's `/api/v1` surface.
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self.client.get(url).send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Issues a POST with no response body, returning whether the server treated the request
    /// as actionable (`202 Accepted`) or as a no-op (`409 Conflict`).
    pub async fn post_rollback(&self, path: &str) -> Result<RollbackOutcome> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self.client.post(url).send().await.context("Failed to send request")?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(RollbackOutcome::Accepted),
            StatusCode::CONFLICT => Ok(RollbackOutcome::NothingToRollBack),
            StatusCode::NOT_FOUND => Ok(RollbackOutcome::WorkloadNotFound),
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("API error ({}): {}", status, body);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Accepted,
    NothingToRollBack,
    WorkloadNotFound,
}

// Wire shapes for `/api/v1/...`, mirroring the controller's `api.rs` response bodies.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSummary {
    pub namespace: String,
    pub name: String,
    pub hpa_name: String,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadDetail {
    pub latest_sample: Option<Sample>,
    pub recent_predictions: Vec<PredictionRecord>,
    pub prescale_profile: Option<PreScaleProfile>,
    pub autopilot_state: Option<AutopilotState>,
}
