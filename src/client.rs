//! HTTP client for a running orchestrator: submit a configuration, then
//! feed [`RemoteResult`] sources to a [`CompletionPoller`](crate::poller::CompletionPoller).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::model::{ArtifactKind, RunId, TestConfiguration};
use crate::poller::PollSource;
use crate::result_store::ResultLookup;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected the request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub run_id: RunId,
    pub artifacts: Vec<ArtifactKind>,
    #[serde(default)]
    pub workers: Vec<String>,
}

#[derive(Clone)]
pub struct OrchestratorClient {
    client: reqwest::Client,
    base: Url,
}

impl OrchestratorClient {
    pub fn new(base: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base: Url::parse(base)?,
        })
    }

    pub async fn submit(&self, config: &TestConfiguration) -> Result<SubmitResponse, ClientError> {
        let url = self.base.join("/api/runs")?;
        let response = self.client.post(url).json(config).send().await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(response.json().await?)
    }

    pub fn result(&self, run_id: &RunId, kind: ArtifactKind) -> Result<RemoteResult, ClientError> {
        let url = self
            .base
            .join(&format!("/api/runs/{}/{}", run_id, kind))?;
        Ok(RemoteResult {
            client: self.client.clone(),
            url,
        })
    }
}

async fn rejected(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let message = match response.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("error")
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
    };
    ClientError::Rejected { status, message }
}

/// One artifact on the server. 404 means pending, anything else that isn't
/// 200 is a hard failure.
pub struct RemoteResult {
    client: reqwest::Client,
    url: Url,
}

#[async_trait]
impl PollSource for RemoteResult {
    async fn check(&self) -> Result<ResultLookup, String> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map(ResultLookup::Found)
                .map_err(|e| format!("Invalid result body: {}", e)),
            StatusCode::NOT_FOUND => Ok(ResultLookup::Pending),
            _ => Err(rejected(response).await.to_string()),
        }
    }
}
