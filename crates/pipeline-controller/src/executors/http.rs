//! HTTP stage executor
//!
//! Posts the [`StageInput`] as JSON to `{service_url}/process` and expects
//! `{"success": bool, "artifacts": ..., "error": ...}` back.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{StageExecutor, StageInput};
use crate::error::{Error, Result};
use crate::types::Stage;

#[derive(Debug, Deserialize)]
struct StageResponse {
    success: bool,
    #[serde(default)]
    artifacts: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Executor backed by a remote stage service
pub struct HttpStageExecutor {
    client: Client,
    stage: Stage,
    base_url: String,
}

impl HttpStageExecutor {
    /// Create a new executor. `timeout` bounds each request; the coordinator
    /// applies its own deadline on top.
    pub fn new(stage: Stage, service_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            stage,
            base_url: service_url.trim_end_matches('/').to_string(),
        })
    }

    fn process_url(&self) -> String {
        format!("{}/process", self.base_url)
    }
}

#[async_trait]
impl StageExecutor for HttpStageExecutor {
    async fn execute(&self, input: &StageInput) -> Result<Option<serde_json::Value>> {
        let response = self
            .client
            .post(self.process_url())
            .json(input)
            .send()
            .await
            .map_err(|e| Error::executor(self.stage, format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::executor(
                self.stage,
                format!("service returned {} - {}", status, body.trim()),
            ));
        }

        let body: StageResponse = response
            .json()
            .await
            .map_err(|e| Error::executor(self.stage, format!("malformed response: {}", e)))?;

        if body.success {
            Ok(body.artifacts)
        } else {
            Err(Error::executor(
                self.stage,
                body.error.unwrap_or_else(|| "executor reported failure".to_string()),
            ))
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        self.stage.as_str()
    }
}
