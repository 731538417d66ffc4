//! Stage executor abstractions
//!
//! The coordinator never performs stage work itself. Each stage is delegated
//! to a [`StageExecutor`]; the default deployment talks to one HTTP service
//! per stage (`HttpStageExecutor`).

mod http;

pub use http::HttpStageExecutor;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::StagesConfig;
use crate::error::{Error, Result};
use crate::types::{FileRecord, Stage};

/// Everything an executor gets for one dispatch
#[derive(Debug, Clone, Serialize)]
pub struct StageInput {
    pub file_id: String,
    pub filename: String,
    pub file_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    pub stage: Stage,
    /// Attempt number claimed for this dispatch
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_tag: Option<String>,
    /// Artifacts of completed upstream stages, keyed by stage name
    pub artifacts: serde_json::Map<String, serde_json::Value>,
}

impl StageInput {
    pub fn new(record: &FileRecord, stage: Stage, attempt: u32, run_tag: Option<String>) -> Self {
        Self {
            file_id: record.file_id.clone(),
            filename: record.filename.clone(),
            file_type: record.file_type.clone(),
            source_path: record.source_path.clone(),
            stage,
            attempt,
            run_tag,
            artifacts: record.upstream_artifacts(stage),
        }
    }
}

/// Performs the work of one stage for one file
///
/// Implementations:
/// - `HttpStageExecutor`: remote GPU/CPU service per stage
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run the stage. `Ok` carries optional artifacts for downstream stages;
    /// `Err` is recorded as the stage failure.
    async fn execute(&self, input: &StageInput) -> Result<Option<serde_json::Value>>;

    /// Check if the executor is reachable
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Executor name for logging
    fn name(&self) -> &str;
}

/// One executor per stage
#[derive(Clone)]
pub struct ExecutorSet {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorSet {
    /// Build from explicit executors; every stage must be covered
    pub fn new(executors: HashMap<Stage, Arc<dyn StageExecutor>>) -> Result<Self> {
        if let Some(missing) = Stage::ALL.into_iter().find(|s| !executors.contains_key(s)) {
            return Err(Error::Config(format!("No executor configured for stage {}", missing)));
        }
        Ok(Self { executors })
    }

    /// HTTP executors for every stage
    pub fn http(config: &StagesConfig) -> Result<Self> {
        let mut executors: HashMap<Stage, Arc<dyn StageExecutor>> = HashMap::new();
        for stage in Stage::ALL {
            let cfg = config.get(stage);
            executors.insert(
                stage,
                Arc::new(HttpStageExecutor::new(stage, &cfg.service_url, cfg.timeout())?),
            );
        }
        Self::new(executors)
    }

    pub fn get(&self, stage: Stage) -> Result<&Arc<dyn StageExecutor>> {
        self.executors
            .get(&stage)
            .ok_or_else(|| Error::Config(format!("No executor configured for stage {}", stage)))
    }

    /// Health of every stage executor
    pub async fn health(&self) -> Vec<(Stage, bool)> {
        let mut out = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let healthy = match self.executors.get(&stage) {
                Some(executor) => executor.health_check().await.unwrap_or(false),
                None => false,
            };
            out.push((stage, healthy));
        }
        out
    }
}
