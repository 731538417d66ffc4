//! Run and reprocess request/response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;
use crate::error::{Error, Result};

/// Which files a run considers
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunScope {
    All,
    SourceType { source_type: String },
    Files { files: Vec<String> },
}

impl RunScope {
    /// Short label for logs and run summaries
    pub fn label(&self) -> String {
        match self {
            RunScope::All => "all".to_string(),
            RunScope::SourceType { source_type } => format!("source_type:{}", source_type),
            RunScope::Files { files } => format!("files:{}", files.len()),
        }
    }
}

/// How eligible units are selected for each requested stage
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RunPolicy {
    pub resume: bool,
    pub overwrite_existing: bool,
}

/// `POST /process` body as sent by the dashboard
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRequest {
    pub stages: Vec<String>,
    #[serde(default = "default_resume")]
    pub resume: bool,
    #[serde(default)]
    pub overwrite_existing: bool,
    /// all | source_type | files (defaults to all)
    #[serde(default)]
    pub scope: Option<String>,
    /// File ids, required when scope = files
    #[serde(default)]
    pub files: Option<Vec<String>>,
    /// Type filter, required when scope = source_type
    #[serde(default)]
    pub source_type: Option<String>,
    /// Optional label stamped on every record the run touches
    #[serde(default)]
    pub run_tag: Option<String>,
}

fn default_resume() -> bool {
    true
}

/// Validated run request
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub scope: RunScope,
    /// Non-empty, deduplicated, pipeline order
    pub stages: Vec<Stage>,
    pub policy: RunPolicy,
    pub run_tag: Option<String>,
}

impl RunRequest {
    pub fn new(scope: RunScope, stages: Vec<Stage>, resume: bool, overwrite_existing: bool) -> Self {
        let mut stages = stages;
        stages.sort();
        stages.dedup();
        Self {
            scope,
            stages,
            policy: RunPolicy {
                resume,
                overwrite_existing,
            },
            run_tag: None,
        }
    }
}

impl TryFrom<ProcessRequest> for RunRequest {
    type Error = Error;

    fn try_from(req: ProcessRequest) -> Result<Self> {
        let stages = Stage::normalize(req.stages.as_slice())?;

        let scope = match req.scope.as_deref().map(str::trim).unwrap_or("all") {
            "" | "all" => RunScope::All,
            "source_type" => {
                let source_type = req
                    .source_type
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        Error::InvalidScope("scope 'source_type' requires a source_type filter".to_string())
                    })?;
                RunScope::SourceType { source_type }
            }
            "files" => {
                let files = req.files.unwrap_or_default();
                if files.is_empty() {
                    return Err(Error::InvalidScope(
                        "scope 'files' requires a non-empty file list".to_string(),
                    ));
                }
                RunScope::Files { files }
            }
            other => return Err(Error::InvalidScope(format!("unknown scope '{}'", other))),
        };

        Ok(Self {
            scope,
            stages,
            policy: RunPolicy {
                resume: req.resume,
                overwrite_existing: req.overwrite_existing,
            },
            run_tag: req.run_tag.filter(|t| !t.trim().is_empty()),
        })
    }
}

/// Acknowledgement returned by `run`; execution continues in the background
#[derive(Debug, Clone, Serialize)]
pub struct RunHandle {
    pub accepted: bool,
    pub run_id: Uuid,
    pub run_tag: String,
    pub stages: Vec<Stage>,
    pub scope: RunScope,
    pub resume: bool,
    pub overwrite_existing: bool,
    /// Files selected by the scope (before per-stage eligibility)
    pub candidate_files: usize,
    pub submitted_at: DateTime<Utc>,
}

/// `POST /reprocess/{file_id}` body
#[derive(Debug, Clone, Deserialize)]
pub struct ReprocessRequest {
    pub stages: Vec<String>,
}

/// Acknowledgement returned by `reprocess`
#[derive(Debug, Clone, Serialize)]
pub struct ReprocessAck {
    pub accepted: bool,
    pub run_id: Uuid,
    pub file_id: String,
    pub stages: Vec<Stage>,
    /// Attempt number claimed for each stage, in `stages` order
    pub attempts: Vec<u32>,
    pub submitted_at: DateTime<Utc>,
}
