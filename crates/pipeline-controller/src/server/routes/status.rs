//! File status endpoints polled by the dashboard

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{FileRecord, FileStatusItem, Stage, StageStatus};

/// Query parameters for the status listing
#[derive(Debug, Deserialize, Default)]
pub struct StatusQuery {
    /// Only files of this source type
    pub file_type: Option<String>,
    /// Only files last touched by this run
    pub run_tag: Option<String>,
    /// Sort by: file_id (default), last_update (newest first)
    #[serde(default = "default_sort")]
    pub sort: String,
    /// Limit results
    pub limit: Option<usize>,
}

fn default_sort() -> String {
    "file_id".to_string()
}

/// Response for the status listing
#[derive(Debug, Serialize)]
pub struct StatusListResponse {
    pub items: Vec<FileStatusItem>,
    /// Matching files before the limit
    pub total: usize,
    pub generated_at: DateTime<Utc>,
}

/// GET /status/all - Snapshot of every tracked file
pub async fn list_status(
    State(state): State<AppState>,
    Query(params): Query<StatusQuery>,
) -> Result<Json<StatusListResponse>> {
    let by_last_update = match params.sort.as_str() {
        "file_id" => false,
        "last_update" => true,
        other => {
            return Err(Error::InvalidRequest(format!(
                "unknown sort '{}' (expected file_id or last_update)",
                other
            )))
        }
    };

    let mut records: Vec<FileRecord> = state
        .store()
        .get_all()?
        .into_iter()
        .filter(|r| {
            params
                .file_type
                .as_deref()
                .map(|t| r.file_type.eq_ignore_ascii_case(t))
                .unwrap_or(true)
        })
        .filter(|r| {
            params
                .run_tag
                .as_deref()
                .map(|tag| r.run_tag.as_deref() == Some(tag))
                .unwrap_or(true)
        })
        .collect();

    let total = records.len();

    // Store order is by file_id already
    if by_last_update {
        records.sort_by(|a, b| b.last_update.cmp(&a.last_update));
    }

    let items = records
        .iter()
        .take(params.limit.unwrap_or(usize::MAX))
        .map(FileStatusItem::from)
        .collect();

    Ok(Json(StatusListResponse {
        items,
        total,
        generated_at: Utc::now(),
    }))
}

/// GET /status/:file_id - Full record for one file
pub async fn get_status(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileRecord>> {
    Ok(Json(state.store().get(&file_id)?))
}

/// Status counts and dispatch load for one stage
#[derive(Debug, Default, Serialize)]
pub struct StageMetrics {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    /// Dispatches currently holding a pool slot
    pub in_flight: usize,
    pub concurrency: usize,
}

/// Response for metrics
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub pipeline_controller_up: u8,
    pub files: usize,
    pub stages: BTreeMap<&'static str, StageMetrics>,
    pub active_runs: usize,
    pub uptime_secs: i64,
}

/// GET /metrics - Per-stage status counts
pub async fn metrics(State(state): State<AppState>) -> Result<Json<MetricsResponse>> {
    let records = state.store().get_all()?;
    let pools = state.coordinator().pools();

    let mut stages = BTreeMap::new();
    for stage in Stage::ALL {
        let mut m = StageMetrics {
            in_flight: pools.in_flight(stage),
            concurrency: pools.limit(stage),
            ..Default::default()
        };
        for record in &records {
            match record.status(stage) {
                StageStatus::Pending => m.pending += 1,
                StageStatus::Running => m.running += 1,
                StageStatus::Done => m.done += 1,
                StageStatus::Failed => m.failed += 1,
            }
        }
        stages.insert(stage.as_str(), m);
    }

    Ok(Json(MetricsResponse {
        pipeline_controller_up: 1,
        files: records.len(),
        stages,
        active_runs: state.coordinator().runs().active_count(),
        uptime_secs: (Utc::now() - state.started_at()).num_seconds(),
    }))
}
