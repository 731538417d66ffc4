//! Run progress endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::RunProgress;
use crate::server::state::AppState;

/// Response for run listing
#[derive(Debug, Serialize)]
pub struct RunListResponse {
    /// Newest first
    pub runs: Vec<RunProgress>,
    pub active: usize,
}

/// GET /runs - Runs started by this process
pub async fn list_runs(State(state): State<AppState>) -> Json<RunListResponse> {
    let runs = state.coordinator().runs();
    Json(RunListResponse {
        runs: runs.list(),
        active: runs.active_count(),
    })
}

/// GET /runs/:run_id - Progress of one run
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunProgress>> {
    state
        .coordinator()
        .runs()
        .get(run_id)
        .map(Json)
        .ok_or(Error::RunNotFound(run_id))
}
