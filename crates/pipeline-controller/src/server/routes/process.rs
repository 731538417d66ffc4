//! Run control endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{ProcessRequest, ReprocessAck, ReprocessRequest, RunHandle, RunRequest};

/// POST /process - Start a run; dispatch continues in the background
pub async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<ProcessRequest>,
) -> Result<(StatusCode, Json<RunHandle>)> {
    let request = RunRequest::try_from(body)?;
    let handle = state.coordinator().run(request)?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// POST /reprocess/:file_id - Force stages to re-run for one file
pub async fn reprocess_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Json(body): Json<ReprocessRequest>,
) -> Result<(StatusCode, Json<ReprocessAck>)> {
    let ack = state.coordinator().reprocess(&file_id, body.stages.as_slice())?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}
