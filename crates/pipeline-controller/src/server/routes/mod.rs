//! Status and control routes

pub mod files;
pub mod process;
pub mod runs;
pub mod status;

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Dashboard polling
        .route("/status/all", get(status::list_status))
        .route("/status/:file_id", get(status::get_status))
        // Control
        .route("/process", post(process::start_run))
        .route("/reprocess/:file_id", post(process::reprocess_file))
        // File registration
        .route("/files", post(files::register_file))
        .route("/files/scan", post(files::scan_corpus))
        // Run bookkeeping
        .route("/runs", get(runs::list_runs))
        .route("/runs/:run_id", get(runs::get_run))
        .route("/metrics", get(status::metrics))
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "pipeline-controller",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Coordinates ASR, validation and embedding stages per source file",
        "stages": ["asr", "validate", "embed"],
        "endpoints": {
            "GET /status/all": "Status of every tracked file (?file_type=&run_tag=&sort=file_id|last_update&limit=)",
            "GET /status/:file_id": "Full record for one file, including stage artifacts",
            "POST /process": "Start a run over a scope and set of stages",
            "POST /reprocess/:file_id": "Force stages to re-run for one file",
            "POST /files": "Register a file",
            "POST /files/scan": "Register unseen files under the corpus root",
            "GET /runs": "Runs started by this process",
            "GET /runs/:run_id": "Progress of one run",
            "GET /metrics": "Per-stage status counts and dispatch load"
        }
    }))
}
