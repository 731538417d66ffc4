//! File registration and corpus discovery endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ingestion::ScanReport;
use crate::server::state::AppState;
use crate::types::{derive_file_id, FileStatusItem, NewFile};

/// Request to register a file
#[derive(Debug, Deserialize)]
pub struct RegisterFileRequest {
    /// Derived from `source_path` (or `filename`) when omitted
    #[serde(default)]
    pub file_id: Option<String>,
    pub filename: String,
    pub file_type: String,
    #[serde(default)]
    pub source_path: Option<String>,
}

/// Response for a registration
#[derive(Debug, Serialize)]
pub struct RegisterFileResponse {
    /// False when the file was already tracked
    pub created: bool,
    pub file: FileStatusItem,
}

/// POST /files - Register a file with every stage pending
pub async fn register_file(
    State(state): State<AppState>,
    Json(body): Json<RegisterFileRequest>,
) -> Result<(StatusCode, Json<RegisterFileResponse>)> {
    let filename = body.filename.trim();
    let file_type = body.file_type.trim().to_lowercase();
    if filename.is_empty() {
        return Err(Error::InvalidRequest("filename must not be empty".to_string()));
    }
    if file_type.is_empty() {
        return Err(Error::InvalidRequest("file_type must not be empty".to_string()));
    }

    let file_id = match body.file_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => derive_file_id(body.source_path.as_deref().unwrap_or(filename)),
    };

    let (record, created) = state.coordinator().register(NewFile {
        file_id,
        filename: filename.to_string(),
        file_type,
        source_path: body.source_path.clone(),
    })?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(RegisterFileResponse {
            created,
            file: FileStatusItem::from(&record),
        }),
    ))
}

/// POST /files/scan - Register unseen files under the corpus root
pub async fn scan_corpus(State(state): State<AppState>) -> Result<Json<ScanReport>> {
    let scanner = state
        .scanner()
        .ok_or_else(|| Error::InvalidRequest("no corpus root configured".to_string()))?;
    let store = state.store().clone();

    let report = tokio::task::spawn_blocking(move || scanner.scan_into(store.as_ref()))
        .await
        .map_err(|e| Error::internal(format!("Corpus scan task failed: {}", e)))??;

    Ok(Json(report))
}
