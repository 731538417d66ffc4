//! Error types for the pipeline controller

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::{Stage, StageStatus};

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline controller errors
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown file id
    #[error("File not found: {0}")]
    NotFound(String),

    /// Stage name outside of asr/validate/embed
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Run or reprocess request without any stage
    #[error("At least one stage must be requested")]
    EmptyStageSet,

    /// Scope is malformed or references unknown files
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Malformed request outside of stage and scope validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown run id
    #[error("Run not found: {0}")]
    RunNotFound(uuid::Uuid),

    /// Lost an optimistic-concurrency race on a stage write
    #[error(
        "Conflicting write for {file_id}/{stage}: expected attempt {expected}, found {found}"
    )]
    Conflict {
        file_id: String,
        stage: Stage,
        expected: u32,
        found: u32,
    },

    /// Stage executor reported a failure
    #[error("{stage} executor failed: {message}")]
    Executor { stage: Stage, message: String },

    /// Stage state change outside of the documented state machine
    #[error("Invalid {stage} transition: {from} -> {to}")]
    InvalidTransition {
        stage: Stage,
        from: StageStatus,
        to: StageStatus,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an executor failure
    pub fn executor(stage: Stage, message: impl Into<String>) -> Self {
        Self::Executor {
            stage,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Message persisted on a failed stage.
    ///
    /// Executor failures keep the executor's own wording; everything else
    /// uses the display form.
    pub fn failure_message(&self) -> String {
        match self {
            Error::Executor { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("File not found: {}", id),
            ),
            Error::UnknownStage(name) => (
                StatusCode::BAD_REQUEST,
                "unknown_stage",
                format!("Unknown stage '{}' (expected asr, validate or embed)", name),
            ),
            Error::EmptyStageSet => (StatusCode::BAD_REQUEST, "empty_stage_set", self.to_string()),
            Error::InvalidScope(msg) => (StatusCode::BAD_REQUEST, "invalid_scope", msg.clone()),
            Error::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg.clone()),
            Error::RunNotFound(_) => (StatusCode::NOT_FOUND, "run_not_found", self.to_string()),
            Error::Conflict { .. } => (StatusCode::CONFLICT, "conflict", self.to_string()),
            Error::Executor { .. } => (StatusCode::BAD_GATEWAY, "executor_failure", self.to_string()),
            Error::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "invalid_transition", self.to_string())
            }
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            Error::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                err.to_string(),
            ),
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error", err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
