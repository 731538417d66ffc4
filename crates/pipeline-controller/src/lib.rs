//! pipeline-controller: per-file, per-stage coordination for the ASR → validate → embed pipeline
//!
//! Tracks every source file's progress through three ordered stages in a
//! durable status store, dispatches eligible (file, stage) units to remote
//! stage executors under per-stage concurrency limits, and serves the
//! status/control API polled by the processing dashboard.

pub mod config;
pub mod error;
pub mod executors;
pub mod ingestion;
pub mod processing;
pub mod server;
pub mod storage;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use processing::Coordinator;
pub use types::{FileRecord, Stage, StageState, StageStatus};
