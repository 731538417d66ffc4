//! Storage module for the file status store
//!
//! Every stage write goes through [`StatusStore::upsert_stage`], which is a
//! compare-and-set on the stage's attempt counter. Two backends:
//! - `SqliteStatusStore`: durable, the default
//! - `MemoryStatusStore`: single-process, non-durable (tests, dry runs)

mod database;
mod memory;

pub use database::SqliteStatusStore;
pub use memory::MemoryStatusStore;

use std::path::Path;
use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{Error, Result};
use crate::types::{FileRecord, NewFile, Stage, StageState};

/// A single stage write.
///
/// `expected_attempt` is the attempt counter the writer last observed. A claim
/// writes `expected_attempt + 1`; an outcome writes `expected_attempt` back.
#[derive(Debug, Clone)]
pub struct StageWrite {
    pub stage: Stage,
    pub expected_attempt: u32,
    pub state: StageState,
    /// Stamped on the record when set
    pub run_tag: Option<String>,
}

/// Durable record of each file's per-stage state
pub trait StatusStore: Send + Sync {
    /// Create a record with all stages pending. Returns the stored record and
    /// whether it was newly created; an existing record is left untouched.
    fn register(&self, file: NewFile) -> Result<(FileRecord, bool)>;

    /// Snapshot of every record, ordered by `file_id`
    fn get_all(&self) -> Result<Vec<FileRecord>>;

    /// One record, or `NotFound`
    fn get(&self, file_id: &str) -> Result<FileRecord>;

    /// Atomically replace one stage state.
    ///
    /// Fails with `Conflict` when the stored attempt counter differs from
    /// `expected_attempt`, and with `InvalidTransition` when the status change
    /// is not an edge of the state machine. Refreshes `last_update`.
    fn upsert_stage(&self, file_id: &str, write: &StageWrite) -> Result<FileRecord>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Validate a write against the currently stored state
pub(crate) fn check_write(file_id: &str, current: &StageState, write: &StageWrite) -> Result<()> {
    if current.attempt_count != write.expected_attempt {
        return Err(Error::Conflict {
            file_id: file_id.to_string(),
            stage: write.stage,
            expected: write.expected_attempt,
            found: current.attempt_count,
        });
    }

    let next = write.state.attempt_count;
    if next != write.expected_attempt && next != write.expected_attempt + 1 {
        return Err(Error::internal(format!(
            "attempt counter for {}/{} may only advance by one ({} -> {})",
            file_id, write.stage, write.expected_attempt, next
        )));
    }

    if !current.status.can_transition_to(write.state.status) {
        return Err(Error::InvalidTransition {
            stage: write.stage,
            from: current.status,
            to: write.state.status,
        });
    }

    Ok(())
}

/// Open the configured backend
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn StatusStore>> {
    match config.backend {
        StorageBackend::Sqlite => {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let store = SqliteStatusStore::new(Path::new(&config.path))?;
            tracing::info!("Status store opened at {}", config.path.display());
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory status store; state is lost on restart");
            Ok(Arc::new(MemoryStatusStore::new()))
        }
    }
}
