//! In-process registry of runs and reprocess requests with progress counters
//!
//! Runs are not persisted: the status store is the durable record of work,
//! and a restart simply forgets the bookkeeping around it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::types::{RunScope, Stage};

/// What kind of request created the run
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Run,
    Reprocess,
}

/// Run status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Processing,
    Complete,
}

/// How one (file, stage) unit ended within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Executor succeeded and `done` was recorded
    Succeeded,
    /// Failure recorded (executor error, timeout, or exhausted write retries)
    Failed(String),
    /// Not eligible under the run policy or ordering
    Skipped,
    /// A newer attempt took over; the result was discarded
    Superseded,
}

/// Error details for a unit that failed
#[derive(Debug, Clone, Serialize)]
pub struct UnitError {
    pub file_id: String,
    pub stage: Stage,
    pub error: String,
}

/// Progress information for a run
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub run_id: Uuid,
    pub kind: RunKind,
    pub run_tag: String,
    pub scope: RunScope,
    pub stages: Vec<Stage>,
    pub status: RunStatus,
    pub total_files: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub superseded: usize,
    pub unit_errors: Vec<UnitError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunProgress {
    pub fn new(
        run_id: Uuid,
        kind: RunKind,
        run_tag: String,
        scope: RunScope,
        stages: Vec<Stage>,
        total_files: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            kind,
            run_tag,
            scope,
            stages,
            status: RunStatus::Processing,
            total_files,
            dispatched: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            superseded: 0,
            unit_errors: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Registry of runs started by this process
#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<Uuid, RunProgress>,
    active: AtomicUsize,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a run
    pub fn start(&self, progress: RunProgress) {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.runs.insert(progress.run_id, progress);
    }

    /// A unit was claimed and handed to its executor
    pub fn record_dispatch(&self, run_id: Uuid) {
        if let Some(mut progress) = self.runs.get_mut(&run_id) {
            progress.dispatched += 1;
            progress.updated_at = Utc::now();
        }
    }

    /// Record how a unit ended
    pub fn record_outcome(&self, run_id: Uuid, file_id: &str, stage: Stage, outcome: &UnitOutcome) {
        if let Some(mut progress) = self.runs.get_mut(&run_id) {
            match outcome {
                UnitOutcome::Succeeded => progress.succeeded += 1,
                UnitOutcome::Failed(error) => {
                    progress.failed += 1;
                    progress.unit_errors.push(UnitError {
                        file_id: file_id.to_string(),
                        stage,
                        error: error.clone(),
                    });
                }
                UnitOutcome::Skipped => progress.skipped += 1,
                UnitOutcome::Superseded => progress.superseded += 1,
            }
            progress.updated_at = Utc::now();
        }
    }

    /// Mark a run finished
    pub fn complete(&self, run_id: Uuid) {
        if let Some(mut progress) = self.runs.get_mut(&run_id) {
            if progress.status == RunStatus::Complete {
                return;
            }
            let now = Utc::now();
            progress.status = RunStatus::Complete;
            progress.updated_at = now;
            progress.completed_at = Some(now);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn get(&self, run_id: Uuid) -> Option<RunProgress> {
        self.runs.get(&run_id).map(|p| p.clone())
    }

    /// All runs, newest first
    pub fn list(&self) -> Vec<RunProgress> {
        let mut runs: Vec<RunProgress> = self.runs.iter().map(|e| e.value().clone()).collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs
    }

    /// Runs still processing
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
