//! File record types for tracking per-stage pipeline status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::stage::{Stage, StageState, StageStates, StageStatus};

/// Record of one source file and its progress through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    /// Stable unique identifier (content- or path-derived)
    pub file_id: String,
    /// Original filename
    pub filename: String,
    /// Source type (audio, video, document, ...)
    pub file_type: String,
    /// Location of the source file, handed to executors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Per-stage state
    pub stage_states: StageStates,
    /// Run that last touched this record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_tag: Option<String>,
    /// When the file was registered
    pub created_at: DateTime<Utc>,
    /// Most recent stage transition
    pub last_update: DateTime<Utc>,
}

impl FileRecord {
    /// New record with every stage `pending`
    pub fn new(file: NewFile) -> Self {
        let now = Utc::now();
        Self {
            file_id: file.file_id,
            filename: file.filename,
            file_type: file.file_type,
            source_path: file.source_path,
            stage_states: StageStates::default(),
            run_tag: None,
            created_at: now,
            last_update: now,
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageState {
        self.stage_states.get(stage)
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stage_states.get(stage).status
    }

    /// Artifacts of the `done` stages before `stage`.
    ///
    /// A re-claimed stage still carries its previous output while running;
    /// that output is not handed downstream.
    pub fn upstream_artifacts(&self, stage: Stage) -> serde_json::Map<String, serde_json::Value> {
        stage
            .preceding()
            .map(|s| (s, self.stage(s)))
            .filter(|(_, state)| state.is_done())
            .filter_map(|(s, state)| {
                state
                    .artifacts
                    .clone()
                    .map(|a| (s.as_str().to_string(), a))
            })
            .collect()
    }
}

/// A file entering the status store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFile {
    pub file_id: String,
    pub filename: String,
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

/// Path-derived identifier: first 32 hex chars of the SHA-256 of the path
pub fn derive_file_id(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    hex::encode(digest)[..32].to_string()
}

/// Per-stage view used in status listings (artifacts omitted)
#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&StageState> for StageView {
    fn from(state: &StageState) -> Self {
        Self {
            status: state.status,
            error: state.error.clone(),
            attempt_count: state.attempt_count,
            started_at: state.started_at,
            completed_at: state.completed_at,
        }
    }
}

/// Stage views keyed by stage name
#[derive(Debug, Clone, Serialize)]
pub struct StageViews {
    pub asr: StageView,
    pub validate: StageView,
    pub embed: StageView,
}

/// Dashboard status item.
///
/// Carries the flat `*_done` / `*_error` columns the dashboard poller reads
/// alongside the full per-stage detail.
#[derive(Debug, Clone, Serialize)]
pub struct FileStatusItem {
    pub file_id: String,
    pub filename: String,
    pub file_type: String,
    pub asr_done: bool,
    pub validation_done: bool,
    pub embedding_done: bool,
    pub asr_error: Option<String>,
    pub validation_error: Option<String>,
    pub embedding_error: Option<String>,
    pub last_update: DateTime<Utc>,
    pub run_tag: Option<String>,
    pub stages: StageViews,
}

impl From<&FileRecord> for FileStatusItem {
    fn from(record: &FileRecord) -> Self {
        let s = &record.stage_states;
        Self {
            file_id: record.file_id.clone(),
            filename: record.filename.clone(),
            file_type: record.file_type.clone(),
            asr_done: s.asr.is_done(),
            validation_done: s.validate.is_done(),
            embedding_done: s.embed.is_done(),
            asr_error: s.asr.error.clone(),
            validation_error: s.validate.error.clone(),
            embedding_error: s.embed.error.clone(),
            last_update: record.last_update,
            run_tag: record.run_tag.clone(),
            stages: StageViews {
                asr: (&s.asr).into(),
                validate: (&s.validate).into(),
                embed: (&s.embed).into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        FileRecord::new(NewFile {
            file_id: "f1".to_string(),
            filename: "lecture-01.mp4".to_string(),
            file_type: "video".to_string(),
            source_path: None,
        })
    }

    #[test]
    fn test_new_record_is_all_pending() {
        let record = record();
        for (_, state) in record.stage_states.iter() {
            assert_eq!(state.status, StageStatus::Pending);
            assert_eq!(state.attempt_count, 0);
        }
    }

    #[test]
    fn test_status_item_flags() {
        let mut record = record();
        let now = Utc::now();
        record.stage_states.asr = record.stage_states.asr.claimed(now).succeeded(None, now);
        record.stage_states.validate = record.stage_states.validate.claimed(now).failed("bad transcript");

        let item = FileStatusItem::from(&record);
        assert!(item.asr_done);
        assert!(!item.validation_done);
        assert!(!item.embedding_done);
        assert_eq!(item.validation_error.as_deref(), Some("bad transcript"));
        assert_eq!(item.stages.embed.status, StageStatus::Pending);
    }

    #[test]
    fn test_upstream_artifacts() {
        let mut record = record();
        let now = Utc::now();
        record.stage_states.asr = record
            .stage_states
            .asr
            .claimed(now)
            .succeeded(Some(serde_json::json!({"transcript": "t.json"})), now);

        let artifacts = record.upstream_artifacts(Stage::Embed);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts["asr"]["transcript"], "t.json");
        assert!(record.upstream_artifacts(Stage::Asr).is_empty());
    }

    #[test]
    fn test_reclaimed_upstream_artifacts_are_withheld() {
        let mut record = record();
        let now = Utc::now();
        record.stage_states.asr = record
            .stage_states
            .asr
            .claimed(now)
            .succeeded(Some(serde_json::json!({"transcript": "t.json"})), now);
        record.stage_states.validate = record
            .stage_states
            .validate
            .claimed(now)
            .succeeded(Some(serde_json::json!({"v": "attempt1"})), now);

        // reprocess re-claims validate; attempt 1 output is being replaced
        record.stage_states.validate = record.stage_states.validate.claimed(now);
        assert!(record.stage(Stage::Validate).artifacts.is_some());

        let artifacts = record.upstream_artifacts(Stage::Embed);
        assert!(artifacts.get("validate").is_none());
        assert_eq!(artifacts["asr"]["transcript"], "t.json");
    }

    #[test]
    fn test_derive_file_id_is_stable() {
        let a = derive_file_id("lectures/week1/intro.mp4");
        assert_eq!(a.len(), 32);
        assert_eq!(a, derive_file_id("lectures/week1/intro.mp4"));
        assert_ne!(a, derive_file_id("lectures/week1/outro.mp4"));
    }
}
