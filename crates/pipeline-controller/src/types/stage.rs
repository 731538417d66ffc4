//! Processing stages and the per-(file, stage) state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// One of the three ordered processing steps.
///
/// Variant order is pipeline order, so `Ord` gives `asr < validate < embed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Asr,
    Validate,
    Embed,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 3] = [Stage::Asr, Stage::Validate, Stage::Embed];

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Asr => "asr",
            Stage::Validate => "validate",
            Stage::Embed => "embed",
        }
    }

    /// Parse a caller-supplied stage name
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "asr" => Ok(Stage::Asr),
            "validate" => Ok(Stage::Validate),
            "embed" => Ok(Stage::Embed),
            _ => Err(Error::UnknownStage(name.to_string())),
        }
    }

    /// Stages that come before this one
    pub fn preceding(&self) -> impl Iterator<Item = Stage> {
        let this = *self;
        Stage::ALL.into_iter().filter(move |s| *s < this)
    }

    /// Validate a stage list: non-empty, known names, deduplicated, pipeline order
    pub fn normalize<S: AsRef<str>>(names: &[S]) -> Result<Vec<Stage>> {
        if names.is_empty() {
            return Err(Error::EmptyStageSet);
        }

        let mut stages = names
            .iter()
            .map(|n| Stage::parse(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        stages.sort();
        stages.dedup();
        Ok(stages)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single (file, stage) unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Done => "done",
            StageStatus::Failed => "failed",
        }
    }

    /// Parse a persisted status. Unknown values read back as `Failed`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "pending" => StageStatus::Pending,
            "running" => StageStatus::Running,
            "done" => StageStatus::Done,
            _ => StageStatus::Failed,
        }
    }

    /// Edges of the unit state machine.
    ///
    /// `running -> running` is a re-claim (explicit reprocess or an expired
    /// lease); the attempt counter still advances.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Running)
                | (Failed, Running)
                | (Done, Running)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one (file, stage) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StageState {
    pub status: StageStatus,
    /// Present only when `status = failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of times this stage has been dispatched for this file
    pub attempt_count: u32,
    /// When the current attempt was claimed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set only on the transition into `done`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Executor output handed to downstream stages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
}

impl StageState {
    /// Next attempt: `running` with the counter advanced.
    ///
    /// Artifacts of the previous attempt are kept until the new outcome lands.
    pub fn claimed(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Running,
            error: None,
            attempt_count: self.attempt_count + 1,
            started_at: Some(now),
            completed_at: None,
            artifacts: self.artifacts.clone(),
        }
    }

    /// Successful outcome of the current attempt
    pub fn succeeded(&self, artifacts: Option<serde_json::Value>, now: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Done,
            error: None,
            attempt_count: self.attempt_count,
            started_at: self.started_at,
            completed_at: Some(now),
            artifacts,
        }
    }

    /// Failed outcome of the current attempt
    pub fn failed(&self, error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            error: Some(error.into()),
            attempt_count: self.attempt_count,
            started_at: self.started_at,
            completed_at: None,
            artifacts: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == StageStatus::Done
    }

    /// A `running` unit whose claim is older than `lease`
    pub fn is_stale(&self, lease: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status == StageStatus::Running
            && self.started_at.map(|t| now - t > lease).unwrap_or(true)
    }
}

/// The three stage states of one file, addressable by [`Stage`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StageStates {
    pub asr: StageState,
    pub validate: StageState,
    pub embed: StageState,
}

impl StageStates {
    pub fn get(&self, stage: Stage) -> &StageState {
        match stage {
            Stage::Asr => &self.asr,
            Stage::Validate => &self.validate,
            Stage::Embed => &self.embed,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StageState {
        match stage {
            Stage::Asr => &mut self.asr,
            Stage::Validate => &mut self.validate,
            Stage::Embed => &mut self.embed,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, &StageState)> {
        Stage::ALL.into_iter().map(move |s| (s, self.get(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_orders_and_dedups() {
        let stages = Stage::normalize(&["embed", "asr", "embed", "Validate"]).unwrap();
        assert_eq!(stages, vec![Stage::Asr, Stage::Validate, Stage::Embed]);
    }

    #[test]
    fn test_normalize_rejects_empty_and_unknown() {
        let empty: [&str; 0] = [];
        assert!(matches!(Stage::normalize(&empty), Err(Error::EmptyStageSet)));
        assert!(matches!(
            Stage::normalize(&["asr", "ocr"]),
            Err(Error::UnknownStage(name)) if name == "ocr"
        ));
    }

    #[test]
    fn test_preceding() {
        let before: Vec<_> = Stage::Embed.preceding().collect();
        assert_eq!(before, vec![Stage::Asr, Stage::Validate]);
        assert_eq!(Stage::Asr.preceding().count(), 0);
    }

    #[test]
    fn test_done_never_moves_straight_to_failed() {
        assert!(!StageStatus::Done.can_transition_to(StageStatus::Failed));
        assert!(!StageStatus::Pending.can_transition_to(StageStatus::Done));
        assert!(!StageStatus::Failed.can_transition_to(StageStatus::Done));
        assert!(StageStatus::Done.can_transition_to(StageStatus::Running));
        assert!(StageStatus::Failed.can_transition_to(StageStatus::Running));
    }

    #[test]
    fn test_claim_and_outcomes() {
        let now = Utc::now();
        let pending = StageState::default();

        let running = pending.claimed(now);
        assert_eq!(running.status, StageStatus::Running);
        assert_eq!(running.attempt_count, 1);

        let done = running.succeeded(Some(serde_json::json!({"segments": 3})), now);
        assert_eq!(done.status, StageStatus::Done);
        assert_eq!(done.completed_at, Some(now));
        assert_eq!(done.attempt_count, 1);

        let failed = done.claimed(now).failed("bad transcript");
        assert_eq!(failed.attempt_count, 2);
        assert_eq!(failed.error.as_deref(), Some("bad transcript"));
        assert!(failed.completed_at.is_none());
    }

    #[test]
    fn test_stale_lease() {
        let now = Utc::now();
        let running = StageState::default().claimed(now - chrono::Duration::seconds(120));
        assert!(running.is_stale(chrono::Duration::seconds(60), now));
        assert!(!running.is_stale(chrono::Duration::seconds(600), now));
        assert!(!StageState::default().is_stale(chrono::Duration::seconds(0), now));
    }
}
