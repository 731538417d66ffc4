//! Pipeline coordinator
//!
//! Turns `run` and `reprocess` requests into claimed (file, stage) units,
//! dispatches them to the stage executors under per-stage limits, and writes
//! outcomes back to the status store.
//!
//! Every claim is a compare-and-set on the unit's attempt counter, made before
//! the executor is invoked. Outcomes are written against the claimed attempt,
//! so a result from an attempt that has since been re-claimed is rejected by
//! the store and discarded.

use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uuid::Uuid;

use super::pool::StagePools;
use super::runs::{RunKind, RunProgress, RunRegistry, UnitOutcome};
use crate::config::{CoordinatorConfig, PipelineConfig, StagesConfig};
use crate::error::{Error, Result};
use crate::executors::{ExecutorSet, StageInput};
use crate::storage::{StageWrite, StatusStore};
use crate::types::{
    FileRecord, NewFile, ReprocessAck, RunHandle, RunPolicy, RunRequest, RunScope, Stage,
    StageState, StageStatus,
};

/// Format of generated run tags (UTC)
const RUN_TAG_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Run tag for the current instant
pub fn new_run_tag() -> String {
    Utc::now().format(RUN_TAG_FORMAT).to_string()
}

/// Why a unit is not dispatched in a run, or `None` when it is eligible.
///
/// Policy decides by the unit's own status; ordering requires every earlier
/// requested stage of the run to be `done` for the file. A `running` unit is
/// only taken over once its claim is older than `lease`.
pub fn skip_reason(
    record: &FileRecord,
    stage: Stage,
    requested: &[Stage],
    policy: RunPolicy,
    lease: Option<chrono::Duration>,
) -> Option<String> {
    let state = record.stage(stage);

    let eligible = match state.status {
        StageStatus::Pending => true,
        StageStatus::Failed => policy.resume || policy.overwrite_existing,
        StageStatus::Done => policy.overwrite_existing,
        StageStatus::Running => {
            (policy.resume || policy.overwrite_existing)
                && lease.map(|l| state.is_stale(l, Utc::now())).unwrap_or(false)
        }
    };
    if !eligible {
        return Some(format!("status is {}", state.status));
    }

    requested
        .iter()
        .copied()
        .filter(|s| *s < stage)
        .find(|s| !record.stage(*s).is_done())
        .map(|upstream| format!("upstream {} is {}", upstream, record.status(upstream)))
}

/// Drives files through the stage executors
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn StatusStore>,
    executors: ExecutorSet,
    pools: StagePools,
    runs: RunRegistry,
    stages: StagesConfig,
    settings: CoordinatorConfig,
}

/// Dispatch parameters shared by the file tasks of one run
struct RunContext {
    run_id: Uuid,
    run_tag: String,
    stages: Vec<Stage>,
    policy: RunPolicy,
}

impl Coordinator {
    /// Create a coordinator over an existing store and executor set
    pub fn new(
        store: Arc<dyn StatusStore>,
        executors: ExecutorSet,
        stages: StagesConfig,
        settings: CoordinatorConfig,
    ) -> Self {
        for stage in Stage::ALL {
            let cfg = stages.get(stage);
            tracing::info!(
                "Stage {}: {} concurrent, {}s timeout, executor {}",
                stage,
                cfg.concurrency,
                cfg.timeout_secs,
                executors.get(stage).map(|e| e.name().to_string()).unwrap_or_default()
            );
        }

        Self {
            inner: Arc::new(Inner {
                store,
                executors,
                pools: StagePools::new(&stages),
                runs: RunRegistry::new(),
                stages,
                settings,
            }),
        }
    }

    /// Coordinator with HTTP executors built from configuration
    pub fn from_config(store: Arc<dyn StatusStore>, config: &PipelineConfig) -> Result<Self> {
        let executors = ExecutorSet::http(&config.stages)?;
        Ok(Self::new(
            store,
            executors,
            config.stages.clone(),
            config.coordinator.clone(),
        ))
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.inner.store
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.inner.runs
    }

    pub fn pools(&self) -> &StagePools {
        &self.inner.pools
    }

    pub fn executors(&self) -> &ExecutorSet {
        &self.inner.executors
    }

    /// Register a file with all stages pending (existing records are kept)
    pub fn register(&self, file: NewFile) -> Result<(FileRecord, bool)> {
        let (record, created) = self.inner.store.register(file)?;
        if created {
            tracing::info!("Registered {} ({}, {})", record.file_id, record.filename, record.file_type);
        }
        Ok((record, created))
    }

    /// Start a run. Returns once the candidate set is fixed; dispatch
    /// continues in the background and is observable through the store.
    pub fn run(&self, request: RunRequest) -> Result<RunHandle> {
        if request.stages.is_empty() {
            return Err(Error::EmptyStageSet);
        }

        let candidates = self.inner.candidates(&request.scope)?;
        let run_id = Uuid::new_v4();
        let run_tag = request.run_tag.clone().unwrap_or_else(new_run_tag);
        let submitted_at = Utc::now();

        self.inner.runs.start(RunProgress::new(
            run_id,
            RunKind::Run,
            run_tag.clone(),
            request.scope.clone(),
            request.stages.clone(),
            candidates.len(),
        ));

        tracing::info!(
            "Run {} ({}) accepted: scope={}, stages={:?}, resume={}, overwrite={}, {} candidate files",
            run_id,
            run_tag,
            request.scope.label(),
            request.stages,
            request.policy.resume,
            request.policy.overwrite_existing,
            candidates.len()
        );

        let handle = RunHandle {
            accepted: true,
            run_id,
            run_tag: run_tag.clone(),
            stages: request.stages.clone(),
            scope: request.scope,
            resume: request.policy.resume,
            overwrite_existing: request.policy.overwrite_existing,
            candidate_files: candidates.len(),
            submitted_at,
        };

        let ctx = Arc::new(RunContext {
            run_id,
            run_tag,
            stages: request.stages,
            policy: request.policy,
        });
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let tasks: Vec<_> = candidates
                .into_iter()
                .map(|file_id| {
                    let inner = inner.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move { inner.drive_file(&ctx, &file_id).await })
                })
                .collect();

            for result in join_all(tasks).await {
                if let Err(e) = result {
                    tracing::error!("Run {} file task aborted: {}", ctx.run_id, e);
                }
            }

            inner.runs.complete(ctx.run_id);
            if let Some(progress) = inner.runs.get(ctx.run_id) {
                tracing::info!(
                    "Run {} complete: {} dispatched, {} succeeded, {} failed, {} skipped, {} superseded",
                    ctx.run_id,
                    progress.dispatched,
                    progress.succeeded,
                    progress.failed,
                    progress.skipped,
                    progress.superseded
                );
            }
        });

        Ok(handle)
    }

    /// Re-dispatch `stages` for one file regardless of their status or of
    /// upstream state.
    ///
    /// Every requested stage is claimed (`running`, attempt + 1) before this
    /// returns; the executors then run in pipeline order in the background.
    pub fn reprocess<S: AsRef<str>>(&self, file_id: &str, stages: &[S]) -> Result<ReprocessAck> {
        let stages = Stage::normalize(stages)?;
        self.inner.store.get(file_id)?;

        let run_id = Uuid::new_v4();
        let run_tag = new_run_tag();

        let mut claims: Vec<StageState> = Vec::with_capacity(stages.len());
        for &stage in &stages {
            match self.inner.claim_for_reprocess(file_id, stage, &run_tag) {
                Ok(claimed) => claims.push(claimed),
                Err(e) => {
                    self.inner.abandon_claims(file_id, &stages, &claims, &e);
                    return Err(e);
                }
            }
        }

        let attempts: Vec<u32> = claims.iter().map(|c| c.attempt_count).collect();
        tracing::info!(
            "Reprocess {} for {}: stages={:?}, attempts={:?}",
            run_id,
            file_id,
            stages,
            attempts
        );

        self.inner.runs.start(RunProgress::new(
            run_id,
            RunKind::Reprocess,
            run_tag.clone(),
            RunScope::Files {
                files: vec![file_id.to_string()],
            },
            stages.clone(),
            1,
        ));

        let inner = self.inner.clone();
        let work: Vec<(Stage, StageState)> = stages.iter().copied().zip(claims).collect();
        let target = file_id.to_string();
        tokio::spawn(async move {
            for (stage, claimed) in work {
                let outcome = inner
                    .reprocess_unit(run_id, &target, stage, &claimed, &run_tag)
                    .await;
                inner.runs.record_outcome(run_id, &target, stage, &outcome);
            }
            inner.runs.complete(run_id);
        });

        Ok(ReprocessAck {
            accepted: true,
            run_id,
            file_id: file_id.to_string(),
            stages,
            attempts,
            submitted_at: Utc::now(),
        })
    }
}

impl Inner {
    fn lease(&self) -> Option<chrono::Duration> {
        self.settings
            .stale_running_after_secs
            .map(|secs| chrono::Duration::seconds(secs as i64))
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.settings.retry_backoff_ms)
    }

    /// File ids selected by `scope`, in store order
    fn candidates(&self, scope: &RunScope) -> Result<Vec<String>> {
        let records = self.store.get_all()?;

        match scope {
            RunScope::All => Ok(records.into_iter().map(|r| r.file_id).collect()),
            RunScope::SourceType { source_type } => {
                let wanted = source_type.trim();
                Ok(records
                    .into_iter()
                    .filter(|r| r.file_type.eq_ignore_ascii_case(wanted))
                    .map(|r| r.file_id)
                    .collect())
            }
            RunScope::Files { files } => {
                let known: HashSet<&str> = records.iter().map(|r| r.file_id.as_str()).collect();
                let unknown: Vec<&str> = files
                    .iter()
                    .map(String::as_str)
                    .filter(|f| !known.contains(f))
                    .collect();
                if !unknown.is_empty() {
                    return Err(Error::InvalidScope(format!(
                        "unknown file ids: {}",
                        unknown.join(", ")
                    )));
                }

                let mut seen = HashSet::new();
                Ok(files
                    .iter()
                    .filter(|f| seen.insert(f.as_str()))
                    .cloned()
                    .collect())
            }
        }
    }

    /// Walk the requested stages for one file. Each stage re-reads the store,
    /// so a stage left undone by this or any other dispatcher blocks the
    /// stages after it.
    async fn drive_file(&self, ctx: &RunContext, file_id: &str) {
        for &stage in &ctx.stages {
            let outcome = match self.run_unit(ctx, file_id, stage).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        "[{}] {} not dispatched in run {}: {}",
                        file_id,
                        stage,
                        ctx.run_id,
                        e
                    );
                    UnitOutcome::Failed(e.to_string())
                }
            };
            self.runs.record_outcome(ctx.run_id, file_id, stage, &outcome);
        }
    }

    async fn run_unit(&self, ctx: &RunContext, file_id: &str, stage: Stage) -> Result<UnitOutcome> {
        let record = self.store.get(file_id)?;
        if let Some(reason) = skip_reason(&record, stage, &ctx.stages, ctx.policy, self.lease()) {
            tracing::debug!("[{}] {} skipped in run {}: {}", file_id, stage, ctx.run_id, reason);
            return Ok(UnitOutcome::Skipped);
        }

        let permit = self.pools.acquire(stage).await?;

        let Some(record) = self.claim_for_run(ctx, file_id, stage)? else {
            return Ok(UnitOutcome::Skipped);
        };
        let claimed = record.stage(stage).clone();

        self.runs.record_dispatch(ctx.run_id);
        let outcome = self
            .execute(&record, stage, &claimed, Some(ctx.run_tag.clone()))
            .await;
        drop(permit);

        Ok(outcome)
    }

    /// Claim a unit for a run, re-checking eligibility against fresh state
    /// after every lost race.
    fn claim_for_run(&self, ctx: &RunContext, file_id: &str, stage: Stage) -> Result<Option<FileRecord>> {
        for _ in 0..=self.settings.write_retries {
            let record = self.store.get(file_id)?;
            if let Some(reason) = skip_reason(&record, stage, &ctx.stages, ctx.policy, self.lease()) {
                tracing::debug!(
                    "[{}] {} no longer eligible in run {}: {}",
                    file_id,
                    stage,
                    ctx.run_id,
                    reason
                );
                return Ok(None);
            }

            match self.claim(&record, stage, &ctx.run_tag) {
                Ok(claimed) => return Ok(Some(claimed)),
                Err(e) if e.is_conflict() => {
                    tracing::debug!("[{}] {} claim lost a race, re-reading", file_id, stage);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            "[{}] {} claim kept conflicting in run {}; leaving it to the other dispatcher",
            file_id,
            stage,
            ctx.run_id
        );
        Ok(None)
    }

    fn claim_for_reprocess(&self, file_id: &str, stage: Stage, run_tag: &str) -> Result<StageState> {
        let mut last_error = None;
        for _ in 0..=self.settings.write_retries {
            let record = self.store.get(file_id)?;
            match self.claim(&record, stage, run_tag) {
                Ok(claimed) => return Ok(claimed.stage(stage).clone()),
                Err(e) if e.is_conflict() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::internal("reprocess claim retries exhausted")))
    }

    /// Move a unit to `running` with the next attempt number
    fn claim(&self, record: &FileRecord, stage: Stage, run_tag: &str) -> Result<FileRecord> {
        let current = record.stage(stage);
        self.store.upsert_stage(
            &record.file_id,
            &StageWrite {
                stage,
                expected_attempt: current.attempt_count,
                state: current.claimed(Utc::now()),
                run_tag: Some(run_tag.to_string()),
            },
        )
    }

    /// Fail units a partially-claimed reprocess left `running`
    fn abandon_claims(&self, file_id: &str, stages: &[Stage], claims: &[StageState], cause: &Error) {
        for (stage, claimed) in stages.iter().copied().zip(claims) {
            let write = StageWrite {
                stage,
                expected_attempt: claimed.attempt_count,
                state: claimed.failed(format!("reprocess aborted: {}", cause)),
                run_tag: None,
            };
            if let Err(e) = self.store.upsert_stage(file_id, &write) {
                tracing::warn!("[{}] could not release {} claim: {}", file_id, stage, e);
            }
        }
    }

    async fn reprocess_unit(
        &self,
        run_id: Uuid,
        file_id: &str,
        stage: Stage,
        claimed: &StageState,
        run_tag: &str,
    ) -> UnitOutcome {
        let permit = match self.pools.acquire(stage).await {
            Ok(permit) => permit,
            Err(e) => {
                return self
                    .record_outcome(file_id, stage, claimed, claimed.failed(e.to_string()))
                    .await
            }
        };

        // Fresh read: earlier stages of this reprocess may have produced new artifacts
        let record = match self.store.get(file_id) {
            Ok(record) => record,
            Err(e) => {
                return self
                    .record_outcome(file_id, stage, claimed, claimed.failed(e.to_string()))
                    .await
            }
        };
        if record.stage(stage).attempt_count != claimed.attempt_count {
            tracing::warn!(
                "[{}] {} attempt {} re-claimed before dispatch; skipping",
                file_id,
                stage,
                claimed.attempt_count
            );
            return UnitOutcome::Superseded;
        }

        self.runs.record_dispatch(run_id);
        let outcome = self
            .execute(&record, stage, claimed, Some(run_tag.to_string()))
            .await;
        drop(permit);
        outcome
    }

    /// Invoke the executor for a claimed unit under the stage deadline and
    /// record the outcome.
    async fn execute(
        &self,
        record: &FileRecord,
        stage: Stage,
        claimed: &StageState,
        run_tag: Option<String>,
    ) -> UnitOutcome {
        let file_id = record.file_id.as_str();
        let attempt = claimed.attempt_count;
        let deadline = self.stages.get(stage).timeout();
        let input = StageInput::new(record, stage, attempt, run_tag);

        tracing::info!("[{}] {} attempt {} dispatched", file_id, stage, attempt);
        let start_time = Instant::now();

        let result = match self.executors.get(stage) {
            Ok(executor) => match timeout(deadline, executor.execute(&input)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(
                        "[{}] TIMEOUT: {} attempt {} exceeded {}s",
                        file_id,
                        stage,
                        attempt,
                        deadline.as_secs()
                    );
                    Err(Error::executor(
                        stage,
                        format!("timed out after {}s", deadline.as_secs()),
                    ))
                }
            },
            Err(e) => Err(e),
        };

        let elapsed = start_time.elapsed().as_secs_f64();
        let next = match result {
            Ok(artifacts) => {
                tracing::info!(
                    "[{}] {} attempt {} succeeded in {:.1}s",
                    file_id,
                    stage,
                    attempt,
                    elapsed
                );
                claimed.succeeded(artifacts, Utc::now())
            }
            Err(e) => {
                let message = e.failure_message();
                tracing::warn!(
                    "[{}] {} attempt {} failed after {:.1}s: {}",
                    file_id,
                    stage,
                    attempt,
                    elapsed,
                    message
                );
                claimed.failed(message)
            }
        };

        self.record_outcome(file_id, stage, claimed, next).await
    }

    /// Write an outcome against the claimed attempt.
    ///
    /// A conflict caused by a newer claim means this result is stale and is
    /// dropped. Other write errors are retried; once retries run out the unit
    /// is marked failed with the write error instead.
    async fn record_outcome(
        &self,
        file_id: &str,
        stage: Stage,
        claimed: &StageState,
        next: StageState,
    ) -> UnitOutcome {
        let attempt = claimed.attempt_count;
        let intended = match (&next.status, &next.error) {
            (StageStatus::Done, _) => UnitOutcome::Succeeded,
            (_, error) => UnitOutcome::Failed(error.clone().unwrap_or_default()),
        };
        let write = StageWrite {
            stage,
            expected_attempt: attempt,
            state: next,
            run_tag: None,
        };

        let tries = self.settings.write_retries + 1;
        let mut last_error = String::new();
        for try_no in 1..=tries {
            match self.store.upsert_stage(file_id, &write) {
                Ok(_) => return intended,
                Err(e) => {
                    if e.is_conflict() && self.superseded(file_id, stage, attempt) {
                        tracing::warn!(
                            "[{}] {} attempt {} was superseded by a newer dispatch; result discarded",
                            file_id,
                            stage,
                            attempt
                        );
                        return UnitOutcome::Superseded;
                    }
                    tracing::warn!(
                        "[{}] {} attempt {} status write failed ({}/{}): {}",
                        file_id,
                        stage,
                        attempt,
                        try_no,
                        tries,
                        e
                    );
                    last_error = e.to_string();
                }
            }
            if try_no < tries {
                tokio::time::sleep(self.backoff()).await;
            }
        }

        let message = format!("status write failed after {} attempts: {}", tries, last_error);
        tracing::error!("[{}] {} attempt {}: {}", file_id, stage, attempt, message);
        let fallback = StageWrite {
            state: claimed.failed(message.clone()),
            ..write
        };
        if let Err(e) = self.store.upsert_stage(file_id, &fallback) {
            tracing::error!("[{}] {} attempt {} left running: {}", file_id, stage, attempt, e);
        }
        UnitOutcome::Failed(message)
    }

    fn superseded(&self, file_id: &str, stage: Stage, attempt: u32) -> bool {
        self.store
            .get(file_id)
            .map(|r| r.stage(stage).attempt_count > attempt)
            .unwrap_or(false)
    }
}
