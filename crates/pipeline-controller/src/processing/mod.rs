//! Run coordination: per-stage dispatch pools, run bookkeeping, and the
//! coordinator that drives files through the stage executors

mod coordinator;
mod pool;
mod runs;

pub use coordinator::{new_run_tag, skip_reason, Coordinator};
pub use pool::StagePools;
pub use runs::{RunKind, RunProgress, RunRegistry, RunStatus, UnitError, UnitOutcome};
