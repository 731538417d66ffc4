//! Core types for the pipeline controller

pub mod file_record;
pub mod run;
pub mod stage;

pub use file_record::{
    derive_file_id, FileRecord, FileStatusItem, NewFile, StageView, StageViews,
};
pub use run::{
    ProcessRequest, ReprocessAck, ReprocessRequest, RunHandle, RunPolicy, RunRequest, RunScope,
};
pub use stage::{Stage, StageState, StageStates, StageStatus};
