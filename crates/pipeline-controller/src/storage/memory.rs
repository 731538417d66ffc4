//! In-memory status store
//!
//! Records live in a `DashMap`; the shard write lock held by `get_mut` makes
//! each compare-and-set atomic per file.

use chrono::Utc;
use dashmap::DashMap;

use super::{check_write, StageWrite, StatusStore};
use crate::error::{Error, Result};
use crate::types::{FileRecord, NewFile};

#[derive(Default)]
pub struct MemoryStatusStore {
    records: DashMap<String, FileRecord>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn register(&self, file: NewFile) -> Result<(FileRecord, bool)> {
        let mut created = false;
        let record = self
            .records
            .entry(file.file_id.clone())
            .or_insert_with(|| {
                created = true;
                FileRecord::new(file)
            })
            .clone();
        Ok((record, created))
    }

    fn get_all(&self) -> Result<Vec<FileRecord>> {
        let mut records: Vec<FileRecord> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        Ok(records)
    }

    fn get(&self, file_id: &str) -> Result<FileRecord> {
        self.records
            .get(file_id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::NotFound(file_id.to_string()))
    }

    fn upsert_stage(&self, file_id: &str, write: &StageWrite) -> Result<FileRecord> {
        let mut record = self
            .records
            .get_mut(file_id)
            .ok_or_else(|| Error::NotFound(file_id.to_string()))?;

        check_write(file_id, record.stage(write.stage), write)?;

        *record.stage_states.get_mut(write.stage) = write.state.clone();
        record.last_update = Utc::now();
        if let Some(tag) = &write.run_tag {
            record.run_tag = Some(tag.clone());
        }

        Ok(record.clone())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
