//! SQLite status store
//!
//! One row per file in `files`, one row per (file, stage) in `stage_states`.
//! Stage writes run inside a transaction with the attempt counter in the
//! `WHERE` clause, so the compare-and-set holds even with other processes
//! writing the same database file.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{check_write, StageWrite, StatusStore};
use crate::error::{Error, Result};
use crate::types::{FileRecord, NewFile, Stage, StageState, StageStates, StageStatus};

/// SQLite-based status store
pub struct SqliteStatusStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStatusStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        // FULL sync: a stage write is on disk before upsert_stage returns
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=5000;
        "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                source_path TEXT,
                run_tag TEXT,
                created_at TEXT NOT NULL,
                last_update TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_file_type ON files(file_type);
            CREATE INDEX IF NOT EXISTS idx_files_last_update ON files(last_update);

            CREATE TABLE IF NOT EXISTS stage_states (
                file_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                completed_at TEXT,
                artifacts_json TEXT,
                PRIMARY KEY (file_id, stage),
                FOREIGN KEY (file_id) REFERENCES files(file_id)
            );

            CREATE INDEX IF NOT EXISTS idx_stage_states_status ON stage_states(stage, status);
        "#,
        )?;

        tracing::info!("Status store migrations complete");
        Ok(())
    }
}

impl StatusStore for SqliteStatusStore {
    fn register(&self, file: NewFile) -> Result<(FileRecord, bool)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let now = Utc::now().to_rfc3339();
        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO files (
                file_id, filename, file_type, source_path, run_tag, created_at, last_update
            ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)
            "#,
            params![file.file_id, file.filename, file.file_type, file.source_path, now],
        )?;

        for stage in Stage::ALL {
            tx.execute(
                "INSERT OR IGNORE INTO stage_states (file_id, stage) VALUES (?1, ?2)",
                params![file.file_id, stage.as_str()],
            )?;
        }

        let record = load_record(&tx, &file.file_id)?
            .ok_or_else(|| Error::internal(format!("record {} vanished after insert", file.file_id)))?;
        tx.commit()?;

        Ok((record, inserted > 0))
    }

    fn get_all(&self) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock();

        let mut states: HashMap<String, StageStates> = HashMap::new();
        let mut stmt = conn.prepare(
            r#"
            SELECT file_id, stage, status, error, attempt_count, started_at, completed_at, artifacts_json
            FROM stage_states
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let file_id: String = row.get(0)?;
            let stage: String = row.get(1)?;
            Ok((file_id, stage, row_to_stage_state(row, 2)?))
        })?;
        for row in rows {
            let (file_id, stage, state) = row?;
            if let Ok(stage) = Stage::parse(&stage) {
                *states.entry(file_id).or_default().get_mut(stage) = state;
            }
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT file_id, filename, file_type, source_path, run_tag, created_at, last_update
            FROM files ORDER BY file_id ASC
            "#,
        )?;
        let records = stmt
            .query_map([], row_to_file_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|mut record| {
                if let Some(s) = states.remove(&record.file_id) {
                    record.stage_states = s;
                }
                record
            })
            .collect();

        Ok(records)
    }

    fn get(&self, file_id: &str) -> Result<FileRecord> {
        let conn = self.conn.lock();
        load_record(&conn, file_id)?.ok_or_else(|| Error::NotFound(file_id.to_string()))
    }

    fn upsert_stage(&self, file_id: &str, write: &StageWrite) -> Result<FileRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let current = load_stage(&tx, file_id, write.stage)?
            .ok_or_else(|| Error::NotFound(file_id.to_string()))?;
        check_write(file_id, &current, write)?;

        let state = &write.state;
        let artifacts_json = state
            .artifacts
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let updated = tx.execute(
            r#"
            UPDATE stage_states SET
                status = ?3,
                error = ?4,
                attempt_count = ?5,
                started_at = ?6,
                completed_at = ?7,
                artifacts_json = ?8
            WHERE file_id = ?1 AND stage = ?2 AND attempt_count = ?9
            "#,
            params![
                file_id,
                write.stage.as_str(),
                state.status.as_str(),
                state.error,
                state.attempt_count as i64,
                state.started_at.map(|t| t.to_rfc3339()),
                state.completed_at.map(|t| t.to_rfc3339()),
                artifacts_json,
                write.expected_attempt as i64,
            ],
        )?;

        if updated == 0 {
            return Err(Error::Conflict {
                file_id: file_id.to_string(),
                stage: write.stage,
                expected: write.expected_attempt,
                found: current.attempt_count,
            });
        }

        tx.execute(
            "UPDATE files SET last_update = ?2, run_tag = COALESCE(?3, run_tag) WHERE file_id = ?1",
            params![file_id, Utc::now().to_rfc3339(), write.run_tag],
        )?;

        let record = load_record(&tx, file_id)?.ok_or_else(|| Error::NotFound(file_id.to_string()))?;
        tx.commit()?;

        Ok(record)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// Helper functions

fn load_stage(conn: &Connection, file_id: &str, stage: Stage) -> Result<Option<StageState>> {
    let state = conn
        .query_row(
            r#"
            SELECT status, error, attempt_count, started_at, completed_at, artifacts_json
            FROM stage_states WHERE file_id = ?1 AND stage = ?2
            "#,
            params![file_id, stage.as_str()],
            |row| row_to_stage_state(row, 0),
        )
        .optional()?;
    Ok(state)
}

fn load_record(conn: &Connection, file_id: &str) -> Result<Option<FileRecord>> {
    let record = conn
        .query_row(
            r#"
            SELECT file_id, filename, file_type, source_path, run_tag, created_at, last_update
            FROM files WHERE file_id = ?1
            "#,
            params![file_id],
            row_to_file_record,
        )
        .optional()?;

    let Some(mut record) = record else {
        return Ok(None);
    };

    for stage in Stage::ALL {
        if let Some(state) = load_stage(conn, file_id, stage)? {
            *record.stage_states.get_mut(stage) = state;
        }
    }

    Ok(Some(record))
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Read a stage state starting at column `offset`
fn row_to_stage_state(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<StageState> {
    let status_str: String = row.get(offset)?;
    let error: Option<String> = row.get(offset + 1)?;
    let attempt_count: i64 = row.get(offset + 2)?;
    let started_at_str: Option<String> = row.get(offset + 3)?;
    let completed_at_str: Option<String> = row.get(offset + 4)?;
    let artifacts_json: Option<String> = row.get(offset + 5)?;

    Ok(StageState {
        status: StageStatus::from_db(&status_str),
        error,
        attempt_count: attempt_count as u32,
        started_at: started_at_str.as_deref().and_then(parse_time),
        completed_at: completed_at_str.as_deref().and_then(parse_time),
        artifacts: artifacts_json.and_then(|j| serde_json::from_str(&j).ok()),
    })
}

fn row_to_file_record(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    let file_id: String = row.get(0)?;
    let filename: String = row.get(1)?;
    let file_type: String = row.get(2)?;
    let source_path: Option<String> = row.get(3)?;
    let run_tag: Option<String> = row.get(4)?;
    let created_at_str: String = row.get(5)?;
    let last_update_str: String = row.get(6)?;

    Ok(FileRecord {
        file_id,
        filename,
        file_type,
        source_path,
        stage_states: StageStates::default(),
        run_tag,
        created_at: parse_time(&created_at_str).unwrap_or_else(Utc::now),
        last_update: parse_time(&last_update_str).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_file(id: &str) -> NewFile {
        NewFile {
            file_id: id.to_string(),
            filename: format!("{}.mp3", id),
            file_type: "audio".to_string(),
            source_path: Some(format!("/data/ingestion/{}.mp3", id)),
        }
    }

    fn claim(store: &SqliteStatusStore, id: &str, stage: Stage) -> FileRecord {
        let current = store.get(id).unwrap().stage(stage).clone();
        store
            .upsert_stage(
                id,
                &StageWrite {
                    stage,
                    expected_attempt: current.attempt_count,
                    state: current.claimed(Utc::now()),
                    run_tag: Some("20250101T000000Z".to_string()),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_register_is_idempotent() {
        let store = SqliteStatusStore::in_memory().unwrap();

        let (record, created) = store.register(new_file("f1")).unwrap();
        assert!(created);
        assert_eq!(record.status(Stage::Asr), StageStatus::Pending);

        let mut renamed = new_file("f1");
        renamed.filename = "other.mp3".to_string();
        let (record, created) = store.register(renamed).unwrap();
        assert!(!created);
        assert_eq!(record.filename, "f1.mp3");
    }

    #[test]
    fn test_get_all_sorted_by_file_id() {
        let store = SqliteStatusStore::in_memory().unwrap();
        for id in ["c", "a", "b"] {
            store.register(new_file(id)).unwrap();
        }

        let ids: Vec<_> = store.get_all().unwrap().into_iter().map(|r| r.file_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = SqliteStatusStore::in_memory().unwrap();
        assert!(matches!(store.get("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_claim_then_complete_round_trip() {
        let store = SqliteStatusStore::in_memory().unwrap();
        store.register(new_file("f1")).unwrap();

        let record = claim(&store, "f1", Stage::Asr);
        let running = record.stage(Stage::Asr).clone();
        assert_eq!(running.status, StageStatus::Running);
        assert_eq!(running.attempt_count, 1);
        assert_eq!(record.run_tag.as_deref(), Some("20250101T000000Z"));

        let artifacts = serde_json::json!({"transcript_path": "/data/transcripts/f1.json"});
        let record = store
            .upsert_stage(
                "f1",
                &StageWrite {
                    stage: Stage::Asr,
                    expected_attempt: 1,
                    state: running.succeeded(Some(artifacts.clone()), Utc::now()),
                    run_tag: None,
                },
            )
            .unwrap();

        let done = record.stage(Stage::Asr);
        assert_eq!(done.status, StageStatus::Done);
        assert!(done.completed_at.is_some());
        assert_eq!(done.artifacts.as_ref(), Some(&artifacts));
        // run tag survives writes that do not carry one
        assert_eq!(record.run_tag.as_deref(), Some("20250101T000000Z"));
    }

    #[test]
    fn test_straggler_write_conflicts() {
        let store = SqliteStatusStore::in_memory().unwrap();
        store.register(new_file("f1")).unwrap();

        let first = claim(&store, "f1", Stage::Validate).stage(Stage::Validate).clone();
        // a reprocess re-claims while the first attempt is still out
        claim(&store, "f1", Stage::Validate);

        let err = store
            .upsert_stage(
                "f1",
                &StageWrite {
                    stage: Stage::Validate,
                    expected_attempt: first.attempt_count,
                    state: first.failed("late result"),
                    run_tag: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { expected: 1, found: 2, .. }));

        let record = store.get("f1").unwrap();
        assert_eq!(record.status(Stage::Validate), StageStatus::Running);
        assert_eq!(record.stage(Stage::Validate).attempt_count, 2);
    }

    #[test]
    fn test_last_update_refreshed() {
        let store = SqliteStatusStore::in_memory().unwrap();
        let (registered, _) = store.register(new_file("f1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let record = claim(&store, "f1", Stage::Asr);
        assert!(record.last_update > registered.last_update);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");

        {
            let store = SqliteStatusStore::new(&path).unwrap();
            store.register(new_file("f1")).unwrap();
            claim(&store, "f1", Stage::Asr);
        }

        let store = SqliteStatusStore::new(&path).unwrap();
        let record = store.get("f1").unwrap();
        assert_eq!(record.status(Stage::Asr), StageStatus::Running);
        assert_eq!(record.stage(Stage::Asr).attempt_count, 1);
    }
}
