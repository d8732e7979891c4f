//! Durable, synchronous SQLite-backed Job Store. Phase-row mutations are
//! best-effort from the caller's point of view (see `log_and_swallow` in
//! `util.rs`); the store itself always reports failures honestly.

use chrono::{DateTime, Utc};
use ingest_common::{Counters, Job, JobStatus, PhaseName, PhaseRow, PhaseStatus};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;

/// `rusqlite::Connection` is `Send` but not `Sync`; the Mutex is what makes
/// `Arc<SqliteJobStore>` itself `Sync` (and so `Send`) so it can be held
/// across `.await` points by the coordinator task `tokio::spawn` runs, the
/// same reason the teacher's `FactoryDb` is always passed around as
/// `Arc<std::sync::Mutex<FactoryDb>>`.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = SqliteJobStore { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteJobStore { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.lock().unwrap().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kb_id TEXT NOT NULL,
                source_type TEXT NOT NULL,
                source_config TEXT NOT NULL,
                status TEXT NOT NULL,
                checkpoint TEXT NOT NULL,
                counters TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                heartbeat_at TEXT NOT NULL,
                finished_at TEXT,
                last_error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_kb_id ON jobs(kb_id);

            CREATE TABLE IF NOT EXISTS phase_rows (
                job_id TEXT NOT NULL,
                phase_name TEXT NOT NULL,
                status TEXT NOT NULL,
                progress_percent INTEGER NOT NULL,
                items_processed INTEGER NOT NULL,
                items_total INTEGER,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                UNIQUE(job_id, phase_name)
            );
            CREATE INDEX IF NOT EXISTS idx_phase_rows_job_id ON phase_rows(job_id);
            ",
        )?;
        Ok(())
    }

    pub fn create_job(
        &self,
        kb_id: &str,
        source_type: &str,
        source_config: serde_json::Value,
        priority: i32,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conn.lock().unwrap().execute(
            "INSERT INTO jobs (id, kb_id, source_type, source_config, status, checkpoint, counters, priority, created_at, updated_at, heartbeat_at, finished_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9, NULL, NULL)",
            params![
                id.to_string(),
                kb_id,
                source_type,
                source_config.to_string(),
                JobStatus::Pending.as_str(),
                serde_json::json!({}).to_string(),
                serde_json::to_string(&Counters::default())?,
                priority,
                now.to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    pub fn get_job(&self, job_id: Uuid) -> Result<Job, StoreError> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT id, kb_id, source_type, source_config, status, checkpoint, counters, priority, created_at, updated_at, heartbeat_at, finished_at, last_error
                 FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                JobRow::from_row,
            )
            .optional()?
            .map(JobRow::into_job)
            .transpose()?
            .ok_or(StoreError::NotFound { job_id })
    }

    pub fn get_latest_job(&self, kb_id: &str) -> Result<Option<Job>, StoreError> {
        let row = self
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT id, kb_id, source_type, source_config, status, checkpoint, counters, priority, created_at, updated_at, heartbeat_at, finished_at, last_error
                 FROM jobs WHERE kb_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![kb_id],
                JobRow::from_row,
            )
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    pub fn set_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        finished_at: Option<DateTime<Utc>>,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.lock().unwrap().execute(
            "UPDATE jobs SET status = ?1,
                finished_at = COALESCE(?2, finished_at),
                last_error = COALESCE(?3, last_error),
                updated_at = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                finished_at.map(|t| t.to_rfc3339()),
                last_error,
                Utc::now().to_rfc3339(),
                job_id.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn update_job(
        &self,
        job_id: Uuid,
        checkpoint: Option<&serde_json::Value>,
        counters: Option<&Counters>,
    ) -> Result<(), StoreError> {
        if let Some(checkpoint) = checkpoint {
            self.conn.lock().unwrap().execute(
                "UPDATE jobs SET checkpoint = ?1, updated_at = ?2 WHERE id = ?3",
                params![checkpoint.to_string(), Utc::now().to_rfc3339(), job_id.to_string()],
            )?;
        }
        if let Some(counters) = counters {
            self.conn.lock().unwrap().execute(
                "UPDATE jobs SET counters = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    serde_json::to_string(counters)?,
                    Utc::now().to_rfc3339(),
                    job_id.to_string()
                ],
            )?;
        }
        Ok(())
    }

    pub fn update_heartbeat(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.conn.lock().unwrap().execute(
            "UPDATE jobs SET heartbeat_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), job_id.to_string()],
        )?;
        Ok(())
    }

    pub fn get_job_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError> {
        let status: String = self
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT status FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound { job_id })?;
        Ok(JobStatus::from_str(&status).unwrap_or(JobStatus::Failed))
    }

    /// On boot: any job left `running` is moved to `failed`, recording
    /// abnormal termination. Returns the affected job ids.
    pub fn recover_inflight_jobs(&self) -> Result<Vec<Uuid>, StoreError> {
        let ids = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT id FROM jobs WHERE status = ?1")?;
            let ids: Vec<Uuid> = stmt
                .query_map(params![JobStatus::Running.as_str()], |row| {
                    let s: String = row.get(0)?;
                    Ok(s)
                })?
                .filter_map(|r| r.ok())
                .filter_map(|s| Uuid::parse_str(&s).ok())
                .collect();
            ids
        };
        for id in &ids {
            self.set_job_status(
                *id,
                JobStatus::Failed,
                Some(Utc::now()),
                Some("abnormal termination: process restarted while job was running"),
            )?;
        }
        Ok(ids)
    }

    /// Called by the Shutdown Manager's signal handlers: every currently
    /// running job is marked `paused` so a subsequent restart resumes
    /// cleanly instead of being treated as a crash.
    pub fn mark_all_running_paused(&self) -> Result<Vec<Uuid>, StoreError> {
        let ids = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT id FROM jobs WHERE status = ?1")?;
            let ids: Vec<Uuid> = stmt
                .query_map(params![JobStatus::Running.as_str()], |row| {
                    let s: String = row.get(0)?;
                    Ok(s)
                })?
                .filter_map(|r| r.ok())
                .filter_map(|s| Uuid::parse_str(&s).ok())
                .collect();
            ids
        };
        for id in &ids {
            self.set_job_status(*id, JobStatus::Paused, None, None)?;
        }
        Ok(ids)
    }

    // -- phase rows -------------------------------------------------------

    pub fn start_phase(&self, job_id: Uuid, phase: PhaseName) -> Result<(), StoreError> {
        self.upsert_phase(job_id, phase, PhaseStatus::Running, |row| {
            row.started_at.get_or_insert_with(Utc::now);
        })
    }

    pub fn complete_phase(&self, job_id: Uuid, phase: PhaseName) -> Result<(), StoreError> {
        self.upsert_phase(job_id, phase, PhaseStatus::Completed, |row| {
            row.progress_percent = 100;
            row.completed_at = Some(Utc::now());
        })
    }

    pub fn fail_phase(
        &self,
        job_id: Uuid,
        phase: PhaseName,
        error_message: &str,
    ) -> Result<(), StoreError> {
        let msg = error_message.to_string();
        self.upsert_phase(job_id, phase, PhaseStatus::Failed, move |row| {
            row.error_message = Some(msg.clone());
            row.completed_at = Some(Utc::now());
        })
    }

    pub fn update_progress(
        &self,
        job_id: Uuid,
        phase: PhaseName,
        items_processed: u64,
        items_total: Option<u64>,
    ) -> Result<(), StoreError> {
        let existing_status = self.get_phase_row(job_id, phase)?.map(|r| r.status);
        self.upsert_phase(
            job_id,
            phase,
            existing_status.unwrap_or(PhaseStatus::Running),
            move |row| {
                row.items_processed = items_processed;
                row.items_total = items_total;
                if let Some(total) = items_total {
                    if total > 0 {
                        row.progress_percent = ((items_processed.min(total) * 100) / total) as u8;
                    }
                }
            },
        )
    }

    fn get_phase_row(&self, job_id: Uuid, phase: PhaseName) -> Result<Option<PhaseRow>, StoreError> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT job_id, phase_name, status, progress_percent, items_processed, items_total, started_at, completed_at, error_message
                 FROM phase_rows WHERE job_id = ?1 AND phase_name = ?2",
                params![job_id.to_string(), phase.as_str()],
                PhaseRowRecord::from_row,
            )
            .optional()?
            .map(PhaseRowRecord::into_phase_row)
            .transpose()
    }

    pub fn get_all_phase_statuses(&self, job_id: Uuid) -> Result<Vec<PhaseRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_id, phase_name, status, progress_percent, items_processed, items_total, started_at, completed_at, error_message
             FROM phase_rows WHERE job_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![job_id.to_string()], PhaseRowRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(PhaseRowRecord::into_phase_row).collect()
    }

    fn upsert_phase(
        &self,
        job_id: Uuid,
        phase: PhaseName,
        status: PhaseStatus,
        mutate: impl FnOnce(&mut PhaseRow),
    ) -> Result<(), StoreError> {
        let mut row = self
            .get_phase_row(job_id, phase)?
            .unwrap_or_else(|| PhaseRow::not_started(job_id, phase));
        row.status = status;
        mutate(&mut row);

        self.conn.lock().unwrap().execute(
            "INSERT INTO phase_rows (job_id, phase_name, status, progress_percent, items_processed, items_total, started_at, completed_at, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(job_id, phase_name) DO UPDATE SET
                status = excluded.status,
                progress_percent = excluded.progress_percent,
                items_processed = excluded.items_processed,
                items_total = excluded.items_total,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                error_message = excluded.error_message",
            params![
                job_id.to_string(),
                phase.as_str(),
                row.status.as_str(),
                row.progress_percent as i64,
                row.items_processed as i64,
                row.items_total.map(|v| v as i64),
                row.started_at.map(|t| t.to_rfc3339()),
                row.completed_at.map(|t| t.to_rfc3339()),
                row.error_message,
            ],
        )?;
        Ok(())
    }
}

struct JobRow {
    id: String,
    kb_id: String,
    source_type: String,
    source_config: String,
    status: String,
    checkpoint: String,
    counters: String,
    priority: i32,
    created_at: String,
    updated_at: String,
    heartbeat_at: String,
    finished_at: Option<String>,
    last_error: Option<String>,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(JobRow {
            id: row.get(0)?,
            kb_id: row.get(1)?,
            source_type: row.get(2)?,
            source_config: row.get(3)?,
            status: row.get(4)?,
            checkpoint: row.get(5)?,
            counters: row.get(6)?,
            priority: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            heartbeat_at: row.get(10)?,
            finished_at: row.get(11)?,
            last_error: row.get(12)?,
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        Ok(Job {
            id: Uuid::parse_str(&self.id).unwrap_or_else(|e| {
                tracing::error!(error = %e, raw = %self.id, "stored job id is not a valid uuid");
                Uuid::nil()
            }),
            kb_id: self.kb_id,
            source_type: self.source_type,
            source_config: serde_json::from_str(&self.source_config)?,
            status: JobStatus::from_str(&self.status).unwrap_or(JobStatus::Failed),
            checkpoint: serde_json::from_str(&self.checkpoint)?,
            counters: serde_json::from_str(&self.counters)?,
            priority: self.priority,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            heartbeat_at: parse_ts(&self.heartbeat_at),
            finished_at: self.finished_at.as_deref().map(parse_ts),
            last_error: self.last_error,
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

struct PhaseRowRecord {
    job_id: String,
    phase_name: String,
    status: String,
    progress_percent: i64,
    items_processed: i64,
    items_total: Option<i64>,
    started_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
}

impl PhaseRowRecord {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(PhaseRowRecord {
            job_id: row.get(0)?,
            phase_name: row.get(1)?,
            status: row.get(2)?,
            progress_percent: row.get(3)?,
            items_processed: row.get(4)?,
            items_total: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
            error_message: row.get(8)?,
        })
    }

    fn into_phase_row(self) -> Result<PhaseRow, StoreError> {
        Ok(PhaseRow {
            job_id: Uuid::parse_str(&self.job_id).unwrap_or_default(),
            phase: PhaseName::from_str(&self.phase_name).unwrap_or(PhaseName::Loading),
            status: PhaseStatus::from_str(&self.status).unwrap_or(PhaseStatus::NotStarted),
            progress_percent: self.progress_percent as u8,
            items_processed: self.items_processed as u64,
            items_total: self.items_total.map(|v| v as u64),
            started_at: self.started_at.as_deref().map(parse_ts),
            completed_at: self.completed_at.as_deref().map(parse_ts),
            error_message: self.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteJobStore {
        SqliteJobStore::new_in_memory().unwrap()
    }

    #[test]
    fn init_creates_tables_and_indexes() {
        let store = store();
        let count: i64 = store
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type IN ('table','index') AND name NOT LIKE 'sqlite_%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(count >= 4);
    }

    #[test]
    fn create_and_fetch_job() {
        let store = store();
        let id = store
            .create_job("kb-1", "website", serde_json::json!({"url": "x"}), 0)
            .unwrap();
        let job = store.get_job(id).unwrap();
        assert_eq!(job.kb_id, "kb-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.counters, Counters::default());
    }

    #[test]
    fn get_latest_job_returns_most_recent_for_kb() {
        let store = store();
        store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        let second = store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        let latest = store.get_latest_job("kb-1").unwrap().unwrap();
        assert_eq!(latest.id, second);
    }

    #[test]
    fn get_latest_job_none_for_unknown_kb() {
        let store = store();
        assert!(store.get_latest_job("no-such-kb").unwrap().is_none());
    }

    #[test]
    fn set_job_status_updates_status_and_error() {
        let store = store();
        let id = store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        store
            .set_job_status(id, JobStatus::Failed, Some(Utc::now()), Some("boom"))
            .unwrap();
        let job = store.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn update_job_persists_checkpoint_and_counters() {
        let store = store();
        let id = store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        let counters = Counters {
            docs_seen: 4,
            ..Default::default()
        };
        store
            .update_job(id, Some(&serde_json::json!({"last_batch_id": 1})), Some(&counters))
            .unwrap();
        let job = store.get_job(id).unwrap();
        assert_eq!(job.checkpoint["last_batch_id"], 1);
        assert_eq!(job.counters.docs_seen, 4);
    }

    #[test]
    fn recover_inflight_jobs_moves_running_to_failed() {
        let store = store();
        let id = store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        store.set_job_status(id, JobStatus::Running, None, None).unwrap();
        let recovered = store.recover_inflight_jobs().unwrap();
        assert_eq!(recovered, vec![id]);
        assert_eq!(store.get_job_status(id).unwrap(), JobStatus::Failed);
    }

    #[test]
    fn mark_all_running_paused_only_touches_running_jobs() {
        let store = store();
        let running = store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        let pending = store.create_job("kb-2", "website", serde_json::json!({}), 0).unwrap();
        store.set_job_status(running, JobStatus::Running, None, None).unwrap();
        store.mark_all_running_paused().unwrap();
        assert_eq!(store.get_job_status(running).unwrap(), JobStatus::Paused);
        assert_eq!(store.get_job_status(pending).unwrap(), JobStatus::Pending);
    }

    #[test]
    fn phase_lifecycle_start_progress_complete() {
        let store = store();
        let id = store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        store.start_phase(id, PhaseName::Loading).unwrap();
        store.update_progress(id, PhaseName::Loading, 2, Some(4)).unwrap();
        let row = store.get_phase_row(id, PhaseName::Loading).unwrap().unwrap();
        assert_eq!(row.status, PhaseStatus::Running);
        assert_eq!(row.progress_percent, 50);

        store.complete_phase(id, PhaseName::Loading).unwrap();
        let row = store.get_phase_row(id, PhaseName::Loading).unwrap().unwrap();
        assert_eq!(row.status, PhaseStatus::Completed);
        assert_eq!(row.progress_percent, 100);
    }

    #[test]
    fn fail_phase_records_error_message() {
        let store = store();
        let id = store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        store.fail_phase(id, PhaseName::Loading, "no documents").unwrap();
        let row = store.get_phase_row(id, PhaseName::Loading).unwrap().unwrap();
        assert_eq!(row.status, PhaseStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some("no documents"));
    }

    #[test]
    fn get_all_phase_statuses_returns_only_rows_created() {
        let store = store();
        let id = store.create_job("kb-1", "website", serde_json::json!({}), 0).unwrap();
        store.start_phase(id, PhaseName::Loading).unwrap();
        store.start_phase(id, PhaseName::Chunking).unwrap();
        let rows = store.get_all_phase_statuses(id).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
