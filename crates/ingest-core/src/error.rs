//! Subsystem error types. Each enum mirrors the style of the teacher's
//! `errors.rs`: one `thiserror` enum per subsystem, `#[source]`/`#[from]`
//! wiring actual causes, and a matching `#[cfg(test)]` block.

use ingest_common::{JobStatus, StateError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {job_id} not found")]
    NotFound { job_id: Uuid },

    #[error("no job found for kb {kb_id}")]
    NoJobForKb { kb_id: String },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("destructive cleanup failed for job {job_id}: {source}")]
    CleanupFailed {
        job_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("a job is already running for kb {kb_id}")]
    JobAlreadyRunning { kb_id: String },

    #[error("job for kb {kb_id} is not resumable from status {status}")]
    NotResumable { kb_id: String, status: JobStatus },

    #[error("no job found for kb {kb_id}")]
    NoJobForKb { kb_id: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("indexer readiness check failed: {0}")]
    Indexer(#[source] anyhow::Error),
}
