//! Domain model shared by the job store, pipeline and status view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{JobStatus, PhaseName, PhaseStatus};

/// One run of the ingestion pipeline for one knowledge base. Owned by the
/// Job Store; created by the Ingestion Service; mutated only by the
/// Coordinator and by control operations (which touch only `status`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kb_id: String,
    pub source_type: String,
    pub source_config: serde_json::Value,
    pub status: JobStatus,
    pub checkpoint: serde_json::Value,
    pub counters: Counters,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Running totals maintained by the Coordinator across a job's lifetime.
/// Stored as an opaque JSON blob in the Job Store but kept as a concrete
/// struct everywhere else, since every field is named explicitly in the
/// data model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counters {
    pub docs_seen: u64,
    pub chunks_seen: u64,
    pub chunks_processed: u64,
    pub chunks_skipped: u64,
    pub chunks_error: u64,
}

impl Counters {
    /// True when loader exhaustion happened before any work was observed —
    /// the "empty source" fatal-failure condition.
    pub fn is_empty_run(&self) -> bool {
        self.docs_seen == 0 && self.chunks_seen == 0 && self.chunks_processed == 0
    }
}

/// One row per canonical phase per job, created lazily on first use.
/// Used only for progress display; a failure to write one is non-fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRow {
    pub job_id: Uuid,
    pub phase: PhaseName,
    pub status: PhaseStatus,
    pub progress_percent: u8,
    pub items_processed: u64,
    pub items_total: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PhaseRow {
    pub fn not_started(job_id: Uuid, phase: PhaseName) -> Self {
        PhaseRow {
            job_id,
            phase,
            status: PhaseStatus::NotStarted,
            progress_percent: 0,
            items_processed: 0,
            items_total: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

/// A unit of work produced from a document. `content_hash` identifies the
/// chunk across job runs: two chunks with equal hash are interchangeable
/// for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub content_hash: String,
    pub kb_id: String,
    pub doc_id: u32,
    pub url: Option<String>,
    pub section: Option<String>,
}

/// Produced by the Embedder, consumed by the Indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub content_hash: String,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// The unit the Loader yields. `metadata` carries `doc_id`/`url`/`kb_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
}

impl Document {
    pub fn doc_id(&self) -> Option<u32> {
        self.metadata.get("doc_id")?.as_u64().map(|v| v as u32)
    }

    pub fn url(&self) -> Option<&str> {
        self.metadata.get("url")?.as_str()
    }
}

/// Queue-like metrics derived from a job's counters for the composed status
/// view: how much work is pending, in flight, done, or errored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub chunks_pending: u64,
    pub chunks_processing: u64,
    pub chunks_done: u64,
    pub chunks_error: u64,
    pub chunks_queued: u64,
}

/// Per-phase detail surfaced in the composed status view, defaulted to
/// `not_started` for any of the four canonical phases missing a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDetail {
    pub phase: PhaseName,
    pub status: PhaseStatus,
    pub progress_percent: u8,
    pub items_processed: u64,
    pub items_total: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&PhaseRow> for PhaseDetail {
    fn from(row: &PhaseRow) -> Self {
        PhaseDetail {
            phase: row.phase,
            status: row.status,
            progress_percent: row.progress_percent,
            items_processed: row.items_processed,
            items_total: row.items_total,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error: row.error_message.clone(),
        }
    }
}

impl PhaseDetail {
    pub fn not_started(phase: PhaseName) -> Self {
        PhaseDetail {
            phase,
            status: PhaseStatus::NotStarted,
            progress_percent: 0,
            items_processed: 0,
            items_total: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Mirrors a job's current status/phase/progress/metrics to disk so a
/// status query can be answered even when the job is not resident in
/// memory (e.g. right after process start).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub kb_id: String,
    pub status: JobStatus,
    pub current_phase: PhaseName,
    pub overall_progress: u8,
    pub phase_details: Vec<PhaseDetail>,
    pub metrics: QueueMetrics,
    pub index_ready: bool,
    pub updated_at: DateTime<Utc>,
}
