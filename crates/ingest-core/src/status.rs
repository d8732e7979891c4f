//! Composed status view, per §4.11. A pure function over already-fetched
//! inputs so it is unit-testable without a database, grounded on
//! `status_query_service.py::get_status`'s priority chain.

use ingest_common::{Counters, JobStatus, PhaseDetail, PhaseName, PhaseStatus, QueueMetrics};
use serde::Serialize;

pub fn queue_metrics(counters: &Counters) -> QueueMetrics {
    QueueMetrics {
        chunks_pending: counters.chunks_seen.saturating_sub(
            counters.chunks_processed + counters.chunks_skipped + counters.chunks_error,
        ),
        chunks_processing: 0,
        chunks_done: counters.chunks_processed + counters.chunks_skipped,
        chunks_error: counters.chunks_error,
        chunks_queued: counters.chunks_seen,
    }
}

/// Fill in `not_started` defaults for any of the four canonical phases
/// missing a row, preserving canonical order.
pub fn with_defaults(phase_details: &[PhaseDetail]) -> Vec<PhaseDetail> {
    PhaseName::CANONICAL_ORDER
        .iter()
        .map(|phase| {
            phase_details
                .iter()
                .find(|d| d.phase == *phase)
                .cloned()
                .unwrap_or_else(|| PhaseDetail::not_started(*phase))
        })
        .collect()
}

/// Priority order: `completed` > `failed` > `paused` > `running` > `pending`.
pub fn derive_status(phase_details: &[PhaseDetail], index_ready: bool) -> JobStatus {
    if index_ready || phase_details.iter().all(|d| d.status == PhaseStatus::Completed) {
        return JobStatus::Completed;
    }
    if phase_details.iter().any(|d| d.status == PhaseStatus::Failed) {
        return JobStatus::Failed;
    }
    if phase_details.iter().any(|d| d.status == PhaseStatus::Paused) {
        return JobStatus::Paused;
    }
    if phase_details.iter().any(|d| d.status == PhaseStatus::Running) {
        return JobStatus::Running;
    }
    JobStatus::Pending
}

/// First non-completed canonical phase, falling back to `indexing`.
pub fn derive_current_phase(phase_details: &[PhaseDetail]) -> PhaseName {
    phase_details
        .iter()
        .find(|d| d.status != PhaseStatus::Completed)
        .map(|d| d.phase)
        .unwrap_or(PhaseName::Indexing)
}

/// Average of per-phase progress percents, or 100 when the derived status
/// is `completed`.
pub fn derive_overall_progress(phase_details: &[PhaseDetail], status: JobStatus) -> u8 {
    if status == JobStatus::Completed {
        return 100;
    }
    if phase_details.is_empty() {
        return 0;
    }
    let sum: u32 = phase_details.iter().map(|d| d.progress_percent as u32).sum();
    (sum / phase_details.len() as u32) as u8
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposedStatus {
    pub status: JobStatus,
    pub current_phase: PhaseName,
    pub overall_progress: u8,
    pub phase_details: Vec<PhaseDetail>,
    pub metrics: QueueMetrics,
    pub index_ready: bool,
}

pub fn compose(
    counters: &Counters,
    raw_phase_details: &[PhaseDetail],
    index_ready: bool,
) -> ComposedStatus {
    let phase_details = with_defaults(raw_phase_details);
    let status = derive_status(&phase_details, index_ready);
    let current_phase = derive_current_phase(&phase_details);
    let overall_progress = derive_overall_progress(&phase_details, status);
    ComposedStatus {
        status,
        current_phase,
        overall_progress,
        phase_details,
        metrics: queue_metrics(counters),
        index_ready,
    }
}
