//! Job status state machine and the canonical phase enums.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StateError;

/// Lifecycle status of a job. See the allowed-transition table in
/// [`validate_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
    NotStarted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::NotStarted => "not_started",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "paused" => JobStatus::Paused,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "canceled" => JobStatus::Canceled,
            "not_started" => JobStatus::NotStarted,
            _ => return None,
        })
    }

    /// Completed, failed and canceled are terminal: no further pipeline
    /// activity occurs against a job in one of these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The allowed-transition table from the job status state machine. The
/// pipeline itself never requests `Paused` or `Canceled` — only the control
/// plane (the Ingestion Service and its callers) does. `Failed -> Running`
/// is the one transition out of a terminal state: it is how `resume` picks
/// a job back up after `recover_inflight_jobs` has moved it to `failed`.
pub fn get_allowed_transitions(current: JobStatus) -> &'static [JobStatus] {
    use JobStatus::*;
    match current {
        Pending => &[Running, Canceled],
        Running => &[Paused, Completed, Failed, Canceled],
        Paused => &[Running, Canceled],
        Failed => &[Running],
        Canceled => &[NotStarted],
        Completed | NotStarted => &[],
    }
}

pub fn validate_transition(current: JobStatus, target: JobStatus) -> bool {
    get_allowed_transitions(current).contains(&target)
}

pub fn transition_or_raise(current: JobStatus, target: JobStatus) -> Result<(), StateError> {
    if validate_transition(current, target) {
        Ok(())
    } else {
        Err(StateError::IllegalTransition { current, target })
    }
}

/// The four canonical pipeline phases, in the fixed order used for status
/// composition and checkpoint finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Loading,
    Chunking,
    Embedding,
    Indexing,
}

impl PhaseName {
    pub const CANONICAL_ORDER: [PhaseName; 4] = [
        PhaseName::Loading,
        PhaseName::Chunking,
        PhaseName::Embedding,
        PhaseName::Indexing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Loading => "loading",
            PhaseName::Chunking => "chunking",
            PhaseName::Embedding => "embedding",
            PhaseName::Indexing => "indexing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "loading" => PhaseName::Loading,
            "chunking" => PhaseName::Chunking,
            "embedding" => PhaseName::Embedding,
            "indexing" => PhaseName::Indexing,
            _ => return None,
        })
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single phase row. Distinct from [`JobStatus`]: a phase can be
/// `not_started` while the job itself is `running` (its predecessor phases
/// are still in flight).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    Running,
    Paused,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "not_started",
            PhaseStatus::Running => "running",
            PhaseStatus::Paused => "paused",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "not_started" => PhaseStatus::NotStarted,
            "running" => PhaseStatus::Running,
            "paused" => PhaseStatus::Paused,
            "completed" => PhaseStatus::Completed,
            "failed" => PhaseStatus::Failed,
            _ => return None,
        })
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
