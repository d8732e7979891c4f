//! `PipelineContext`: the shared, per-run state each stage mutates. Stages
//! must be idempotent at the batch boundary — safe to re-execute after a
//! crash if the checkpoint did not advance.

use std::collections::HashMap;
use std::path::PathBuf;

use ingest_common::{Chunk, Counters, Document, PhaseName};
use uuid::Uuid;

/// Transient, per-batch working state. Reset implicitly by the Coordinator
/// assigning a fresh batch each loop iteration.
#[derive(Default)]
pub struct StageResults {
    pub batch: Option<Vec<Document>>,
    pub batch_id: i64,
    pub chunks: Option<Vec<Chunk>>,
    /// Set to `false` by a stage to tell the Coordinator to stop after this
    /// iteration without running the remaining stages.
    pub continue_pipeline: bool,
}

pub struct PipelineContext {
    pub kb_id: String,
    pub job_id: Uuid,
    pub content_root: PathBuf,
    pub checkpoint: serde_json::Value,
    pub counters: Counters,
    pub results: StageResults,
    pub phases_started: HashMap<PhaseName, bool>,
}

impl PipelineContext {
    pub fn new(
        kb_id: String,
        job_id: Uuid,
        content_root: PathBuf,
        checkpoint: serde_json::Value,
        counters: Counters,
    ) -> Self {
        PipelineContext {
            kb_id,
            job_id,
            content_root,
            checkpoint,
            counters,
            results: StageResults {
                continue_pipeline: true,
                ..Default::default()
            },
            phases_started: HashMap::new(),
        }
    }

    pub fn last_batch_id(&self) -> i64 {
        self.checkpoint
            .get("last_batch_id")
            .and_then(|v| v.as_i64())
            .unwrap_or(-1)
    }

    pub fn set_last_batch_id(&mut self, batch_id: i64) {
        self.checkpoint["last_batch_id"] = serde_json::json!(batch_id);
    }

    /// Rewind to `batch_id - 1` so the current batch is re-processed on
    /// resume, per the pause/gate-denial chunk-level control flow.
    pub fn rewind_to_before(&mut self, batch_id: i64) {
        self.set_last_batch_id(batch_id - 1);
    }

    pub fn has_started(&self, phase: PhaseName) -> bool {
        self.phases_started.get(&phase).copied().unwrap_or(false)
    }

    pub fn mark_started(&mut self, phase: PhaseName) {
        self.phases_started.insert(phase, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PipelineContext {
        PipelineContext::new(
            "kb-1".into(),
            Uuid::new_v4(),
            PathBuf::from("/tmp/kb"),
            serde_json::json!({}),
            Counters::default(),
        )
    }

    #[test]
    fn last_batch_id_defaults_to_minus_one() {
        assert_eq!(ctx().last_batch_id(), -1);
    }

    #[test]
    fn set_and_read_last_batch_id() {
        let mut c = ctx();
        c.set_last_batch_id(3);
        assert_eq!(c.last_batch_id(), 3);
    }

    #[test]
    fn rewind_to_before_subtracts_one() {
        let mut c = ctx();
        c.rewind_to_before(5);
        assert_eq!(c.last_batch_id(), 4);
    }

    #[test]
    fn phase_started_tracking() {
        let mut c = ctx();
        assert!(!c.has_started(PhaseName::Chunking));
        c.mark_started(PhaseName::Chunking);
        assert!(c.has_started(PhaseName::Chunking));
    }
}
