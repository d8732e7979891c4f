//! Loading stage: persists the current batch to disk and advances
//! `docs_seen`.

use async_trait::async_trait;
use ingest_common::PhaseName;
use std::sync::Arc;

use crate::pipeline::{PipelineContext, PipelineStage};
use crate::store::SqliteJobStore;
use crate::storage::save_documents_to_disk;
use crate::util::log_and_swallow;

pub struct LoadingStage {
    store: Arc<SqliteJobStore>,
}

impl LoadingStage {
    pub fn new(store: Arc<SqliteJobStore>) -> Self {
        LoadingStage { store }
    }
}

#[async_trait]
impl PipelineStage for LoadingStage {
    fn name(&self) -> &'static str {
        "loading"
    }

    async fn execute(&self, context: &mut PipelineContext) -> anyhow::Result<()> {
        let batch = context
            .results
            .batch
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("loading stage requires a batch in pipeline results"))?;

        save_documents_to_disk(&context.content_root, &context.kb_id, batch).await?;
        context.counters.docs_seen += batch.len() as u64;

        if !context.has_started(PhaseName::Loading) {
            log_and_swallow(
                "loading phase start",
                self.store.start_phase(context.job_id, PhaseName::Loading),
            );
            context.mark_started(PhaseName::Loading);
        }

        log_and_swallow(
            "loading phase progress update",
            self.store.update_progress(
                context.job_id,
                PhaseName::Loading,
                context.counters.docs_seen,
                None,
            ),
        );

        Ok(())
    }
}
