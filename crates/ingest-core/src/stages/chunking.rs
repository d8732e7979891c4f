//! Chunking stage: turns the batch into chunks and starts the `chunking`
//! phase row on first invocation for the job.

use async_trait::async_trait;
use ingest_common::PhaseName;
use std::sync::Arc;

use crate::pipeline::{PipelineContext, PipelineStage};
use crate::ports::Chunker;
use crate::store::SqliteJobStore;
use crate::util::log_and_swallow;

pub struct ChunkingStage {
    store: Arc<SqliteJobStore>,
    chunker: Arc<dyn Chunker>,
}

impl ChunkingStage {
    pub fn new(store: Arc<SqliteJobStore>, chunker: Arc<dyn Chunker>) -> Self {
        ChunkingStage { store, chunker }
    }
}

#[async_trait]
impl PipelineStage for ChunkingStage {
    fn name(&self) -> &'static str {
        "chunking"
    }

    async fn execute(&self, context: &mut PipelineContext) -> anyhow::Result<()> {
        let batch = context
            .results
            .batch
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("chunking stage requires a batch in pipeline results"))?;

        let chunks = self.chunker.chunk(&context.kb_id, batch).await?;
        context.counters.chunks_seen += chunks.len() as u64;

        if !context.has_started(PhaseName::Chunking) {
            log_and_swallow(
                "chunking phase start",
                self.store.start_phase(context.job_id, PhaseName::Chunking),
            );
            context.mark_started(PhaseName::Chunking);
        }

        log_and_swallow(
            "chunking phase progress update",
            self.store.update_progress(
                context.job_id,
                PhaseName::Chunking,
                context.counters.chunks_seen,
                None,
            ),
        );

        context.results.chunks = Some(chunks);
        Ok(())
    }
}
