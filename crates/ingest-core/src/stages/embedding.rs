//! Embedding+Indexing stage: the only stage that consults the Shutdown
//! Manager and the Job Gate, at chunk granularity, per §4.7 and the Open
//! Question resolution documented in DESIGN.md (chunk-boundary
//! cancellation is implemented, not just batch-boundary).

use async_trait::async_trait;
use ingest_common::PhaseName;
use std::sync::Arc;
use tracing::error;

use crate::chunk_processor::ChunkProcessor;
use crate::gate::JobGate;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::ports::Indexer;
use crate::shutdown::ShutdownManager;
use crate::store::SqliteJobStore;
use crate::util::log_and_swallow;

pub struct EmbeddingIndexingStage {
    store: Arc<SqliteJobStore>,
    gate: Arc<JobGate>,
    shutdown: ShutdownManager,
    processor: ChunkProcessor,
    indexer: Arc<dyn Indexer>,
}

impl EmbeddingIndexingStage {
    pub fn new(
        store: Arc<SqliteJobStore>,
        gate: Arc<JobGate>,
        shutdown: ShutdownManager,
        processor: ChunkProcessor,
        indexer: Arc<dyn Indexer>,
    ) -> Self {
        EmbeddingIndexingStage {
            store,
            gate,
            shutdown,
            processor,
            indexer,
        }
    }

    fn start_phase_once(&self, context: &mut PipelineContext, phase: PhaseName) {
        if !context.has_started(phase) {
            log_and_swallow(
                "phase start",
                self.store.start_phase(context.job_id, phase),
            );
            context.mark_started(phase);
        }
    }

    fn update_progress(&self, context: &PipelineContext, phase: PhaseName) {
        log_and_swallow(
            "phase progress update",
            self.store.update_progress(
                context.job_id,
                phase,
                context.counters.chunks_processed,
                None,
            ),
        );
    }
}

#[async_trait]
impl PipelineStage for EmbeddingIndexingStage {
    fn name(&self) -> &'static str {
        "embedding_indexing"
    }

    async fn execute(&self, context: &mut PipelineContext) -> anyhow::Result<()> {
        let chunks = context
            .results
            .chunks
            .take()
            .ok_or_else(|| anyhow::anyhow!("embedding stage requires chunks in pipeline results"))?;

        self.start_phase_once(context, PhaseName::Embedding);
        self.start_phase_once(context, PhaseName::Indexing);

        let batch_id = context.results.batch_id;
        let job_id_str = context.job_id.to_string();

        for (chunk_idx, chunk) in chunks.iter().enumerate() {
            if self.shutdown.is_shutdown_requested(&job_id_str) {
                tracing::warn!(job_id = %job_id_str, batch_id, chunk_idx, "shutdown requested, pausing job at chunk boundary");
                context.rewind_to_before(batch_id);
                log_and_swallow(
                    "set job status paused",
                    self.store
                        .set_job_status(context.job_id, ingest_common::JobStatus::Paused, None, None),
                );
                log_and_swallow(
                    "persist checkpoint on pause",
                    self.store.update_job(
                        context.job_id,
                        Some(&context.checkpoint),
                        Some(&context.counters),
                    ),
                );
                context.results.continue_pipeline = false;
                return Ok(());
            }

            let proceed = self
                .gate
                .check(context.job_id, &context.kb_id, self.indexer.as_ref())
                .await?;
            if !proceed {
                context.rewind_to_before(batch_id);
                log_and_swallow(
                    "persist checkpoint on gate stop",
                    self.store.update_job(
                        context.job_id,
                        Some(&context.checkpoint),
                        Some(&context.counters),
                    ),
                );
                context.results.continue_pipeline = false;
                return Ok(());
            }

            let outcome = self.processor.process(&context.kb_id, chunk).await;
            if outcome.skipped {
                context.counters.chunks_skipped += 1;
            } else if outcome.success {
                context.counters.chunks_processed += 1;
            } else {
                context.counters.chunks_error += 1;
                error!(
                    content_hash = %chunk.content_hash,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "chunk processing failed permanently"
                );
            }

            self.update_progress(context, PhaseName::Embedding);
            self.update_progress(context, PhaseName::Indexing);
        }

        context.results.continue_pipeline = true;
        Ok(())
    }
}
