//! Pipeline Coordinator: the batch loop that drives one job's run end to
//! end, per §4.8. One instance per active job, owned for the lifetime of
//! the `tokio` task the Ingestion Service spawns for it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use ingest_common::{JobStatus, PersistedSnapshot, PhaseDetail, PhaseName};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gate::JobGate;
use crate::pipeline::{PipelineContext, PipelineStage, StageResults};
use crate::ports::{Indexer, Loader};
use crate::shutdown::ShutdownManager;
use crate::stages::{ChunkingStage, EmbeddingIndexingStage, LoadingStage};
use crate::store::SqliteJobStore;

pub struct PipelineCoordinator {
    store: Arc<SqliteJobStore>,
    shutdown: ShutdownManager,
    gate: Arc<JobGate>,
    loader: Box<dyn Loader>,
    loading_stage: LoadingStage,
    chunking_stage: ChunkingStage,
    embedding_stage: EmbeddingIndexingStage,
    indexer: Arc<dyn Indexer>,
    job_id: Uuid,
    kb_id: String,
    content_root: PathBuf,
}

impl PipelineCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SqliteJobStore>,
        shutdown: ShutdownManager,
        gate: Arc<JobGate>,
        loader: Box<dyn Loader>,
        loading_stage: LoadingStage,
        chunking_stage: ChunkingStage,
        embedding_stage: EmbeddingIndexingStage,
        indexer: Arc<dyn Indexer>,
        job_id: Uuid,
        kb_id: String,
        content_root: PathBuf,
    ) -> Self {
        PipelineCoordinator {
            store,
            shutdown,
            gate,
            loader,
            loading_stage,
            chunking_stage,
            embedding_stage,
            indexer,
            job_id,
            kb_id,
            content_root,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let job_id_str = self.job_id.to_string();
        self.shutdown.register_job(&job_id_str);
        let result = self.run_inner(&job_id_str).await;
        self.shutdown.unregister_job(&job_id_str);
        result
    }

    async fn run_inner(&mut self, job_id_str: &str) -> anyhow::Result<()> {
        let job = self.store.get_job(self.job_id)?;
        let mut context = PipelineContext::new(
            self.kb_id.clone(),
            self.job_id,
            self.content_root.clone(),
            job.checkpoint,
            job.counters,
        );

        loop {
            if self.shutdown.is_shutdown_requested(job_id_str) {
                info!(job_id = %self.job_id, "graceful shutdown requested, pausing at batch boundary");
                self.store
                    .set_job_status(self.job_id, JobStatus::Paused, None, None)?;
                self.store
                    .update_job(self.job_id, Some(&context.checkpoint), Some(&context.counters))?;
                self.persist_snapshot(&context, JobStatus::Paused).await;
                return Ok(());
            }

            if !self
                .gate
                .check(self.job_id, &self.kb_id, self.indexer.as_ref())
                .await?
            {
                return Ok(());
            }

            let next_batch_id = context.last_batch_id() + 1;
            let Some(batch) = self.loader.next_batch().await? else {
                self.finalize(&context).await?;
                return Ok(());
            };

            context.results = StageResults {
                batch: Some(batch),
                batch_id: next_batch_id,
                chunks: None,
                continue_pipeline: true,
            };

            self.loading_stage.execute(&mut context).await?;
            self.chunking_stage.execute(&mut context).await?;
            self.embedding_stage.execute(&mut context).await?;

            if !context.results.continue_pipeline {
                return Ok(());
            }

            self.indexer.persist().await?;
            context.set_last_batch_id(next_batch_id);
            self.store
                .update_job(self.job_id, Some(&context.checkpoint), Some(&context.counters))?;
            self.store.update_heartbeat(self.job_id)?;
        }
    }

    /// Loader exhaustion: fail on the empty-source edge case, otherwise
    /// complete loading plus every phase that was actually started.
    async fn finalize(&self, context: &PipelineContext) -> anyhow::Result<()> {
        if context.counters.is_empty_run() {
            self.store
                .fail_phase(self.job_id, PhaseName::Loading, "no documents found for source")?;
            self.store.set_job_status(
                self.job_id,
                JobStatus::Failed,
                Some(Utc::now()),
                Some("empty source: no documents were loaded"),
            )?;
            self.persist_snapshot(context, JobStatus::Failed).await;
            return Ok(());
        }

        for phase in PhaseName::CANONICAL_ORDER {
            if phase == PhaseName::Loading || context.has_started(phase) {
                self.store.complete_phase(self.job_id, phase)?;
            }
        }
        self.store
            .set_job_status(self.job_id, JobStatus::Completed, Some(Utc::now()), None)?;
        self.persist_snapshot(context, JobStatus::Completed).await;
        Ok(())
    }

    /// Writes the Persisted State Snapshot for this job's knowledge base.
    /// Best-effort: a write failure is logged, not propagated, the same as
    /// the phase-row mutations in `util::log_and_swallow`.
    async fn persist_snapshot(&self, context: &PipelineContext, status: JobStatus) {
        let result = async {
            let phase_rows = self.store.get_all_phase_statuses(self.job_id)?;
            let raw_details: Vec<PhaseDetail> = phase_rows.iter().map(PhaseDetail::from).collect();
            let phase_details = crate::status::with_defaults(&raw_details);
            let overall_progress = crate::status::derive_overall_progress(&phase_details, status);
            let index_ready = self.indexer.is_ready(&self.kb_id).await.unwrap_or(false);

            let snapshot = PersistedSnapshot {
                kb_id: self.kb_id.clone(),
                status,
                current_phase: crate::status::derive_current_phase(&phase_details),
                overall_progress,
                phase_details,
                metrics: crate::status::queue_metrics(&context.counters),
                index_ready,
                updated_at: Utc::now(),
            };
            crate::storage::write_snapshot(&self.content_root, &snapshot).await
        }
        .await;

        if let Err(err) = result {
            warn!(job_id = %self.job_id, error = %err, "failed to persist status snapshot, continuing without it");
        }
    }
}
