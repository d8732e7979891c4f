//! Ingestion Service: the public control-plane API (§4.9), grounded on the
//! teacher's `PipelineRunner` task-handle registry in `factory/pipeline.rs`.
//! Exactly one live coordinator task per `kb_id` is enforced by the
//! `tasks` map.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ingest_common::{transition_or_raise, JobStatus, PhaseDetail};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::coordinator::PipelineCoordinator;
use crate::error::ServiceError;
use crate::gate::JobGate;
use crate::ports::{Chunker, Embedder, Indexer, Loader};
use crate::shutdown::ShutdownManager;
use crate::stages::{ChunkingStage, EmbeddingIndexingStage, LoadingStage};
use crate::status::{self, ComposedStatus};
use crate::store::SqliteJobStore;

/// Per-job collaborators the caller assembles from `source_type`; the
/// service itself is source-agnostic.
pub struct JobInputs {
    pub content_root: PathBuf,
    pub loader: Box<dyn Loader>,
    pub chunker: Arc<dyn Chunker>,
    pub embedder: Arc<dyn Embedder>,
}

pub struct IngestionService {
    store: Arc<SqliteJobStore>,
    shutdown: ShutdownManager,
    gate: Arc<JobGate>,
    indexer: Arc<dyn Indexer>,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl IngestionService {
    pub fn new(store: Arc<SqliteJobStore>, indexer: Arc<dyn Indexer>) -> Self {
        let gate = Arc::new(JobGate::new(store.clone()));
        IngestionService {
            store,
            shutdown: ShutdownManager::new(),
            gate,
            indexer,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Signals every registered job to pause at its next batch/chunk
    /// boundary and persist. Called by the daemon's SIGTERM/SIGINT handler.
    pub fn request_shutdown_all(&self) {
        self.shutdown.request_shutdown(None);
    }

    pub async fn start(
        &self,
        kb_id: &str,
        source_type: &str,
        source_config: serde_json::Value,
        priority: i32,
        inputs: JobInputs,
    ) -> Result<Uuid, ServiceError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(kb_id) {
            return Err(ServiceError::JobAlreadyRunning {
                kb_id: kb_id.to_string(),
            });
        }

        let job_id = self.store.create_job(kb_id, source_type, source_config, priority)?;
        self.store.set_job_status(job_id, JobStatus::Running, None, None)?;

        let handle = self.spawn_coordinator(job_id, kb_id.to_string(), inputs);
        tasks.insert(kb_id.to_string(), handle);
        Ok(job_id)
    }

    pub async fn resume(&self, kb_id: &str, inputs: JobInputs) -> Result<Uuid, ServiceError> {
        let mut tasks = self.tasks.lock().await;
        let job = self
            .store
            .get_latest_job(kb_id)?
            .ok_or_else(|| ServiceError::NoJobForKb {
                kb_id: kb_id.to_string(),
            })?;

        if !matches!(job.status, JobStatus::Paused | JobStatus::Failed) {
            return Err(ServiceError::NotResumable {
                kb_id: kb_id.to_string(),
                status: job.status,
            });
        }

        transition_or_raise(job.status, JobStatus::Running)?;
        self.store.set_job_status(job.id, JobStatus::Running, None, None)?;

        if tasks.contains_key(kb_id) {
            // The coordinator task is still alive, parked inside the Job
            // Gate's pause-poll loop; flipping the status is all it takes
            // for it to notice and carry on.
            return Ok(job.id);
        }

        let handle = self.spawn_coordinator(job.id, kb_id.to_string(), inputs);
        tasks.insert(kb_id.to_string(), handle);
        Ok(job.id)
    }

    pub async fn pause(&self, kb_id: &str) -> Result<(), ServiceError> {
        let job = self
            .store
            .get_latest_job(kb_id)?
            .ok_or_else(|| ServiceError::NoJobForKb {
                kb_id: kb_id.to_string(),
            })?;
        transition_or_raise(job.status, JobStatus::Paused)?;
        self.store.set_job_status(job.id, JobStatus::Paused, None, None)?;
        Ok(())
    }

    pub async fn cancel(&self, kb_id: &str) -> Result<(), ServiceError> {
        let job = self
            .store
            .get_latest_job(kb_id)?
            .ok_or_else(|| ServiceError::NoJobForKb {
                kb_id: kb_id.to_string(),
            })?;
        transition_or_raise(job.status, JobStatus::Canceled)?;
        self.store.set_job_status(job.id, JobStatus::Canceled, None, None)?;

        let has_live_task = self.tasks.lock().await.contains_key(kb_id);
        if !has_live_task {
            // No coordinator task is around to observe the cancellation and
            // run the Job Gate's cleanup, so drive it here directly.
            self.gate.check(job.id, kb_id, self.indexer.as_ref()).await?;
        }
        Ok(())
    }

    pub async fn status(&self, kb_id: &str) -> Result<ComposedStatus, ServiceError> {
        let job = self
            .store
            .get_latest_job(kb_id)?
            .ok_or_else(|| ServiceError::NoJobForKb {
                kb_id: kb_id.to_string(),
            })?;
        let phase_rows = self.store.get_all_phase_statuses(job.id)?;
        let details: Vec<PhaseDetail> = phase_rows.iter().map(PhaseDetail::from).collect();
        let index_ready = self.indexer.is_ready(kb_id).await.map_err(ServiceError::Indexer)?;
        Ok(status::compose(&job.counters, &details, index_ready))
    }

    fn spawn_coordinator(&self, job_id: Uuid, kb_id: String, inputs: JobInputs) -> JoinHandle<()> {
        let store = self.store.clone();
        let shutdown = self.shutdown.clone();
        let gate = self.gate.clone();
        let indexer = self.indexer.clone();
        let tasks = self.tasks.clone();

        let loading_stage = LoadingStage::new(store.clone());
        let chunking_stage = ChunkingStage::new(store.clone(), inputs.chunker);
        let processor = crate::chunk_processor::ChunkProcessor::new(
            ingest_common::RetryPolicy::default(),
            inputs.embedder,
            indexer.clone(),
        );
        let embedding_stage = EmbeddingIndexingStage::new(
            store.clone(),
            gate.clone(),
            shutdown.clone(),
            processor,
            indexer.clone(),
        );

        let coordinator = PipelineCoordinator::new(
            store,
            shutdown,
            gate,
            inputs.loader,
            loading_stage,
            chunking_stage,
            embedding_stage,
            indexer,
            job_id,
            kb_id.clone(),
            inputs.content_root,
        );

        tokio::spawn(async move {
            if let Err(err) = coordinator.run().await {
                tracing::error!(kb_id = %kb_id, error = %err, "coordinator task ended with an error");
            }
            tasks.lock().await.remove(&kb_id);
        })
    }
}
